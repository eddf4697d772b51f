//! Notification delivery.
//!
//! The read loop hands every frame, error and end-of-session signal to a
//! [`NotificationSink`]. Two sinks are provided:
//! - [`Subscribers`]: callbacks, run through an [`ExecutionContext`]
//! - [`EventQueue`]: a bounded channel of [`StreamEvent`] values
//!
//! Frames travel with their session's [`StopSignal`] and are dropped at the
//! point of delivery once the session was asked to stop, so nothing queued
//! before `stop()` reaches the consumer after it.
use crossbeam_channel::{
    bounded, unbounded, Receiver, RecvError, RecvTimeoutError, Sender, TryRecvError,
};
use log::{debug, warn};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::state::{DecoderConfig, Frame, StopSignal};

/// Why a session's read loop ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndReason {
    /// `stop()` was called.
    Stopped,
    /// The byte stream ran out.
    EndOfStream,
    /// An error was delivered just before.
    Failed,
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndReason::Stopped => write!(f, "stopped"),
            EndReason::EndOfStream => write!(f, "end of stream"),
            EndReason::Failed => write!(f, "failed"),
        }
    }
}

/// Receives what the read loop produces.
pub trait NotificationSink: Send + Sync {
    /// `stop` belongs to the session that produced `frame`; a sink that
    /// defers delivery must drop the frame if it is signalled meanwhile.
    fn deliver_frame(&self, frame: Frame, stop: &StopSignal);

    fn deliver_error(&self, message: String);

    /// Called exactly once per session, after everything else.
    fn deliver_end(&self, _reason: EndReason) {}
}

pub type Job = Box<dyn FnOnce() + Send>;

/// Where subscriber callbacks run.
pub trait ExecutionContext: Send + Sync {
    fn post(&self, job: Job);
}

/// Runs jobs right away on the posting thread (the read loop).
#[derive(Clone, Copy, Debug, Default)]
pub struct Inline;

impl ExecutionContext for Inline {
    fn post(&self, job: Job) {
        job();
    }
}

/// Queues jobs for whichever thread owns the matching [`ContextPump`].
#[derive(Clone)]
pub struct ChannelContext {
    tx: Sender<Job>,
}

/// Runs jobs posted to a [`ChannelContext`] on the calling thread.
pub struct ContextPump {
    rx: Receiver<Job>,
}

impl ChannelContext {
    pub fn new() -> (Self, ContextPump) {
        let (tx, rx) = unbounded();
        (Self { tx }, ContextPump { rx })
    }
}

impl ExecutionContext for ChannelContext {
    fn post(&self, job: Job) {
        if self.tx.send(job).is_err() {
            warn!("execution context pump dropped; notification discarded");
        }
    }
}

impl ContextPump {
    /// Run every job queued so far; returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            match self.rx.try_recv() {
                Ok(job) => {
                    job();
                    ran += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        ran
    }

    /// Run jobs until every [`ChannelContext`] clone is dropped.
    pub fn run(&self) {
        for job in self.rx.iter() {
            job();
        }
    }
}

type FrameHandler = Arc<dyn Fn(Frame) + Send + Sync>;
type ErrorHandler = Arc<dyn Fn(String) + Send + Sync>;
type EndHandler = Arc<dyn Fn(EndReason) + Send + Sync>;

#[derive(Default)]
struct Handlers {
    frames: Vec<FrameHandler>,
    errors: Vec<ErrorHandler>,
    ends: Vec<EndHandler>,
}

/// Fans notifications out to zero or more callbacks.
///
/// Callbacks run through the execution context chosen at construction;
/// the default is [`Inline`].
#[derive(Clone)]
pub struct Subscribers {
    handlers: Arc<RwLock<Handlers>>,
    context: Arc<dyn ExecutionContext>,
}

impl Default for Subscribers {
    fn default() -> Self {
        Self::new(Inline)
    }
}

impl Subscribers {
    pub fn new(context: impl ExecutionContext + 'static) -> Self {
        Self {
            handlers: Arc::new(RwLock::new(Handlers::default())),
            context: Arc::new(context),
        }
    }

    pub fn on_frame(&self, f: impl Fn(Frame) + Send + Sync + 'static) {
        self.handlers.write().frames.push(Arc::new(f));
    }

    pub fn on_error(&self, f: impl Fn(String) + Send + Sync + 'static) {
        self.handlers.write().errors.push(Arc::new(f));
    }

    pub fn on_end(&self, f: impl Fn(EndReason) + Send + Sync + 'static) {
        self.handlers.write().ends.push(Arc::new(f));
    }
}

impl NotificationSink for Subscribers {
    fn deliver_frame(&self, frame: Frame, stop: &StopSignal) {
        let handlers = self.handlers.read().frames.clone();
        if handlers.is_empty() {
            return;
        }
        let stop = stop.clone();
        self.context.post(Box::new(move || {
            if stop.is_stopped() {
                debug!("session stopped; dropping queued frame");
                return;
            }
            for h in &handlers {
                h(frame.clone());
            }
        }));
    }

    fn deliver_error(&self, message: String) {
        let handlers = self.handlers.read().errors.clone();
        if handlers.is_empty() {
            return;
        }
        self.context.post(Box::new(move || {
            for h in &handlers {
                h(message.clone());
            }
        }));
    }

    fn deliver_end(&self, reason: EndReason) {
        let handlers = self.handlers.read().ends.clone();
        if handlers.is_empty() {
            return;
        }
        self.context.post(Box::new(move || {
            for h in &handlers {
                h(reason);
            }
        }));
    }
}

/// A notification as a value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamEvent {
    Frame(Frame),
    Error(String),
    Ended(EndReason),
}

enum Queued {
    Frame(Frame, StopSignal),
    Event(StreamEvent),
}

impl Queued {
    /// `None` for a frame whose session has been stopped.
    fn into_live(self) -> Option<StreamEvent> {
        match self {
            Queued::Frame(_, stop) if stop.is_stopped() => None,
            Queued::Frame(frame, _) => Some(StreamEvent::Frame(frame)),
            Queued::Event(event) => Some(event),
        }
    }
}

/// Bounded queue of [`StreamEvent`]s consumed by the caller.
///
/// A full queue blocks the read loop until the consumer catches up.
#[derive(Clone)]
pub struct EventQueue {
    tx: Sender<Queued>,
}

/// Consumer end of an [`EventQueue`].
///
/// Frames of a stopped session are skipped on receipt.
pub struct EventReceiver {
    rx: Receiver<Queued>,
}

impl EventQueue {
    pub fn bounded(capacity: usize) -> (Self, EventReceiver) {
        let (tx, rx) = bounded(capacity.max(1));
        (Self { tx }, EventReceiver { rx })
    }

    /// Queue sized by [`DecoderConfig::queue_capacity`].
    pub fn for_config(config: &DecoderConfig) -> (Self, EventReceiver) {
        Self::bounded(config.queue_capacity)
    }

    fn send(&self, item: Queued) {
        if self.tx.send(item).is_err() {
            warn!("event receiver dropped; notification discarded");
        }
    }
}

impl NotificationSink for EventQueue {
    fn deliver_frame(&self, frame: Frame, stop: &StopSignal) {
        self.send(Queued::Frame(frame, stop.clone()));
    }

    fn deliver_error(&self, message: String) {
        self.send(Queued::Event(StreamEvent::Error(message)));
    }

    fn deliver_end(&self, reason: EndReason) {
        self.send(Queued::Event(StreamEvent::Ended(reason)));
    }
}

impl EventReceiver {
    pub fn recv(&self) -> Result<StreamEvent, RecvError> {
        loop {
            if let Some(event) = self.rx.recv()?.into_live() {
                return Ok(event);
            }
        }
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<StreamEvent, RecvTimeoutError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(event) = self.rx.recv_deadline(deadline)?.into_live() {
                return Ok(event);
            }
        }
    }

    pub fn try_recv(&self) -> Result<StreamEvent, TryRecvError> {
        loop {
            if let Some(event) = self.rx.try_recv()?.into_live() {
                return Ok(event);
            }
        }
    }

    /// Events available right now, without blocking.
    pub fn try_iter(&self) -> impl Iterator<Item = StreamEvent> + '_ {
        std::iter::from_fn(move || self.try_recv().ok())
    }

    /// Blocks for each event until every [`EventQueue`] clone is dropped.
    pub fn iter(&self) -> impl Iterator<Item = StreamEvent> + '_ {
        std::iter::from_fn(move || self.recv().ok())
    }
}
