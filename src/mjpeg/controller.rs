//! Session lifecycle and the background read loop.
use log::{error, info, warn};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use super::assembler::{FrameAssembler, Frames};
use super::net::{ByteSource, HttpByteSource, OpenedStream};
use super::sink::{EndReason, NotificationSink};
use super::state::{Boundary, Credentials, DecoderConfig, Frame, Session, StopSignal};
use crate::error::{Result, StreamError};

/// Drives one MJPEG session at a time.
///
/// `start` opens the stream and parses the boundary on the calling thread,
/// then hands the body to a background thread that assembles frames and
/// forwards them to the sink.
pub struct StreamController<S> {
    source: S,
    config: DecoderConfig,
    sink: Arc<dyn NotificationSink>,
    session: Option<Session>,
    latest: Arc<RwLock<Option<Frame>>>,
    reader: Option<Reader>,
    /// Superseded read loops that may still be finishing a read.
    retired: Vec<thread::JoinHandle<()>>,
}

/// Handle on a running read loop.
struct Reader {
    handle: thread::JoinHandle<()>,
    end: Arc<EndClaim>,
}

/// Decides who sends a session's single end notification: its read loop, or
/// the controller when a new session supersedes it.
#[derive(Default)]
struct EndClaim {
    claimed: AtomicBool,
    superseded: AtomicBool,
}

impl EndClaim {
    /// True for the first caller only.
    fn claim(&self) -> bool {
        !self.claimed.swap(true, Ordering::SeqCst)
    }

    fn is_superseded(&self) -> bool {
        self.superseded.load(Ordering::SeqCst)
    }
}

impl StreamController<HttpByteSource> {
    /// Controller reading over HTTP with default settings.
    pub fn http(sink: Arc<dyn NotificationSink>) -> Result<Self> {
        let config = DecoderConfig::default();
        let source = HttpByteSource::new(&config)?;
        Ok(Self::with_config(source, sink, config))
    }
}

impl<S: ByteSource> StreamController<S> {
    pub fn new(source: S, sink: Arc<dyn NotificationSink>) -> Self {
        Self::with_config(source, sink, DecoderConfig::default())
    }

    pub fn with_config(source: S, sink: Arc<dyn NotificationSink>, config: DecoderConfig) -> Self {
        Self {
            source,
            config,
            sink,
            session: None,
            latest: Arc::new(RwLock::new(None)),
            reader: None,
            retired: Vec::new(),
        }
    }

    /// Open `address` and start reading frames in the background.
    ///
    /// Fails without reading any body bytes if the stream cannot be opened or
    /// its content-type carries no boundary. Rejected with
    /// [`StreamError::AlreadyActive`] while a session is running.
    ///
    /// A stopped session whose read loop is still blocked in a read is
    /// superseded: its end is reported as [`EndReason::Stopped`] right away
    /// and nothing else from it reaches the sink. If that loop is already
    /// sending its final notifications, this waits for them.
    pub fn start(&mut self, address: &str, credentials: Option<Credentials>) -> Result<()> {
        if self.is_active() {
            return Err(StreamError::AlreadyActive);
        }

        let opened = self.source.open(address, credentials.as_ref())?;
        let boundary = Boundary::from_content_type(opened.content_type())?;
        info!(
            "starting session for {} with boundary '{}'",
            address,
            String::from_utf8_lossy(boundary.as_bytes())
        );

        self.retire_reader();

        let session = Session::new(address, credentials);
        let end = Arc::new(EndClaim::default());
        let reader = ReadLoop {
            stop: session.stop_signal(),
            running: session.running_flag(),
            end: Arc::clone(&end),
            sink: Arc::clone(&self.sink),
            latest: Arc::clone(&self.latest),
            config: self.config.clone(),
        };
        let handle = thread::Builder::new()
            .name("mjpeg-reader".to_string())
            .spawn(move || reader.run(opened, boundary))?;

        self.session = Some(session);
        self.reader = Some(Reader { handle, end });
        Ok(())
    }

    /// Ask the current session to stop.
    ///
    /// Advisory: a pending read is not interrupted, and the connection is
    /// released only once the read loop notices. Frames of this session that
    /// are still queued in the sink are discarded.
    pub fn stop(&self) {
        if let Some(session) = &self.session {
            info!("stop requested for {}", session.address);
            session.deactivate();
        }
    }

    pub fn is_active(&self) -> bool {
        self.session.as_ref().is_some_and(Session::is_active)
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Most recently delivered frame, if any.
    pub fn current_frame(&self) -> Option<Frame> {
        self.latest.read().clone()
    }

    /// Wait for the background read loops to exit, superseded ones included.
    pub fn join(&mut self) {
        let current = self.reader.take().map(|r| r.handle);
        for handle in self.retired.drain(..).chain(current) {
            if handle.join().is_err() {
                error!("mjpeg reader thread panicked");
            }
        }
    }

    /// Silence the previous read loop before a new one starts.
    fn retire_reader(&mut self) {
        self.retired.retain(|h| !h.is_finished());
        let Some(previous) = self.reader.take() else {
            return;
        };
        previous.end.superseded.store(true, Ordering::SeqCst);
        if previous.end.claim() {
            warn!("previous read loop still draining; reporting it as stopped");
            self.sink.deliver_end(EndReason::Stopped);
            self.retired.push(previous.handle);
        } else if previous.handle.join().is_err() {
            error!("mjpeg reader thread panicked");
        }
    }
}

impl<S> Drop for StreamController<S> {
    fn drop(&mut self) {
        if let Some(session) = &self.session {
            session.deactivate();
        }
    }
}

/// State moved onto the reader thread.
struct ReadLoop {
    stop: StopSignal,
    running: Arc<AtomicBool>,
    end: Arc<EndClaim>,
    sink: Arc<dyn NotificationSink>,
    latest: Arc<RwLock<Option<Frame>>>,
    config: DecoderConfig,
}

impl ReadLoop {
    fn run(self, opened: OpenedStream, boundary: Boundary) {
        let assembler = FrameAssembler::new(boundary, self.config.buffer_capacity);
        let frames = Frames::new(opened.body, assembler, self.config.chunk_size)
            .with_stop_signal(self.stop.clone());

        let mut delivered = 0usize;
        let mut failure = None;
        for item in frames {
            match item {
                Ok(frame) => {
                    if self.stop.is_stopped() || self.end.is_superseded() {
                        break;
                    }
                    *self.latest.write() = Some(frame.clone());
                    self.sink.deliver_frame(frame, &self.stop);
                    delivered += 1;
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        // `frames` and the connection it owns are gone by now.

        let reason = match &failure {
            Some(_) => EndReason::Failed,
            None if self.stop.is_stopped() => EndReason::Stopped,
            None => EndReason::EndOfStream,
        };
        info!("session ended ({}) after {} frames", reason, delivered);
        if self.end.claim() {
            if let Some(e) = failure {
                error!("mjpeg session failed: {}", e);
                self.sink.deliver_error(e.to_string());
            }
            self.sink.deliver_end(reason);
        }
        self.running.store(false, Ordering::SeqCst);
    }
}
