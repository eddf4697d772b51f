//! Core session types and helpers.
//!
//! This module defines the values shared by the assembler, the controller and
//! the notification sinks, along with the content-type parsing helpers.
use bytes::Bytes;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Result, StreamError};

/// JPEG start-of-image marker.
pub const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];

/// Bytes pulled from the stream per read.
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Largest frame the working buffer accepts.
pub const DEFAULT_BUFFER_CAPACITY: usize = 1024 * 1024;

/// One complete encoded image, from the start marker up to the boundary.
///
/// Backed by [`Bytes`], so clones share the same allocation.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame(Bytes);

impl Frame {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self(data.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Deref for Frame {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let head = &self.0[..self.0.len().min(8)];
        f.debug_struct("Frame")
            .field("len", &self.0.len())
            .field("head", &hex::encode_upper(head))
            .finish()
    }
}

/// Delimiter separating frames in the multipart stream, always `--`-prefixed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Boundary(Vec<u8>);

impl Boundary {
    /// Build from a bare token, adding the `--` prefix when missing.
    pub fn from_token(token: &str) -> Result<Self> {
        let token = token.trim().trim_matches('"');
        if token.is_empty() {
            return Err(StreamError::HeaderFormat("empty boundary token".to_string()));
        }
        let full = if token.starts_with("--") {
            token.to_string()
        } else {
            format!("--{}", token)
        };
        Ok(Self(full.into_bytes()))
    }

    /// Extract the boundary from a `<type>; boundary=<token>` header value.
    pub fn from_content_type(content_type: Option<&str>) -> Result<Self> {
        let value = content_type
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| StreamError::HeaderFormat("missing content-type".to_string()))?;
        let token = content_type_param(value, "boundary").ok_or_else(|| {
            StreamError::HeaderFormat(format!("no boundary declaration in '{}'", value))
        })?;
        Self::from_token(token)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Find a `name=value` parameter in a content-type value; names compare
/// case-insensitively.
pub fn content_type_param<'a>(content_type: &'a str, name: &str) -> Option<&'a str> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        key.trim().eq_ignore_ascii_case(name).then_some(value.trim())
    })
}

/// Username and password forwarded verbatim to the byte source.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Both fields empty means "no authentication".
    pub fn is_empty(&self) -> bool {
        self.username.is_empty() && self.password.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Stop request shared by a session, its read loop and any frames still
/// queued for delivery.
#[derive(Clone, Debug, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A single stream session: where it reads from and whether it should go on.
#[derive(Clone, Debug)]
pub struct Session {
    pub address: String,
    pub credentials: Option<Credentials>,
    stop: StopSignal,
    running: Arc<AtomicBool>,
}

impl Session {
    pub fn new(address: impl Into<String>, credentials: Option<Credentials>) -> Self {
        Self {
            address: address.into(),
            credentials,
            stop: StopSignal::new(),
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Running and not asked to stop.
    pub fn is_active(&self) -> bool {
        self.running.load(Ordering::SeqCst) && !self.stop.is_stopped()
    }

    /// Ask the read loop to finish after its current unit of work.
    ///
    /// Frames of this session that are still queued are discarded too.
    pub fn deactivate(&self) {
        self.stop.stop();
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Cleared by the read loop when it exits.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }
}

/// Tunables for a decoder session.
#[derive(Clone, Debug)]
pub struct DecoderConfig {
    /// Bytes requested from the stream per read.
    pub chunk_size: usize,
    /// Maximum size of a single frame.
    pub buffer_capacity: usize,
    /// Time allowed to establish the connection.
    pub connect_timeout: Duration,
    /// Per-request timeout; `None` keeps an endless stream open.
    pub read_timeout: Option<Duration>,
    /// Slots in the bounded event queue sink.
    pub queue_capacity: usize,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            connect_timeout: Duration::from_secs(10),
            read_timeout: None,
            queue_capacity: 16,
        }
    }
}

impl DecoderConfig {
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity.max(1);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }
}
