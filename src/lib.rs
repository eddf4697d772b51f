//! Extracts JPEG frames from Motion-JPEG multipart streams.
//!
//! [`StreamController`] opens a stream through a [`ByteSource`], reads it on a
//! background thread and hands every complete [`Frame`] to a
//! [`NotificationSink`].
pub mod error;
pub mod mjpeg;

pub use error::{Result, StreamError};
pub use mjpeg::assembler::{read_chunk, AssemblerState, FrameAssembler, Frames};
pub use mjpeg::controller::StreamController;
pub use mjpeg::net::{ByteSource, HttpByteSource, OpenedStream};
pub use mjpeg::search::find;
pub use mjpeg::sink::{
    ChannelContext, ContextPump, EndReason, EventQueue, EventReceiver, ExecutionContext, Inline,
    NotificationSink, StreamEvent, Subscribers,
};
pub use mjpeg::state::{Boundary, Credentials, DecoderConfig, Frame, Session, StopSignal, JPEG_SOI};
