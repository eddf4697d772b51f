//! MJPEG stream parsing: chunked reads in, complete JPEG frames out.
pub mod assembler;
pub mod controller;
pub mod demo;
pub mod net;
pub mod search;
pub mod sink;
pub mod state;
