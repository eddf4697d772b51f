//! Frame assembly from a chunked multipart byte stream.
//!
//! [`FrameAssembler`] is a two-state machine:
//! - `SeekingStart`: discard bytes until the JPEG start marker shows up
//! - `AccumulatingFrame`: buffer bytes until the multipart boundary shows up
//!
//! When the boundary is found mid-chunk, the bytes from the boundary onward
//! are kept as a carry and become the prefix of the next chunk, so nothing
//! belonging to the next frame is lost. [`Frames`] drives an assembler from
//! any [`Read`] and yields frames lazily.
use std::io::{self, Read};
use std::mem;

use log::debug;

use super::search::find;
use super::state::{Boundary, Frame, StopSignal, JPEG_SOI};
use crate::error::{Result, StreamError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssemblerState {
    SeekingStart,
    AccumulatingFrame,
}

/// Turns a sequence of chunks into a sequence of complete frames.
pub struct FrameAssembler {
    state: AssemblerState,
    boundary: Boundary,
    /// Bytes of the frame in progress. While seeking, holds at most a
    /// trailing `0xFF` that may be the first half of a split marker.
    working: Vec<u8>,
    capacity: usize,
    /// Bytes after a detected boundary, to be scanned first next cycle.
    carry: Vec<u8>,
}

impl FrameAssembler {
    pub fn new(boundary: Boundary, capacity: usize) -> Self {
        Self {
            state: AssemblerState::SeekingStart,
            boundary,
            working: Vec::new(),
            capacity: capacity.max(1),
            carry: Vec::new(),
        }
    }

    pub fn state(&self) -> AssemblerState {
        self.state
    }

    /// Bytes accumulated for the frame in progress.
    pub fn accumulated(&self) -> usize {
        match self.state {
            AssemblerState::SeekingStart => 0,
            AssemblerState::AccumulatingFrame => self.working.len(),
        }
    }

    /// Hand over the leftover bytes of the last cycle.
    ///
    /// The caller prepends them to the next chunk it feeds.
    pub fn take_carry(&mut self) -> Vec<u8> {
        mem::take(&mut self.carry)
    }

    pub fn has_carry(&self) -> bool {
        !self.carry.is_empty()
    }

    /// Drop the frame in progress and any carry; start seeking again.
    pub fn reset(&mut self) {
        self.state = AssemblerState::SeekingStart;
        self.working.clear();
        self.carry.clear();
    }

    /// Consume one chunk, returning a frame if this chunk completed one.
    ///
    /// At most one frame is produced per call. Anything after its boundary is
    /// left in the carry (see [`take_carry`](Self::take_carry)); a carry that
    /// was not taken is scanned ahead of `chunk`.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Option<Frame>> {
        if !self.carry.is_empty() {
            let mut joined = self.take_carry();
            joined.extend_from_slice(chunk);
            return self.feed(&joined);
        }
        match self.state {
            AssemblerState::SeekingStart => {
                self.working.extend_from_slice(chunk);
                let Some(start) = find(&self.working, &JPEG_SOI) else {
                    let keep = usize::from(self.working.last() == Some(&JPEG_SOI[0]));
                    let discard = self.working.len() - keep;
                    self.working.drain(..discard);
                    return Ok(None);
                };
                self.working.drain(..start);
                self.state = AssemblerState::AccumulatingFrame;
                self.scan_for_boundary(JPEG_SOI.len())
            }
            AssemblerState::AccumulatingFrame => {
                // `capacity` bounds the frame, not this scratch buffer: it may
                // briefly hold one chunk more before the check below runs.
                let overlap = self.boundary.len().saturating_sub(1);
                let scan_from = self.working.len().saturating_sub(overlap).max(JPEG_SOI.len());
                self.working.extend_from_slice(chunk);
                self.scan_for_boundary(scan_from)
            }
        }
    }

    fn scan_for_boundary(&mut self, from: usize) -> Result<Option<Frame>> {
        let Some(offset) = find(&self.working[from..], self.boundary.as_bytes()) else {
            // The last boundary.len() - 1 bytes may still turn out to be the
            // start of the boundary.
            let at_least = self
                .working
                .len()
                .saturating_sub(self.boundary.len().saturating_sub(1));
            if at_least > self.capacity {
                return Err(self.overflow(at_least, None));
            }
            return Ok(None);
        };

        let end = from + offset;
        let rest = self.working.split_off(end);
        if end > self.capacity {
            return Err(self.overflow(end, Some(rest)));
        }

        let frame = Frame::new(mem::take(&mut self.working));
        self.working = Vec::with_capacity(frame.len());
        self.carry = rest;
        self.state = AssemblerState::SeekingStart;
        debug!(
            "frame complete: {} bytes, head {}",
            frame.len(),
            hex::encode_upper(&frame[..frame.len().min(4)])
        );
        Ok(Some(frame))
    }

    fn overflow(&mut self, size: usize, rest: Option<Vec<u8>>) -> StreamError {
        self.reset();
        if let Some(rest) = rest {
            self.carry = rest;
        }
        StreamError::Capacity {
            size,
            capacity: self.capacity,
        }
    }
}

/// Append up to `n` bytes from `reader` to `buf`.
///
/// Keeps reading until `n` bytes arrived or the reader hit end of stream.
/// Returns the number of bytes appended; 0 means end of stream.
pub fn read_chunk<R: Read + ?Sized>(reader: &mut R, buf: &mut Vec<u8>, n: usize) -> io::Result<usize> {
    reader.take(n as u64).read_to_end(buf)
}

/// Lazy sequence of frames read from a byte stream.
///
/// Yields `Err` at most once, after which the sequence is over. End of stream
/// ends the sequence without an error; a partially assembled frame is
/// dropped. Not restartable: iterating drains the reader.
pub struct Frames<R> {
    reader: R,
    assembler: FrameAssembler,
    chunk_size: usize,
    stop: Option<StopSignal>,
    finished: bool,
}

impl<R: Read> Frames<R> {
    pub fn new(reader: R, assembler: FrameAssembler, chunk_size: usize) -> Self {
        Self {
            reader,
            assembler,
            chunk_size: chunk_size.max(1),
            stop: None,
            finished: false,
        }
    }

    /// Stop yielding once `stop` is signalled.
    ///
    /// The signal is checked before every chunk; a read already in progress
    /// is not interrupted.
    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = Some(stop);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.stop.as_ref().is_some_and(StopSignal::is_stopped)
    }

    /// Carry from the last cycle, topped up to a full chunk.
    fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        let mut chunk = self.assembler.take_carry();
        let wanted = self.chunk_size.saturating_sub(chunk.len());
        if wanted > 0 {
            read_chunk(&mut self.reader, &mut chunk, wanted)?;
        }
        Ok((!chunk.is_empty()).then_some(chunk))
    }
}

impl<R: Read> Iterator for Frames<R> {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        loop {
            if self.is_cancelled() {
                self.finished = true;
                return None;
            }
            let chunk = match self.next_chunk() {
                Ok(Some(chunk)) => chunk,
                Ok(None) => {
                    self.finished = true;
                    return None;
                }
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            };
            match self.assembler.feed(&chunk) {
                Ok(Some(frame)) => return Some(Ok(frame)),
                Ok(None) => continue,
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use std::io::Cursor;

    fn boundary() -> Boundary {
        Boundary::from_token("frame").unwrap()
    }

    fn fake_jpeg(payload: &[u8]) -> Vec<u8> {
        let mut out = JPEG_SOI.to_vec();
        out.extend_from_slice(payload);
        out
    }

    /// One multipart unit: part headers, image, boundary.
    fn unit(payload: &[u8]) -> Vec<u8> {
        let mut out = b"\r\nContent-Type: image/jpeg\r\n\r\n".to_vec();
        out.extend_from_slice(&fake_jpeg(payload));
        out.extend_from_slice(b"--frame");
        out
    }

    fn collect(stream: Vec<u8>, chunk_size: usize, capacity: usize) -> Vec<Result<Frame>> {
        let assembler = FrameAssembler::new(boundary(), capacity);
        Frames::new(Cursor::new(stream), assembler, chunk_size).collect()
    }

    #[test]
    fn single_small_frame_in_one_chunk() {
        let mut stream = fake_jpeg(&[0x42; 100]);
        stream.extend_from_slice(b"--frame");

        let frames = collect(stream, 1024, 1024 * 1024);
        assert_eq!(frames.len(), 1);
        let frame = frames.into_iter().next().unwrap().unwrap();
        assert_eq!(frame.len(), 102);
        assert_eq!(frame.as_bytes(), fake_jpeg(&[0x42; 100]).as_slice());
    }

    #[test]
    fn leading_garbage_is_discarded() {
        let mut asm = FrameAssembler::new(boundary(), 1024);
        assert!(asm.feed(b"garbage without marker").unwrap().is_none());
        assert_eq!(asm.state(), AssemblerState::SeekingStart);
        assert_eq!(asm.accumulated(), 0);
    }

    #[test]
    fn frame_spanning_chunks() {
        let mut asm = FrameAssembler::new(boundary(), 1024);
        assert!(asm.feed(&[0x00, 0xFF, 0xD8, 1, 2]).unwrap().is_none());
        assert_eq!(asm.state(), AssemblerState::AccumulatingFrame);
        assert_eq!(asm.accumulated(), 4);
        assert!(asm.feed(&[3, 4, 5]).unwrap().is_none());
        let frame = asm.feed(b"\x06--frame\r\nnext").unwrap().unwrap();
        assert_eq!(frame.as_bytes(), &[0xFF, 0xD8, 1, 2, 3, 4, 5, 6]);
        assert_eq!(asm.state(), AssemblerState::SeekingStart);
        assert_eq!(asm.take_carry(), b"--frame\r\nnext".to_vec());
    }

    #[test]
    fn boundary_split_across_chunks() {
        let mut asm = FrameAssembler::new(boundary(), 1024);
        assert!(asm.feed(&[0xFF, 0xD8, 9, b'-', b'-', b'f']).unwrap().is_none());
        let frame = asm.feed(b"rame").unwrap().unwrap();
        assert_eq!(frame.as_bytes(), &[0xFF, 0xD8, 9]);
    }

    #[test]
    fn start_marker_split_across_chunks() {
        let mut asm = FrameAssembler::new(boundary(), 1024);
        assert!(asm.feed(&[1, 2, 0xFF]).unwrap().is_none());
        assert!(asm.feed(&[0xD8, 7]).unwrap().is_none());
        let frame = asm.feed(b"--frame").unwrap().unwrap();
        assert_eq!(frame.as_bytes(), &[0xFF, 0xD8, 7]);
    }

    #[test]
    fn untaken_carry_is_scanned_first() {
        let mut asm = FrameAssembler::new(boundary(), 1024);
        let mut chunk = fake_jpeg(b"a");
        chunk.extend_from_slice(b"--frame");
        chunk.extend_from_slice(&fake_jpeg(b"b"));
        chunk.extend_from_slice(b"--fr");
        assert_eq!(asm.feed(&chunk).unwrap().unwrap().as_bytes(), fake_jpeg(b"a").as_slice());
        assert!(asm.has_carry());
        assert_eq!(asm.feed(b"ame").unwrap().unwrap().as_bytes(), fake_jpeg(b"b").as_slice());
    }

    #[test]
    fn several_frames_in_one_chunk_are_all_emitted() {
        let stream: Vec<u8> = (0..5u8).flat_map(|i| unit(&[i; 10])).collect();
        let frames: Vec<Frame> = collect(stream, 4096, 1024)
            .into_iter()
            .map(|f| f.unwrap())
            .collect();
        assert_eq!(frames.len(), 5);
        for (i, frame) in frames.iter().enumerate() {
            assert_eq!(frame.as_bytes(), fake_jpeg(&[i as u8; 10]).as_slice());
        }
    }

    #[test]
    fn oversized_frame_reports_capacity_error() {
        let stream = unit(&[0x11; 300]);
        let results = collect(stream, 64, 128);
        assert_eq!(results.len(), 1);
        match &results[0] {
            Err(StreamError::Capacity { size, capacity }) => {
                assert!(*size > 128);
                assert_eq!(*capacity, 128);
            }
            other => panic!("expected capacity error, got {:?}", other),
        }
    }

    #[test]
    fn frame_exactly_at_capacity_is_accepted() {
        let stream = unit(&[0x11; 98]);
        let results = collect(stream, 16, 100);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].as_ref().unwrap().len(), 100);
    }

    #[test]
    fn chunks_larger_than_capacity_still_yield_frames_that_fit() {
        let mut stream = unit(&[0x33; 98]);
        stream.extend_from_slice(&unit(&[0x44; 10]));
        stream.extend_from_slice(&[0u8; 2000]);
        let results = collect(stream, 4096, 100);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].as_ref().unwrap().as_bytes(), fake_jpeg(&[0x33; 98]).as_slice());
        assert_eq!(results[1].as_ref().unwrap().as_bytes(), fake_jpeg(&[0x44; 10]).as_slice());
    }

    #[test]
    fn unterminated_frame_is_dropped_at_end_of_stream() {
        let mut stream = unit(b"complete");
        stream.extend_from_slice(&fake_jpeg(b"never terminated"));
        let results = collect(stream, 8, 1024);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].as_ref().unwrap().as_bytes(), fake_jpeg(b"complete").as_slice());
    }

    #[test]
    fn stop_signal_ends_iteration() {
        let stream: Vec<u8> = (0..3u8).flat_map(|i| unit(&[i; 4])).collect();
        let stop = StopSignal::new();
        let mut frames = Frames::new(Cursor::new(stream), FrameAssembler::new(boundary(), 1024), 8)
            .with_stop_signal(stop.clone());
        assert!(frames.next().unwrap().is_ok());
        stop.stop();
        assert!(frames.next().is_none());
        assert!(frames.next().is_none());
    }

    #[test]
    fn read_chunk_tops_up_to_requested_size() {
        let mut reader = Cursor::new(vec![1u8; 10]);
        let mut buf = vec![9u8; 3];
        assert_eq!(read_chunk(&mut reader, &mut buf, 4).unwrap(), 4);
        assert_eq!(buf, vec![9, 9, 9, 1, 1, 1, 1]);
        assert_eq!(read_chunk(&mut reader, &mut buf, 100).unwrap(), 6);
        assert_eq!(read_chunk(&mut reader, &mut buf, 100).unwrap(), 0);
    }

    fn payload_strategy() -> impl Strategy<Value = Vec<u8>> {
        prop::collection::vec(any::<u8>().prop_filter("no dash", |b| *b != b'-'), 0..300)
    }

    proptest! {
        #[test]
        fn prop_one_frame_per_unit(
            payloads in prop::collection::vec(payload_strategy(), 1..8),
            chunk_size in 1usize..200,
        ) {
            let stream: Vec<u8> = payloads.iter().flat_map(|p| unit(p)).collect();
            let frames: Vec<Frame> = collect(stream, chunk_size, 4096)
                .into_iter()
                .map(|f| f.unwrap())
                .collect();
            prop_assert_eq!(frames.len(), payloads.len());
            for (frame, payload) in frames.iter().zip(&payloads) {
                let expected = fake_jpeg(payload);
                prop_assert_eq!(frame.as_bytes(), expected.as_slice());
            }
        }

        #[test]
        fn prop_assembly_is_deterministic(
            payloads in prop::collection::vec(payload_strategy(), 1..6),
            chunk_size in 1usize..128,
        ) {
            let stream: Vec<u8> = payloads.iter().flat_map(|p| unit(p)).collect();
            let a: Vec<Frame> = collect(stream.clone(), chunk_size, 4096).into_iter().map(|f| f.unwrap()).collect();
            let b: Vec<Frame> = collect(stream, chunk_size, 4096).into_iter().map(|f| f.unwrap()).collect();
            prop_assert_eq!(a, b);
        }
    }
}
