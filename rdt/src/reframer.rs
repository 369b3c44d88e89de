//! Stream re-framing of channel bytes into whole frames.
//!
//! The channel delivers a byte stream whose read boundaries have nothing to do
//! with the sender's frame boundaries: one read may carry half a frame, or
//! three frames and the start of a fourth.  [`Reframer`] accumulates reads in
//! a single `BytesMut` and slices off complete frames using the declared
//! `length` field.
//!
//! Parsing per frame:
//! - fewer than [`LENGTH_FIELD_LEN`] bytes buffered → wait for more data;
//! - declared length implausible → [`FrameError`], connection-fatal;
//! - fewer than `length` bytes buffered → wait for more data;
//! - otherwise split exactly `length` bytes off the front.
//!
//! Frames are returned raw; digest validation is [`crate::packet`]'s job.

use bytes::{Bytes, BytesMut};
use thiserror::Error;

use crate::packet::{parse_decimal, HEADER_LEN, LENGTH_FIELD_LEN};

/// Default upper bound on a single frame (header included).
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// The buffered stream cannot be re-synchronised.
///
/// A bad length field is never treated as "not enough data yet": the stream
/// carries no other framing, so every later byte would be misread.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("length field {0:?} is not decimal text")]
    BadLength(String),
    #[error("declared length {0} is shorter than the {HEADER_LEN}-byte header")]
    TooShort(u64),
    #[error("declared length {declared} exceeds the {max}-byte frame limit")]
    TooLarge { declared: u64, max: usize },
}

/// Accumulates channel reads and yields complete raw frames.
#[derive(Debug)]
pub struct Reframer {
    buffer: BytesMut,
    max_frame_len: usize,
}

impl Default for Reframer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}

impl Reframer {
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            max_frame_len,
        }
    }

    /// Append bytes read from the channel.
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Number of bytes held back waiting for the rest of a frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Split the next complete frame off the buffer, if there is one.
    pub fn next_frame(&mut self) -> Result<Option<Bytes>, FrameError> {
        next_frame(&mut self.buffer, self.max_frame_len)
    }

    /// Extract every complete frame currently buffered, in order.
    pub fn drain_frames(&mut self) -> Result<Vec<Bytes>, FrameError> {
        extract_frames(&mut self.buffer, self.max_frame_len)
    }
}

/// Extract all complete frames from the front of `buffer`.
///
/// A trailing partial frame stays in `buffer` for the next read.
pub fn extract_frames(buffer: &mut BytesMut, max_frame_len: usize) -> Result<Vec<Bytes>, FrameError> {
    let mut frames = Vec::new();
    while let Some(frame) = next_frame(buffer, max_frame_len)? {
        frames.push(frame);
    }
    Ok(frames)
}

fn next_frame(buffer: &mut BytesMut, max_frame_len: usize) -> Result<Option<Bytes>, FrameError> {
    if buffer.len() < LENGTH_FIELD_LEN {
        return Ok(None);
    }

    let length_text = &buffer[..LENGTH_FIELD_LEN];
    let declared = parse_decimal(length_text)
        .ok_or_else(|| FrameError::BadLength(String::from_utf8_lossy(length_text).into_owned()))?;
    if declared < HEADER_LEN as u64 {
        return Err(FrameError::TooShort(declared));
    }
    if declared > max_frame_len as u64 {
        return Err(FrameError::TooLarge {
            declared,
            max: max_frame_len,
        });
    }

    let declared = declared as usize;
    if buffer.len() < declared {
        return Ok(None);
    }
    Ok(Some(buffer.split_to(declared).freeze()))
}
