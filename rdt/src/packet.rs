//! Wire-format definitions for RDT frames.
//!
//! Every unit exchanged between peers is a [`Packet`].  This module is
//! responsible for:
//! - Defining the on-wire text layout (length, sequence, digest, payload).
//! - Encoding a [`Packet`] into a byte frame ready for the channel.
//! - Validating a raw frame and decoding it back into a [`Packet`], refusing
//!   to return data for a corrupt frame.
//!
//! No I/O happens here — this is pure data transformation.
//!
//! # Wire format
//!
//! All numeric fields are **left-zero-padded decimal text**.
//!
//! ```text
//!  0          10         20                               52
//! +----------+----------+--------------------------------+-----------------+
//! |  length  | sequence |       MD5 digest (hex)         |   payload ...   |
//! +----------+----------+--------------------------------+-----------------+
//! ```
//!
//! `length` is the byte count of the entire frame, header included.  The
//! digest covers `length ‖ sequence ‖ payload` exactly as they appear on the
//! wire, so both endpoints recompute it from the same text.
//!
//! Total header size: [`HEADER_LEN`] = 52 bytes.

use md5::{Digest, Md5};
use thiserror::Error;

/// Reserved payload tokens carried by control frames.
pub mod control {
    /// Positive acknowledgement.
    pub const ACK: &[u8] = b"ACK";
    /// Negative acknowledgement.
    pub const NAK: &[u8] = b"NAK";

    /// `true` if `payload` is one of the reserved control tokens.
    pub fn is_reserved(payload: &[u8]) -> bool {
        payload == ACK || payload == NAK
    }
}

/// Width of the `length` field in bytes.
pub const LENGTH_FIELD_LEN: usize = 10;
/// Width of the `sequence` field in bytes.
pub const SEQ_FIELD_LEN: usize = 10;
/// Width of the hex digest field in bytes.
pub const DIGEST_LEN: usize = 32;
/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = LENGTH_FIELD_LEN + SEQ_FIELD_LEN + DIGEST_LEN;

/// Largest sequence number that fits the decimal `sequence` field.
pub const MAX_SEQUENCE_NUMBER: u64 = 9_999_999_999;
/// Largest frame length that fits the decimal `length` field.
pub const MAX_FRAME_LEN: u64 = 9_999_999_999;

// Byte offsets of each field within the serialised header.
const OFF_SEQ: usize = LENGTH_FIELD_LEN;
const OFF_DIGEST: usize = OFF_SEQ + SEQ_FIELD_LEN;

/// How a decoded frame should be interpreted by the state machines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Ack,
    Nak,
    Data,
}

/// A logical frame: sequence number + payload.
///
/// `length` and `digest` are derived on [`Packet::encode`] and never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub seq: u64,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn new(seq: u64, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            seq,
            payload: payload.into(),
        }
    }

    /// Data frame carrying an application message.
    pub fn data(seq: u64, payload: &[u8]) -> Self {
        Self::new(seq, payload)
    }

    /// Positive acknowledgement for `seq`.
    pub fn ack(seq: u64) -> Self {
        Self::new(seq, control::ACK)
    }

    /// Negative acknowledgement; `seq` is the receiver's expected number.
    pub fn nak(seq: u64) -> Self {
        Self::new(seq, control::NAK)
    }

    /// Classify the payload against the control vocabulary.
    pub fn kind(&self) -> PacketKind {
        match self.payload.as_slice() {
            p if p == control::ACK => PacketKind::Ack,
            p if p == control::NAK => PacketKind::Nak,
            _ => PacketKind::Data,
        }
    }

    /// Serialise this packet into a newly allocated frame.
    ///
    /// The output is a pure function of `(seq, payload)`.
    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        if self.seq > MAX_SEQUENCE_NUMBER {
            return Err(PacketError::SequenceOutOfRange(self.seq));
        }
        let total = HEADER_LEN + self.payload.len();
        if total as u64 > MAX_FRAME_LEN {
            return Err(PacketError::FrameTooLarge(total));
        }

        let length_text = format!("{total:0width$}", width = LENGTH_FIELD_LEN);
        let seq_text = format!("{:0width$}", self.seq, width = SEQ_FIELD_LEN);
        let digest = frame_digest(length_text.as_bytes(), seq_text.as_bytes(), &self.payload);

        let mut buf = Vec::with_capacity(total);
        buf.extend_from_slice(length_text.as_bytes());
        buf.extend_from_slice(seq_text.as_bytes());
        buf.extend_from_slice(digest.as_bytes());
        buf.extend_from_slice(&self.payload);
        debug_assert_eq!(buf.len(), total);
        Ok(buf)
    }

    /// `true` if the embedded digest does not match the frame contents.
    ///
    /// `buf` should hold exactly one frame (see [`crate::reframer`]).  Input
    /// too short to contain the header is reported as corrupt rather than
    /// panicking.
    pub fn is_corrupt(buf: &[u8]) -> bool {
        if buf.len() < HEADER_LEN {
            return true;
        }
        let length_text = &buf[..OFF_SEQ];
        let seq_text = &buf[OFF_SEQ..OFF_DIGEST];
        let embedded = &buf[OFF_DIGEST..HEADER_LEN];
        let payload = &buf[HEADER_LEN..];

        frame_digest(length_text, seq_text, payload).as_bytes() != embedded
    }

    /// Validate and parse a [`Packet`] from exactly one raw frame.
    ///
    /// Returns [`Err`] if:
    /// - the digest does not verify ([`PacketError::CorruptFrame`]),
    /// - the declared length disagrees with `buf.len()`, or
    /// - a numeric field is not decimal text.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if Self::is_corrupt(buf) {
            return Err(PacketError::CorruptFrame);
        }

        let declared = parse_decimal(&buf[..OFF_SEQ]).ok_or(PacketError::BadField("length"))?;
        if declared != buf.len() as u64 {
            return Err(PacketError::LengthMismatch {
                declared,
                actual: buf.len(),
            });
        }
        let seq =
            parse_decimal(&buf[OFF_SEQ..OFF_DIGEST]).ok_or(PacketError::BadField("sequence"))?;

        Ok(Packet {
            seq,
            payload: buf[HEADER_LEN..].to_vec(),
        })
    }
}

/// Errors that can arise when encoding or decoding a frame.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("frame digest does not match its contents")]
    CorruptFrame,
    #[error("declared length {declared} does not match frame size {actual}")]
    LengthMismatch { declared: u64, actual: usize },
    #[error("{0} field is not decimal text")]
    BadField(&'static str),
    #[error("sequence number {0} does not fit the sequence field")]
    SequenceOutOfRange(u64),
    #[error("frame of {0} bytes does not fit the length field")]
    FrameTooLarge(usize),
}

/// Parse a fixed-width, zero-padded decimal field.
///
/// Returns `None` for an empty field or any non-digit byte.
pub fn parse_decimal(field: &[u8]) -> Option<u64> {
    if field.is_empty() {
        return None;
    }
    field.iter().try_fold(0u64, |acc, &b| {
        if b.is_ascii_digit() {
            acc.checked_mul(10)?.checked_add(u64::from(b - b'0'))
        } else {
            None
        }
    })
}

/// Hex MD5 over the textual `length ‖ sequence ‖ payload` concatenation.
fn frame_digest(length_text: &[u8], seq_text: &[u8], payload: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(length_text);
    hasher.update(seq_text);
    hasher.update(payload);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let pkt = Packet::data(1, b"hello");
        let decoded = Packet::decode(&pkt.encode().unwrap()).unwrap();
        assert_eq!(decoded, pkt);
    }

    #[test]
    fn hello_frame_matches_reference_bytes() {
        let bytes = Packet::data(0, b"HELLO").encode().unwrap();
        assert_eq!(
            bytes,
            b"000000005700000000003e05cf5c0a751383c1672fd747662ef3HELLO".to_vec()
        );
    }

    #[test]
    fn control_frames_match_reference_bytes() {
        assert_eq!(
            Packet::ack(0).encode().unwrap(),
            b"000000005500000000003cf814ca8d99f5d1fa83e361bf2a0d2eACK".to_vec()
        );
        assert_eq!(
            Packet::nak(1).encode().unwrap(),
            b"00000000550000000001b7389b80caf2342ddfe170e8b16b3eb1NAK".to_vec()
        );
    }

    #[test]
    fn encode_is_deterministic() {
        let a = Packet::data(1, b"same").encode().unwrap();
        let b = Packet::data(1, b"same").encode().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn length_field_counts_whole_frame() {
        let payload = b"fifteen bytes!!";
        let bytes = Packet::data(0, payload).encode().unwrap();
        assert_eq!(bytes.len(), HEADER_LEN + payload.len());
        assert_eq!(parse_decimal(&bytes[..LENGTH_FIELD_LEN]), Some(bytes.len() as u64));
    }

    #[test]
    fn header_len_constant_is_correct() {
        // length(10) + sequence(10) + digest(32) = 52
        assert_eq!(HEADER_LEN, 52);
    }

    #[test]
    fn empty_payload_roundtrip() {
        let decoded = Packet::decode(&Packet::data(0, b"").encode().unwrap()).unwrap();
        assert!(decoded.payload.is_empty());
        assert_eq!(decoded.kind(), PacketKind::Data);
    }

    #[test]
    fn large_sequence_numbers_are_encodable() {
        let pkt = Packet::ack(MAX_SEQUENCE_NUMBER);
        assert_eq!(Packet::decode(&pkt.encode().unwrap()).unwrap(), pkt);
    }

    #[test]
    fn sequence_beyond_field_width_is_rejected() {
        assert_eq!(
            Packet::ack(MAX_SEQUENCE_NUMBER + 1).encode(),
            Err(PacketError::SequenceOutOfRange(MAX_SEQUENCE_NUMBER + 1))
        );
    }

    #[test]
    fn every_single_bit_flip_is_detected() {
        let clean = Packet::data(1, b"payload under test").encode().unwrap();
        for byte in 0..clean.len() {
            for bit in 0..8 {
                let mut bytes = clean.clone();
                bytes[byte] ^= 1 << bit;
                assert!(Packet::is_corrupt(&bytes), "flip at byte {byte} bit {bit}");
                assert_eq!(Packet::decode(&bytes), Err(PacketError::CorruptFrame));
            }
        }
    }

    #[test]
    fn short_input_is_corrupt_not_a_panic() {
        assert!(Packet::is_corrupt(&[]));
        assert!(Packet::is_corrupt(&[b'0'; HEADER_LEN - 1]));
        assert_eq!(Packet::decode(b"0000"), Err(PacketError::CorruptFrame));
    }

    #[test]
    fn decode_rejects_frame_with_trailing_bytes() {
        let mut bytes = Packet::data(0, b"data").encode().unwrap();
        bytes.extend_from_slice(b"more");
        // Trailing bytes are covered by the digest, so this surfaces as corruption.
        assert_eq!(Packet::decode(&bytes), Err(PacketError::CorruptFrame));
    }

    #[test]
    fn kind_classifies_control_tokens() {
        assert_eq!(Packet::ack(0).kind(), PacketKind::Ack);
        assert_eq!(Packet::nak(1).kind(), PacketKind::Nak);
        assert_eq!(Packet::data(0, b"ACKNOWLEDGED").kind(), PacketKind::Data);
        assert!(control::is_reserved(b"NAK"));
        assert!(!control::is_reserved(b"nak"));
    }

    #[test]
    fn parse_decimal_rejects_non_digits() {
        assert_eq!(parse_decimal(b"0000000042"), Some(42));
        assert_eq!(parse_decimal(b"00000x0042"), None);
        assert_eq!(parse_decimal(b" 000000042"), None);
        assert_eq!(parse_decimal(b""), None);
    }
}
