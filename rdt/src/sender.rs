//! Outbound state for alternating-bit stop-and-wait.
//!
//! [`Sender`] tracks the current sequence bit and the single in-flight frame.
//! It does **not** touch the channel; [`crate::connection::Connection`] calls
//! these methods and owns the actual send/await loop.
//!
//! # Stop-and-Wait contract
//! - At most **one** frame is in flight at any moment (`outstanding`).
//! - A new frame may only be built once `outstanding` is `None`.
//! - On `ACK(seq)` matching the in-flight frame: flip `next_seq`, clear
//!   `outstanding`.
//! - On anything else: the caller resends the same encoded bytes unchanged.

use std::time::Instant;

use crate::packet::{Packet, PacketError, PacketKind, MAX_SEQUENCE_NUMBER};
use crate::state::{Seq, SenderState};

// ---------------------------------------------------------------------------
// OutstandingFrame
// ---------------------------------------------------------------------------

/// A data frame that has been sent but not yet acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutstandingFrame {
    pub seq: Seq,
    /// Encoded frame, resent byte-for-byte on retransmission.
    pub bytes: Vec<u8>,
    /// How many times this frame has been transmitted (1 = first send).
    pub tx_count: u32,
    pub sent_at: Instant,
}

// ---------------------------------------------------------------------------
// SenderEvent
// ---------------------------------------------------------------------------

/// Why the in-flight frame has to go out again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetransmitReason {
    /// The response failed digest validation.
    Corrupt,
    /// The peer reported our frame corrupt.
    Nak,
    /// An ACK for a sequence number other than the in-flight one.
    StaleAck(u64),
    /// No response within the per-attempt timeout.
    Timeout,
}

/// Outcome of feeding one inbound frame to the sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SenderEvent {
    /// The in-flight frame was acknowledged; the sender is idle again.
    Complete,
    /// Resend the in-flight frame unchanged.
    Retransmit(RetransmitReason),
    /// The peer sent data while we await an ACK: its view of our
    /// acknowledgements is stale.  The caller hands the frame to the receive
    /// side (which acknowledges it) and then resends the in-flight frame.
    Resync(Packet),
    /// Nothing is in flight; the frame is not the sender's business.
    Ignored,
}

// ---------------------------------------------------------------------------
// Sender
// ---------------------------------------------------------------------------

/// Stop-and-wait send-side state for one connection.
#[derive(Debug, Default)]
pub struct Sender {
    /// Sequence bit of the **next** message.  Flips on every ACKed send.
    pub next_seq: Seq,

    outstanding: Option<OutstandingFrame>,
    /// Counter for unacknowledged frames; wraps at the field width.
    datagram_seq: u64,
}

impl Sender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SenderState {
        match &self.outstanding {
            Some(frame) => SenderState::AwaitingAck(frame.seq),
            None => SenderState::Idle,
        }
    }

    /// Encode `message` under the current sequence bit and move it into the
    /// in-flight slot.  Returns the bytes to put on the channel.
    pub fn begin(&mut self, message: &[u8]) -> Result<Vec<u8>, PacketError> {
        debug_assert!(
            self.outstanding.is_none(),
            "begin called while a frame is already in flight"
        );
        let bytes = Packet::data(self.next_seq.as_u64(), message).encode()?;
        self.outstanding = Some(OutstandingFrame {
            seq: self.next_seq,
            bytes: bytes.clone(),
            tx_count: 1,
            sent_at: Instant::now(),
        });
        Ok(bytes)
    }

    /// Encode `message` as a fire-and-forget frame.  Nothing is kept in
    /// flight; returns the sequence number used and the bytes to send.
    pub fn datagram(&mut self, message: &[u8]) -> Result<(u64, Vec<u8>), PacketError> {
        let seq = self.datagram_seq;
        let bytes = Packet::data(seq, message).encode()?;
        self.datagram_seq = if seq == MAX_SEQUENCE_NUMBER { 0 } else { seq + 1 };
        Ok((seq, bytes))
    }

    /// The in-flight frame, if any.
    pub fn outstanding(&self) -> Option<&OutstandingFrame> {
        self.outstanding.as_ref()
    }

    /// Classify one raw inbound frame against the in-flight frame.
    pub fn on_frame(&mut self, raw: &[u8]) -> SenderEvent {
        let Some(in_flight) = self.outstanding.as_ref() else {
            return SenderEvent::Ignored;
        };

        let packet = match Packet::decode(raw) {
            Ok(p) => p,
            Err(_) => return SenderEvent::Retransmit(RetransmitReason::Corrupt),
        };

        match packet.kind() {
            PacketKind::Ack if packet.seq == in_flight.seq.as_u64() => {
                self.next_seq = self.next_seq.flip();
                self.outstanding = None;
                SenderEvent::Complete
            }
            PacketKind::Ack => SenderEvent::Retransmit(RetransmitReason::StaleAck(packet.seq)),
            PacketKind::Nak => SenderEvent::Retransmit(RetransmitReason::Nak),
            PacketKind::Data => SenderEvent::Resync(packet),
        }
    }

    /// Record a retransmission of the in-flight frame.
    pub fn on_retransmit(&mut self) {
        if let Some(ref mut f) = self.outstanding {
            f.tx_count += 1;
            f.sent_at = Instant::now();
        }
    }

    /// Times the in-flight frame has been sent, or `0` when idle.
    pub fn transmit_count(&self) -> u32 {
        self.outstanding.as_ref().map_or(0, |f| f.tx_count)
    }

    /// Give up on the in-flight frame without advancing the sequence bit.
    pub fn abandon(&mut self) -> Option<OutstandingFrame> {
        self.outstanding.take()
    }
}
