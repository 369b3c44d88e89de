//! Inbound state for alternating-bit stop-and-wait.
//!
//! The [`Receiver`] decides, for every raw frame the reframer produces:
//! - whether the frame is corrupt (answer with `NAK(expected)`),
//! - whether it is the next message (answer `ACK(seq)`, deliver, flip),
//! - or a retransmission of the message already delivered (answer `ACK(seq)`
//!   again, deliver nothing).
//!
//! The [`Receiver`] does **not** send anything itself; it returns the reply
//! that [`crate::connection::Connection`] puts on the channel.

use crate::packet::{Packet, PacketError, PacketKind};
use crate::state::{ReceiverState, Seq};

/// Outcome of feeding one inbound frame to the receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiverEvent {
    /// A new message was accepted and queued for the application.
    Delivered { reply: Packet },
    /// Retransmission of an already delivered message; re-acknowledged only.
    Duplicate { reply: Packet },
    /// The frame failed validation.
    Corrupt { reply: Packet },
    /// A stray control frame; nothing to answer.
    Ignored,
}

impl ReceiverEvent {
    /// The control frame to send back, if any.
    pub fn reply(&self) -> Option<&Packet> {
        match self {
            ReceiverEvent::Delivered { reply }
            | ReceiverEvent::Duplicate { reply }
            | ReceiverEvent::Corrupt { reply } => Some(reply),
            ReceiverEvent::Ignored => None,
        }
    }
}

/// Manages the receive side of a single connection.
#[derive(Debug, Default)]
pub struct Receiver {
    /// Sequence bit the next new message must carry.
    pub expected: Seq,

    /// Payloads accepted but not yet handed to the application, concatenated.
    /// `None` means nothing new (as opposed to an empty message).
    delivered: Option<Vec<u8>>,
}

impl Receiver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ReceiverState {
        ReceiverState::Expecting(self.expected)
    }

    /// Validate and process one raw frame.
    pub fn on_frame(&mut self, raw: &[u8]) -> ReceiverEvent {
        match Packet::decode(raw) {
            Ok(packet) => self.on_packet(packet),
            Err(_) => ReceiverEvent::Corrupt {
                reply: Packet::nak(self.expected.as_u64()),
            },
        }
    }

    /// Process an already validated frame.
    pub fn on_packet(&mut self, packet: Packet) -> ReceiverEvent {
        if packet.kind() != PacketKind::Data {
            return ReceiverEvent::Ignored;
        }

        if packet.seq == self.expected.as_u64() {
            let reply = Packet::ack(packet.seq);
            self.delivered
                .get_or_insert_with(Vec::new)
                .extend_from_slice(&packet.payload);
            self.expected = self.expected.flip();
            ReceiverEvent::Delivered { reply }
        } else {
            // Our ACK for this message was lost or damaged; the sender is
            // still waiting on it.
            ReceiverEvent::Duplicate {
                reply: Packet::ack(packet.seq),
            }
        }
    }

    /// Accept one frame with no acknowledgement and no duplicate check.
    /// Returns the frame's sequence number, or why it was dropped.
    pub fn on_datagram(&mut self, raw: &[u8]) -> Result<u64, PacketError> {
        let packet = Packet::decode(raw)?;
        self.delivered
            .get_or_insert_with(Vec::new)
            .extend_from_slice(&packet.payload);
        Ok(packet.seq)
    }

    /// `true` if accepted payloads are waiting for the application.
    pub fn has_delivered(&self) -> bool {
        self.delivered.is_some()
    }

    /// Hand every accepted payload to the application, concatenated.
    pub fn take_delivered(&mut self) -> Option<Vec<u8>> {
        self.delivered.take()
    }
}
