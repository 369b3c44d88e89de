//! Alternating-bit state types.
//!
//! The stop-and-wait sender and receiver each carry a one-bit sequence number.
//! With at most one frame in flight, one bit is enough to tell a new message
//! from a retransmission of the previous one.
//!
//! ```text
//!  sender:    IDLE ──send──▶ AWAITING_ACK(seq) ──ACK(seq)──▶ IDLE (seq flipped)
//!                                 │  ▲
//!                                 └──┘ corrupt / NAK / stale ACK / timeout
//!
//!  receiver:  EXPECTING(0) ──DATA(0)──▶ EXPECTING(1) ──DATA(1)──▶ EXPECTING(0)
//! ```

use std::fmt;

/// A sequence number from the alternating domain `{0, 1}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Seq {
    #[default]
    Zero,
    One,
}

impl Seq {
    /// The other value of the bit.
    pub fn flip(self) -> Self {
        match self {
            Seq::Zero => Seq::One,
            Seq::One => Seq::Zero,
        }
    }

    /// Wire value of this bit.
    pub fn as_u64(self) -> u64 {
        match self {
            Seq::Zero => 0,
            Seq::One => 1,
        }
    }

    /// Map a wire sequence number into the alternating domain.
    ///
    /// Anything other than `0` or `1` is not part of this protocol's domain.
    pub fn from_wire(value: u64) -> Option<Self> {
        match value {
            0 => Some(Seq::Zero),
            1 => Some(Seq::One),
            _ => None,
        }
    }
}

impl fmt::Display for Seq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u64())
    }
}

/// Send-side FSM state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SenderState {
    /// No frame outstanding.
    #[default]
    Idle,
    /// One data frame with this sequence number awaits acknowledgement.
    AwaitingAck(Seq),
}

/// Receive-side FSM state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    /// Next new message must carry this sequence number.
    Expecting(Seq),
}

impl Default for ReceiverState {
    fn default() -> Self {
        Self::Expecting(Seq::Zero)
    }
}

impl fmt::Display for SenderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SenderState::Idle => write!(f, "IDLE"),
            SenderState::AwaitingAck(seq) => write!(f, "AWAITING_ACK({seq})"),
        }
    }
}

impl fmt::Display for ReceiverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ReceiverState::Expecting(seq) = self;
        write!(f, "EXPECTING({seq})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flip_alternates() {
        assert_eq!(Seq::Zero.flip(), Seq::One);
        assert_eq!(Seq::One.flip().flip(), Seq::One);
    }

    #[test]
    fn wire_mapping() {
        assert_eq!(Seq::from_wire(0), Some(Seq::Zero));
        assert_eq!(Seq::from_wire(1), Some(Seq::One));
        assert_eq!(Seq::from_wire(2), None);
        assert_eq!(Seq::One.as_u64(), 1);
    }

    #[test]
    fn display() {
        assert_eq!(SenderState::AwaitingAck(Seq::One).to_string(), "AWAITING_ACK(1)");
        assert_eq!(ReceiverState::default().to_string(), "EXPECTING(0)");
    }
}
