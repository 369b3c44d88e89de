//! `rdt` — reliable, in-order message delivery over an unreliable byte channel
//! using the alternating-bit (stop-and-wait) protocol.
//!
//! # Architecture
//!
//! ```text
//!  application message             application message
//!        │ send()                          ▲ receive()
//!  ┌─────▼──────┐      DATA(seq)     ┌─────┴──────┐
//!  │   Sender   │───────────────────▶│  Receiver  │
//!  └─────▲──────┘                    └─────┬──────┘
//!        │          ACK(seq) / NAK         │
//!        └─────────────────────────────────┘
//!  ┌───────────────────────────────────────────────┐
//!  │                 Connection                    │
//!  │ (owns both state machines, the reframer and   │
//!  │  the retransmit timer for one session)        │
//!  └─────┬─────────────────────────────────────────┘
//!        │ raw bytes, no framing guarantees
//!  ┌─────▼─────┐
//!  │  Channel  │  (TCP, in-memory, or fault-injecting wrapper)
//!  └───────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`packet`]      — wire format (encode / validate / decode)
//! - [`reframer`]    — cutting the byte stream back into frames
//! - [`sender`]      — stop-and-wait outbound state machine
//! - [`receiver`]    — duplicate-suppressing inbound state machine
//! - [`state`]       — alternating-bit and FSM state types
//! - [`connection`]  — per-session send / receive loops
//! - [`timer`]       — retransmit timeout and retry bound
//! - [`channel`]     — the unreliable transport seam (TCP, in-memory)
//! - [`simulator`]   — loss / corruption / duplication injection

pub mod channel;
pub mod connection;
pub mod packet;
pub mod receiver;
pub mod reframer;
pub mod sender;
pub mod simulator;
pub mod state;
pub mod timer;

pub use channel::{Channel, ChannelError, MemoryChannel, Role, TcpChannel};
pub use connection::{ConnError, Connection, Protocol, RdtConfig};
pub use packet::{Packet, PacketError};
pub use reframer::{extract_frames, FrameError, Reframer};
pub use simulator::{FaultConfig, LossyChannel};
pub use timer::RetryPolicy;
