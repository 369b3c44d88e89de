//! Per-connection session: the stop-and-wait send and receive loops.
//!
//! A [`Connection`] owns everything that belongs to one logical peer-to-peer
//! session:
//! - the [`Channel`] it talks over,
//! - the single receive buffer ([`Reframer`]) shared by both loops,
//! - the [`Sender`] and [`Receiver`] state machines,
//! - the retransmission timer and retry bound.
//!
//! Nothing is shared between connections.  Both loops take `&mut self`, so
//! the "await ACK" loop and the "await data" loop can never interleave on the
//! receive buffer.
//!
//! ```ignore
//! let chan = TcpChannel::connect(Role::Client, "127.0.0.1", 5000, config.poll_interval).await?;
//! let mut conn = Connection::new(chan, config);
//! conn.send(b"hello").await?;
//! let reply = conn.receive_timeout(Duration::from_secs(5)).await?;
//! conn.disconnect().await?;
//! ```

use std::time::Duration;

use thiserror::Error;
use tokio::time::{timeout, Instant};

use crate::channel::{Channel, ChannelError};
use crate::packet::{control, PacketError, HEADER_LEN};
use crate::receiver::{Receiver, ReceiverEvent};
use crate::reframer::{FrameError, Reframer, DEFAULT_MAX_FRAME_LEN};
use crate::sender::{RetransmitReason, Sender, SenderEvent};
use crate::state::{ReceiverState, SenderState};
use crate::timer::{RetransmitTimer, RetryPolicy};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Which transfer discipline a connection speaks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum Protocol {
    /// rdt 1.0: one frame per message, no acknowledgements, no retransmission.
    /// Corrupt frames are dropped and nothing is deduplicated.
    #[value(name = "1.0")]
    Unreliable,
    /// rdt 2.1: alternating-bit stop-and-wait with ACK/NAK.
    #[default]
    #[value(name = "2.1")]
    AlternatingBit,
}

/// Tunables for one connection.
#[derive(Debug, Clone)]
pub struct RdtConfig {
    pub protocol: Protocol,
    pub retry: RetryPolicy,
    /// How long a channel read waits before reporting "nothing yet".
    pub poll_interval: Duration,
    /// Largest plausible frame; anything larger is treated as malformed.
    pub max_frame_len: usize,
    /// Grace period spent answering retransmissions before disconnecting.
    pub linger: Duration,
}

impl Default for RdtConfig {
    fn default() -> Self {
        Self {
            protocol: Protocol::default(),
            retry: RetryPolicy::default(),
            poll_interval: Duration::from_millis(100),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            linger: Duration::from_secs(2),
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors surfaced to the application.
///
/// Corrupt frames and sequence mismatches never appear here; they are
/// absorbed by retransmission inside the loops.
#[derive(Debug, Error)]
pub enum ConnError {
    #[error(transparent)]
    Channel(#[from] ChannelError),
    /// The byte stream lost framing; the connection is unusable.
    #[error("malformed frame: {0}")]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Packet(#[from] PacketError),
    /// The retry bound was exhausted while awaiting an acknowledgement.
    #[error("delivery failed after {attempts} transmissions")]
    DeliveryFailure { attempts: u32 },
    /// Application payloads may not collide with the control vocabulary.
    #[error("payload {0:?} is reserved for control frames")]
    ReservedPayload(String),
    /// The encoded frame would exceed the peer's frame limit.
    #[error("message of {len} bytes exceeds the {max}-byte frame limit once framed")]
    MessageTooLarge { len: usize, max: usize },
    #[error("timed out waiting for a message")]
    Timeout,
    /// An earlier fatal error left the connection in an unknown state.
    #[error("connection failed earlier and can no longer be used")]
    Failed,
}

impl ConnError {
    /// Errors after which the two ends may disagree on sequence state or
    /// framing, so no later message could be delivered correctly.
    fn is_fatal(&self) -> bool {
        matches!(
            self,
            ConnError::DeliveryFailure { .. } | ConnError::Frame(_) | ConnError::Channel(_)
        )
    }
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// A reliable, message-oriented session over an unreliable [`Channel`].
pub struct Connection<C> {
    channel: C,
    reframer: Reframer,
    pub sender: Sender,
    pub receiver: Receiver,
    timer: RetransmitTimer,
    config: RdtConfig,
    failed: bool,
}

impl<C: Channel> Connection<C> {
    pub fn new(channel: C, config: RdtConfig) -> Self {
        Self {
            channel,
            reframer: Reframer::new(config.max_frame_len),
            sender: Sender::new(),
            receiver: Receiver::new(),
            timer: RetransmitTimer::new(config.retry),
            config,
            failed: false,
        }
    }

    pub fn sender_state(&self) -> SenderState {
        self.sender.state()
    }

    pub fn receiver_state(&self) -> ReceiverState {
        self.receiver.state()
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn config(&self) -> &RdtConfig {
        &self.config
    }

    /// `true` once a fatal error has made the connection unusable.
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    fn ensure_usable(&self) -> Result<(), ConnError> {
        if self.failed {
            return Err(ConnError::Failed);
        }
        Ok(())
    }

    fn note_outcome<T>(&mut self, result: Result<T, ConnError>) -> Result<T, ConnError> {
        if let Err(e) = &result {
            if e.is_fatal() {
                log::warn!("[rdt] {e}; connection unusable");
                self.failed = true;
            }
        }
        result
    }

    // -----------------------------------------------------------------------
    // Send side
    // -----------------------------------------------------------------------

    /// Deliver `message` to the peer, blocking until it is acknowledged.
    ///
    /// Retransmits on corrupt responses, NAKs, stale ACKs and timeouts.
    /// Data frames the peer sends meanwhile are acknowledged and queued for
    /// the next [`receive`](Self::receive).
    ///
    /// Under [`Protocol::Unreliable`] the frame is sent once and `send`
    /// returns immediately.
    ///
    /// A [`ConnError::DeliveryFailure`] is terminal: the peer may or may not
    /// hold the message, so every later call fails with [`ConnError::Failed`].
    pub async fn send(&mut self, message: &[u8]) -> Result<(), ConnError> {
        self.ensure_usable()?;
        if control::is_reserved(message) {
            return Err(ConnError::ReservedPayload(
                String::from_utf8_lossy(message).into_owned(),
            ));
        }
        if HEADER_LEN + message.len() > self.config.max_frame_len {
            return Err(ConnError::MessageTooLarge {
                len: HEADER_LEN + message.len(),
                max: self.config.max_frame_len,
            });
        }

        let result = match self.config.protocol {
            Protocol::Unreliable => self.send_unacknowledged(message).await,
            Protocol::AlternatingBit => self.send_reliable(message).await,
        };
        self.note_outcome(result)
    }

    async fn send_unacknowledged(&mut self, message: &[u8]) -> Result<(), ConnError> {
        let (seq, frame) = self.sender.datagram(message)?;
        self.channel.send(&frame).await?;
        log::debug!("[rdt] → DATA seq={seq} len={} (unacknowledged)", message.len());
        Ok(())
    }

    async fn send_reliable(&mut self, message: &[u8]) -> Result<(), ConnError> {
        let frame = self.sender.begin(message)?;
        if let Err(e) = self.channel.send(&frame).await {
            self.sender.abandon();
            return Err(e.into());
        }
        log::debug!(
            "[rdt] → DATA seq={} len={} ({})",
            self.sender.next_seq,
            message.len(),
            self.sender.state()
        );

        let result = self.await_ack().await;
        if result.is_err() {
            self.sender.abandon();
        }
        result
    }

    async fn await_ack(&mut self) -> Result<(), ConnError> {
        let mut retries = 0u32;
        let mut deadline = Instant::now() + self.timer.timeout();

        loop {
            while let Some(raw) = self.reframer.next_frame()? {
                let first_send = self
                    .sender
                    .outstanding()
                    .filter(|f| f.tx_count == 1)
                    .map(|f| f.sent_at);

                match self.sender.on_frame(&raw) {
                    SenderEvent::Complete => {
                        log::debug!("[rdt] ← ACK seq={}; delivered", self.sender.next_seq.flip());
                        match first_send {
                            Some(sent_at) => self.timer.record_rtt_sample(sent_at.elapsed()),
                            None => self.timer.reset(),
                        }
                        return Ok(());
                    }
                    SenderEvent::Retransmit(reason) => {
                        self.retransmit(reason, &mut retries).await?;
                        deadline = Instant::now() + self.timer.timeout();
                    }
                    SenderEvent::Resync(packet) => {
                        log::debug!("[rdt] ← DATA seq={} while awaiting ACK; resyncing", packet.seq);
                        let event = self.receiver.on_packet(packet);
                        self.answer(event).await?;
                        self.retransmit_outstanding(&mut retries).await?;
                        deadline = Instant::now() + self.timer.timeout();
                    }
                    SenderEvent::Ignored => {}
                }
            }

            let now = Instant::now();
            if now >= deadline {
                self.timer.back_off();
                self.retransmit(RetransmitReason::Timeout, &mut retries).await?;
                deadline = Instant::now() + self.timer.timeout();
                continue;
            }

            if let Ok(bytes) = timeout(deadline - now, self.channel.receive()).await {
                self.reframer.push(&bytes?);
            }
        }
    }

    async fn retransmit(&mut self, reason: RetransmitReason, retries: &mut u32) -> Result<(), ConnError> {
        log::debug!("[rdt] {reason:?}; retransmitting");
        self.retransmit_outstanding(retries).await
    }

    async fn retransmit_outstanding(&mut self, retries: &mut u32) -> Result<(), ConnError> {
        *retries += 1;
        if self.config.retry.exhausted(*retries) {
            let attempts = self.sender.transmit_count();
            log::warn!("[rdt] giving up after {attempts} transmissions");
            return Err(ConnError::DeliveryFailure { attempts });
        }
        if let Some(frame) = self.sender.outstanding() {
            self.channel.send(&frame.bytes).await?;
            log::debug!("[rdt] → DATA seq={} (attempt {})", frame.seq, frame.tx_count + 1);
        }
        self.sender.on_retransmit();
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Receive side
    // -----------------------------------------------------------------------

    /// Run one receive cycle: read the channel once and process every
    /// complete frame.
    ///
    /// Returns the concatenation of newly delivered messages, or `None` when
    /// nothing new arrived.  Duplicates are re-acknowledged but not returned.
    pub async fn receive(&mut self) -> Result<Option<Vec<u8>>, ConnError> {
        self.ensure_usable()?;
        if !self.receiver.has_delivered() {
            let result = self.read_once().await;
            self.note_outcome(result)?;
        }
        Ok(self.receiver.take_delivered())
    }

    async fn read_once(&mut self) -> Result<(), ConnError> {
        let bytes = self.channel.receive().await?;
        self.reframer.push(&bytes);
        self.process_inbound().await
    }

    /// Repeat [`receive`](Self::receive) until a message arrives or `limit`
    /// elapses.
    pub async fn receive_timeout(&mut self, limit: Duration) -> Result<Vec<u8>, ConnError> {
        let wait = async {
            loop {
                if let Some(message) = self.receive().await? {
                    return Ok::<_, ConnError>(message);
                }
            }
        };
        timeout(limit, wait).await.map_err(|_| ConnError::Timeout)?
    }

    /// Keep answering the peer for `period`, so that a peer whose last ACK
    /// was lost can still complete its send.  New messages are queued for
    /// [`receive`](Self::receive).  Returns early if the peer disconnects.
    pub async fn linger(&mut self, period: Duration) -> Result<(), ConnError> {
        self.ensure_usable()?;
        let result = self.service_until(Instant::now() + period).await;
        self.note_outcome(result)
    }

    async fn service_until(&mut self, deadline: Instant) -> Result<(), ConnError> {
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            match timeout(deadline - now, self.channel.receive()).await {
                Err(_elapsed) => return Ok(()),
                Ok(Err(ChannelError::Closed)) => {
                    log::debug!("[rdt] peer closed while lingering");
                    return Ok(());
                }
                Ok(Err(e)) => return Err(e.into()),
                Ok(Ok(bytes)) => {
                    self.reframer.push(&bytes);
                    self.process_inbound().await?;
                }
            }
        }
    }

    /// Close the underlying channel.
    pub async fn disconnect(mut self) -> Result<(), ConnError> {
        self.channel.disconnect().await?;
        Ok(())
    }

    async fn process_inbound(&mut self) -> Result<(), ConnError> {
        loop {
            let Some(raw) = self.reframer.next_frame()? else {
                return Ok(());
            };
            match self.config.protocol {
                Protocol::AlternatingBit => {
                    let event = self.receiver.on_frame(&raw);
                    self.answer(event).await?;
                }
                Protocol::Unreliable => match self.receiver.on_datagram(&raw) {
                    Ok(seq) => log::debug!("[rdt] ← DATA seq={seq} (unacknowledged)"),
                    Err(e) => log::debug!("[rdt] ← {e}; dropped"),
                },
            }
        }
    }

    /// Put the receiver's reply, if any, on the channel.
    async fn answer(&mut self, event: ReceiverEvent) -> Result<(), ConnError> {
        match &event {
            ReceiverEvent::Delivered { reply } => {
                log::debug!("[rdt] ← DATA seq={} new; → ACK", reply.seq)
            }
            ReceiverEvent::Duplicate { reply } => {
                log::debug!("[rdt] ← DATA seq={} duplicate; → ACK", reply.seq)
            }
            ReceiverEvent::Corrupt { reply } => {
                log::debug!("[rdt] ← corrupt frame; → NAK seq={}", reply.seq)
            }
            ReceiverEvent::Ignored => log::debug!("[rdt] ← stale control frame dropped"),
        }
        if let Some(reply) = event.reply() {
            self.channel.send(&reply.encode()?).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MemoryChannel;
    use crate::packet::Packet;

    const POLL: Duration = Duration::from_millis(10);

    fn config() -> RdtConfig {
        RdtConfig {
            retry: RetryPolicy {
                initial_timeout: Duration::from_millis(50),
                min_timeout: Duration::from_millis(20),
                max_timeout: Duration::from_millis(200),
                max_retries: 4,
            },
            poll_interval: POLL,
            linger: Duration::from_millis(100),
            ..Default::default()
        }
    }

    /// Read raw frames off `chan` until `n` complete frames have arrived.
    async fn read_frames(chan: &mut MemoryChannel, n: usize) -> Vec<Packet> {
        let mut r = Reframer::default();
        let mut out = Vec::new();
        while out.len() < n {
            r.push(&chan.receive().await.unwrap());
            for raw in r.drain_frames().unwrap() {
                out.push(Packet::decode(&raw).unwrap());
            }
        }
        out
    }

    #[tokio::test]
    async fn reserved_payload_is_rejected() {
        let (a, _b) = MemoryChannel::pair(POLL);
        let mut conn = Connection::new(a, config());
        assert!(matches!(conn.send(b"ACK").await, Err(ConnError::ReservedPayload(_))));
        assert_eq!(conn.sender_state(), SenderState::Idle);
    }

    #[tokio::test]
    async fn hello_scenario_against_scripted_peer() {
        let (a, mut peer) = MemoryChannel::pair(POLL);
        let mut conn = Connection::new(a, config());

        let hello = Packet::data(0, b"HELLO").encode().unwrap();
        peer.send(&hello).await.unwrap();
        assert_eq!(conn.receive_timeout(Duration::from_secs(1)).await.unwrap(), b"HELLO");
        assert_eq!(read_frames(&mut peer, 1).await, vec![Packet::ack(0)]);

        peer.send(&hello).await.unwrap();
        assert_eq!(conn.receive().await.unwrap(), None);
        assert_eq!(read_frames(&mut peer, 1).await, vec![Packet::ack(0)]);
    }

    #[tokio::test]
    async fn nak_then_ack_completes_send() {
        let (a, mut peer) = MemoryChannel::pair(POLL);
        let mut conn = Connection::new(a, config());

        let script = tokio::spawn(async move {
            let first = read_frames(&mut peer, 1).await;
            assert_eq!(first[0], Packet::data(0, b"msg"));
            peer.send(&Packet::nak(0).encode().unwrap()).await.unwrap();
            let again = read_frames(&mut peer, 1).await;
            assert_eq!(again[0], first[0]);
            peer.send(&Packet::ack(0).encode().unwrap()).await.unwrap();
            peer
        });

        conn.send(b"msg").await.unwrap();
        assert_eq!(conn.sender.next_seq.as_u64(), 1);
        script.await.unwrap();
    }

    #[tokio::test]
    async fn silent_peer_causes_delivery_failure() {
        let (a, _peer) = MemoryChannel::pair(POLL);
        let mut conn = Connection::new(a, config());
        match conn.send(b"into the void").await {
            Err(ConnError::DeliveryFailure { attempts }) => assert_eq!(attempts, 5),
            other => panic!("expected DeliveryFailure, got {other:?}"),
        }
        assert_eq!(conn.sender_state(), SenderState::Idle);
        assert!(conn.is_failed());
        assert!(matches!(conn.send(b"again").await, Err(ConnError::Failed)));
        assert!(matches!(conn.receive().await, Err(ConnError::Failed)));
    }

    #[tokio::test]
    async fn oversized_message_is_rejected_before_sending() {
        let (a, mut peer) = MemoryChannel::pair(POLL);
        let mut conn = Connection::new(
            a,
            RdtConfig {
                max_frame_len: 64,
                ..config()
            },
        );

        match conn.send(&[b'x'; 13]).await {
            Err(ConnError::MessageTooLarge { len, max }) => assert_eq!((len, max), (65, 64)),
            other => panic!("expected MessageTooLarge, got {other:?}"),
        }
        assert_eq!(conn.sender_state(), SenderState::Idle);
        assert!(!conn.is_failed());
        assert!(peer.receive().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unreliable_mode_neither_waits_nor_replies() {
        let (a, mut peer) = MemoryChannel::pair(POLL);
        let mut conn = Connection::new(
            a,
            RdtConfig {
                protocol: Protocol::Unreliable,
                ..config()
            },
        );

        // Nobody ACKs, yet both sends return at once.
        conn.send(b"one").await.unwrap();
        conn.send(b"two").await.unwrap();
        assert_eq!(
            read_frames(&mut peer, 2).await,
            vec![Packet::data(0, b"one"), Packet::data(1, b"two")]
        );

        let mut damaged = Packet::data(2, b"lost").encode().unwrap();
        let last = damaged.len() - 1;
        damaged[last] ^= 0x01;
        peer.send(&Packet::data(5, b"x").encode().unwrap()).await.unwrap();
        peer.send(&damaged).await.unwrap();
        peer.send(&Packet::data(5, b"y").encode().unwrap()).await.unwrap();

        let mut got = Vec::new();
        while got.len() < 2 {
            if let Some(chunk) = conn.receive().await.unwrap() {
                got.extend(chunk);
            }
        }
        assert_eq!(got, b"xy");
        assert!(peer.receive().await.unwrap().is_empty(), "no ACK/NAK in 1.0 mode");
    }

    #[tokio::test]
    async fn malformed_length_is_fatal() {
        let (a, mut peer) = MemoryChannel::pair(POLL);
        let mut conn = Connection::new(a, config());
        peer.send(b"0000000003garbage").await.unwrap();
        assert!(matches!(
            conn.receive().await,
            Err(ConnError::Frame(FrameError::TooShort(3)))
        ));
        assert!(matches!(conn.receive().await, Err(ConnError::Failed)));
    }
}
