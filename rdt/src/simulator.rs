//! Fault injection for exercising the ARQ machinery.
//!
//! Real networks drop, damage and duplicate data.  [`LossyChannel`] wraps any
//! [`Channel`] and applies a configurable fault model to every `send`:
//!
//! | Fault       | Description                                             |
//! |-------------|---------------------------------------------------------|
//! | Loss        | Drop the frame with probability `loss_rate`.            |
//! | Corruption  | Overwrite 1–5 bytes after the length field.             |
//! | Duplication | Deliver the frame twice.                                |
//! | Reordering  | Hold the frame back and release it after the next one.  |
//!
//! Corruption never touches the length field: on a byte stream it is the only
//! framing information, and damaging it desynchronises the whole connection
//! instead of one frame.  The digest still covers the length.
//!
//! Reordering is available for experiments but the alternating bit cannot
//! tell apart two frames that swap places across message boundaries.
//!
//! With `seed` set, a run is fully reproducible.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::channel::{Channel, ChannelError};
use crate::packet::LENGTH_FIELD_LEN;

/// Most bytes damaged by a single corruption event.
const MAX_CORRUPT_BYTES: usize = 5;

/// Configuration for the fault-injection model.
///
/// All probabilities are in the range `[0.0, 1.0]`.
#[derive(Debug, Clone, Default)]
pub struct FaultConfig {
    /// Probability that a frame is silently dropped.
    pub loss_rate: f64,
    /// Probability that a frame is damaged.
    pub corrupt_rate: f64,
    /// Probability that a frame is sent twice.
    pub duplicate_rate: f64,
    /// Probability that a frame is held back behind the next one.
    pub reorder_rate: f64,
    /// RNG seed; `None` draws one from the OS.
    pub seed: Option<u64>,
}

impl FaultConfig {
    /// `true` when no fault can ever fire.
    pub fn is_transparent(&self) -> bool {
        self.loss_rate <= 0.0
            && self.corrupt_rate <= 0.0
            && self.duplicate_rate <= 0.0
            && self.reorder_rate <= 0.0
    }
}

/// Counters of injected faults, for assertions and logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaultStats {
    pub sent: u64,
    pub dropped: u64,
    pub corrupted: u64,
    pub duplicated: u64,
    pub reordered: u64,
}

/// A fault-injecting wrapper around another channel.
pub struct LossyChannel<C> {
    inner: C,
    config: FaultConfig,
    rng: StdRng,
    held: Option<Vec<u8>>,
    stats: FaultStats,
}

impl<C: Channel> LossyChannel<C> {
    pub fn new(inner: C, config: FaultConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            inner,
            config,
            rng,
            held: None,
            stats: FaultStats::default(),
        }
    }

    pub fn stats(&self) -> FaultStats {
        self.stats
    }

    pub fn into_inner(self) -> C {
        self.inner
    }

    fn roll(&mut self, p: f64) -> bool {
        p > 0.0 && self.rng.random_bool(p.min(1.0))
    }

    /// Damage 1–5 bytes somewhere past the length field.
    fn corrupt(&mut self, frame: &mut [u8]) {
        if frame.len() <= LENGTH_FIELD_LEN {
            return;
        }
        let start = self.rng.random_range(LENGTH_FIELD_LEN..frame.len());
        let count = self.rng.random_range(1..=MAX_CORRUPT_BYTES);
        let end = (start + count).min(frame.len());
        for byte in &mut frame[start..end] {
            *byte ^= self.rng.random_range(1..=u8::MAX);
        }
    }

    async fn release_held(&mut self) -> Result<(), ChannelError> {
        if let Some(frame) = self.held.take() {
            self.inner.send(&frame).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl<C: Channel> Channel for LossyChannel<C> {
    async fn send(&mut self, bytes: &[u8]) -> Result<(), ChannelError> {
        self.stats.sent += 1;

        if self.roll(self.config.loss_rate) {
            self.stats.dropped += 1;
            log::debug!("[sim] dropped {} bytes", bytes.len());
            return Ok(());
        }

        let mut frame = bytes.to_vec();
        if self.roll(self.config.corrupt_rate) {
            self.corrupt(&mut frame);
            self.stats.corrupted += 1;
            log::debug!("[sim] corrupted {} bytes", frame.len());
        }

        if self.held.is_none() && self.roll(self.config.reorder_rate) {
            self.stats.reordered += 1;
            log::debug!("[sim] holding back {} bytes", frame.len());
            self.held = Some(frame);
            return Ok(());
        }

        self.inner.send(&frame).await?;
        if self.roll(self.config.duplicate_rate) {
            self.stats.duplicated += 1;
            log::debug!("[sim] duplicated {} bytes", frame.len());
            self.inner.send(&frame).await?;
        }
        self.release_held().await
    }

    async fn receive(&mut self) -> Result<Vec<u8>, ChannelError> {
        // Nothing followed the held frame; let it go rather than strand it.
        self.release_held().await?;
        self.inner.receive().await
    }

    async fn disconnect(&mut self) -> Result<(), ChannelError> {
        self.release_held().await?;
        self.inner.disconnect().await
    }
}
