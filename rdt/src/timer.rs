//! Retransmission timing and the retry bound.
//!
//! An unanswered data frame is resent when the per-attempt timeout expires.
//! The timeout starts at [`RetryPolicy::initial_timeout`], doubles on every
//! consecutive expiry up to [`RetryPolicy::max_timeout`], and is re-derived
//! from measured round trips (RFC 6298 smoothing, Karn's rule: only frames
//! acknowledged on their first transmission are sampled).
//!
//! Every retransmission, whatever its cause, counts against
//! [`RetryPolicy::max_retries`]; past that the send fails with
//! [`crate::connection::ConnError::DeliveryFailure`].

use std::time::Duration;

/// Timeout and retry parameters for one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Per-attempt timeout before any RTT sample is available.
    pub initial_timeout: Duration,
    /// Lower bound for a timeout derived from RTT samples.
    pub min_timeout: Duration,
    /// Ceiling for exponential back-off.
    pub max_timeout: Duration,
    /// Retransmissions allowed per message before giving up.
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_timeout: Duration::from_millis(1000),
            min_timeout: Duration::from_millis(50),
            max_timeout: Duration::from_secs(8),
            max_retries: 16,
        }
    }
}

impl RetryPolicy {
    /// `true` once `retries` retransmissions exceed the bound.
    pub fn exhausted(&self, retries: u32) -> bool {
        retries > self.max_retries
    }
}

/// Per-connection retransmission timer state.
#[derive(Debug, Clone)]
pub struct RetransmitTimer {
    pub policy: RetryPolicy,
    current: Duration,
    srtt: Option<Duration>,
    rttvar: Duration,
}

impl RetransmitTimer {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            current: policy.initial_timeout,
            srtt: None,
            rttvar: Duration::ZERO,
        }
    }

    /// Timeout to apply to the next wait for a response.
    pub fn timeout(&self) -> Duration {
        self.current
    }

    /// Double the timeout after an expiry, capped at `max_timeout`.
    pub fn back_off(&mut self) {
        self.current = (self.current * 2).min(self.policy.max_timeout);
    }

    /// Feed a round-trip measurement and recompute the timeout.
    pub fn record_rtt_sample(&mut self, sample: Duration) {
        match self.srtt {
            None => {
                self.srtt = Some(sample);
                self.rttvar = sample / 2;
            }
            Some(srtt) => {
                self.rttvar = self.rttvar * 3 / 4 + sample.abs_diff(srtt) / 4;
                self.srtt = Some(srtt * 7 / 8 + sample / 8);
            }
        }
        self.reset();
    }

    /// Drop any back-off and return to the estimate-derived timeout.
    pub fn reset(&mut self) {
        self.current = match self.srtt {
            Some(srtt) => (srtt + self.rttvar * 4)
                .clamp(self.policy.min_timeout, self.policy.max_timeout),
            None => self.policy.initial_timeout,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            initial_timeout: Duration::from_millis(100),
            min_timeout: Duration::from_millis(10),
            max_timeout: Duration::from_millis(500),
            max_retries: 3,
        }
    }

    #[test]
    fn starts_at_initial_timeout() {
        assert_eq!(RetransmitTimer::new(policy()).timeout(), Duration::from_millis(100));
    }

    #[test]
    fn back_off_doubles_and_caps() {
        let mut t = RetransmitTimer::new(policy());
        t.back_off();
        assert_eq!(t.timeout(), Duration::from_millis(200));
        t.back_off();
        t.back_off();
        t.back_off();
        assert_eq!(t.timeout(), Duration::from_millis(500));
        t.reset();
        assert_eq!(t.timeout(), Duration::from_millis(100));
    }

    #[test]
    fn first_sample_sets_estimate() {
        let mut t = RetransmitTimer::new(policy());
        t.record_rtt_sample(Duration::from_millis(20));
        // 20 + 4 * 10
        assert_eq!(t.timeout(), Duration::from_millis(60));
    }

    #[test]
    fn tiny_samples_respect_floor() {
        let mut t = RetransmitTimer::new(policy());
        t.record_rtt_sample(Duration::from_micros(10));
        assert_eq!(t.timeout(), Duration::from_millis(10));
    }

    #[test]
    fn retry_bound() {
        let p = policy();
        assert!(!p.exhausted(3));
        assert!(p.exhausted(4));
    }
}
