//! Linear, capped backoff shared by job retries and broker reconnects.
//!
//! ```text
//! delay(k) = min(k * base, cap)        k = attempt number, 1-based
//!
//! base = 500ms, cap = 2s:   k=1 500ms | k=2 1s | k=3 1.5s | k>=4 2s
//! ```
//!
//! Jitter is optional and only ever shortens a delay, so the cap holds and
//! the un-jittered sequence stays monotonically non-decreasing.

use std::time::Duration;

/// Linear backoff policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearBackoff {
    base: Duration,
    cap: Duration,
    /// Fraction of the delay that may be shaved off at random, in [0, 1]
    jitter: f64,
}

impl LinearBackoff {
    pub const DEFAULT_BASE: Duration = Duration::from_millis(500);
    pub const DEFAULT_CAP: Duration = Duration::from_millis(2000);

    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            jitter: 0.0,
        }
    }

    /// Set the jitter ratio (clamped to [0, 1]).
    pub fn with_jitter(mut self, ratio: f64) -> Self {
        self.jitter = if ratio.is_finite() {
            ratio.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn cap(&self) -> Duration {
        self.cap
    }

    /// Deterministic delay for the given attempt.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base.saturating_mul(attempt).min(self.cap)
    }

    /// Delay with jitter applied.
    pub fn delay_with_jitter(&self, attempt: u32) -> Duration {
        let delay = self.delay(attempt);
        if self.jitter == 0.0 {
            return delay;
        }
        let shave = self.jitter * rand::random::<f64>();
        delay.mul_f64(1.0 - shave)
    }
}

impl Default for LinearBackoff {
    fn default() -> Self {
        Self::new(Self::DEFAULT_BASE, Self::DEFAULT_CAP)
    }
}
