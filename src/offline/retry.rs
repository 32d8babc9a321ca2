//! # Retry Policy and Backoff
//!
//! Decides whether a failed action is retried and how long to wait first.
//!
//! ## Features
//!
//! - **Bounded Attempts**: no retry once `attempts >= max_attempts`
//! - **Exponential Backoff**: `base * 2^attempts`, capped at `max_delay`
//! - **Jitter**: ±`jitter` fraction so reconnect bursts spread out
//! - **Permanent Short-Circuit**: permanent errors are never retried
//!
//! The delay is a function of `action.attempts` alone. The jitter source is
//! injectable so tests can pin it with a seed or turn it off.
//!
//! ## Usage
//!
//! ```rust
//! use doublecheck_sync::offline::retry::{Jitter, RetryPolicy};
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::new(3, Duration::from_secs(1), Duration::from_secs(30))
//!     .with_jitter(0.2, Jitter::Seeded(7));
//! assert_eq!(policy.max_attempts(), 3);
//! ```

use crate::offline::action::PendingAction;
use crate::shared::config::SyncConfig;
use crate::shared::error::ExecutorError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;
use std::time::Duration;

/// Randomness source for backoff jitter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Jitter {
    /// No jitter; delays are exact
    None,
    /// Deterministic sequence from a seed
    Seeded(u64),
    /// Entropy-seeded
    Random,
}

/// Retry eligibility and backoff calculation
#[derive(Debug)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter_fraction: f64,
    rng: Option<Mutex<StdRng>>,
}

impl RetryPolicy {
    /// Policy without jitter
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            jitter_fraction: 0.0,
            rng: None,
        }
    }

    /// Policy described by `config`, with entropy-seeded jitter
    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        )
        .with_jitter(config.jitter, Jitter::Random)
    }

    /// Set the jitter fraction and source
    pub fn with_jitter(mut self, fraction: f64, source: Jitter) -> Self {
        self.jitter_fraction = fraction.clamp(0.0, 1.0);
        self.rng = match source {
            Jitter::None => None,
            Jitter::Seeded(seed) => Some(Mutex::new(StdRng::seed_from_u64(seed))),
            Jitter::Random => Some(Mutex::new(StdRng::from_entropy())),
        };
        self
    }

    /// Attempts allowed before an action is marked failed
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether another attempt is allowed
    pub fn should_retry(&self, action: &PendingAction) -> bool {
        action.attempts < self.max_attempts
    }

    /// Whether an action that just failed with `error` gets another attempt
    pub fn should_retry_after(&self, action: &PendingAction, error: &ExecutorError) -> bool {
        error.is_transient() && self.should_retry(action)
    }

    /// Delay before the next attempt of `action`
    pub fn next_delay(&self, action: &PendingAction) -> Duration {
        let exponent = action.attempts.min(31);
        let raw = self.base_delay.saturating_mul(1u32 << exponent);
        let capped = raw.min(self.max_delay);

        let Some(rng) = &self.rng else {
            return capped;
        };
        if self.jitter_fraction == 0.0 {
            return capped;
        }

        let factor = {
            let mut rng = rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            rng.gen_range(-self.jitter_fraction..=self.jitter_fraction)
        };
        capped.mul_f64(1.0 + factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}
