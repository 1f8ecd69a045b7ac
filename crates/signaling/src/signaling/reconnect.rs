//! Signaling channel reconnection policy
//!
//! The default policy retries forever at a fixed 3 second interval: a call is
//! short-lived, so a plain retry loop is enough. [`ReconnectPolicy::hardened`]
//! switches to jittered exponential backoff with an attempt ceiling.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Reconnection policy for the signaling channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnect attempt in milliseconds (default: 3000ms)
    pub initial_delay_ms: u64,
    /// Upper bound for the delay in milliseconds (default: 3000ms)
    pub max_delay_ms: u64,
    /// Backoff multiplier; 1.0 keeps the delay fixed (default: 1.0)
    pub multiplier: f64,
    /// Add up to 25% random jitter to each delay (default: false)
    pub jitter: bool,
    /// Maximum consecutive failed attempts, `None` for unbounded (default: None)
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::fixed(Duration::from_millis(3_000))
    }
}

impl ReconnectPolicy {
    /// Retry forever with a constant delay
    pub fn fixed(delay: Duration) -> Self {
        let ms = delay.as_millis() as u64;
        Self {
            initial_delay_ms: ms,
            max_delay_ms: ms,
            multiplier: 1.0,
            jitter: false,
            max_attempts: None,
        }
    }

    /// Jittered exponential backoff from 500ms to 30s, giving up after 10 attempts
    pub fn hardened() -> Self {
        Self {
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            jitter: true,
            max_attempts: Some(10),
        }
    }

    /// Check the policy for values that would never reconnect sensibly
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if self.multiplier < 1.0 || !self.multiplier.is_finite() {
            return Err(Error::InvalidConfig(format!(
                "reconnect multiplier must be >= 1.0, got {}",
                self.multiplier
            )));
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err(Error::InvalidConfig(format!(
                "reconnect max_delay_ms ({}) is below initial_delay_ms ({})",
                self.max_delay_ms, self.initial_delay_ms
            )));
        }
        if self.max_attempts == Some(0) {
            return Err(Error::InvalidConfig(
                "reconnect max_attempts must be at least 1 when set".to_string(),
            ));
        }
        Ok(())
    }

    /// Delay before reconnect attempt `attempt` (0-indexed)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let base_ms = (self.initial_delay_ms as f64) * self.multiplier.powi(exponent);
        let base_ms = base_ms.min(self.max_delay_ms as f64);

        let final_ms = if self.jitter && base_ms > 0.0 {
            base_ms + rand::thread_rng().gen_range(0.0..=base_ms * 0.25)
        } else {
            base_ms
        };

        Duration::from_millis(final_ms as u64)
    }

    /// Check if another attempt is allowed after `attempt` consecutive failures
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt < max)
    }
}
