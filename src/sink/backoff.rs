//! Exponential backoff for broker reconnection attempts.

use std::time::Duration;

use rand::Rng;

/// Growth factor cap; beyond this the max delay has long since won.
const MAX_SHIFT: u32 = 20;

/// Reconnect backoff configuration.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// First retry delay in milliseconds
    pub base_delay_ms: u64,
    /// Ceiling for the computed delay in milliseconds
    pub max_delay_ms: u64,
    /// Jitter factor (0.0 to 1.0); 0 keeps delays deterministic
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 60_000, // 1 minute
            jitter_factor: 0.0,
        }
    }
}

/// Backoff tracker for consecutive connection failures.
///
/// The Nth failed attempt waits `min(base * 2^(N-1), max)`, optionally
/// widened by jitter. `reset` is called after a successful connect so
/// the next outage starts from the base delay again.
pub struct ReconnectBackoff {
    config: BackoffConfig,
    attempt: u32,
}

impl ReconnectBackoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Delay before the next attempt, advancing the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);

        let factor = 1u64 << (self.attempt - 1).min(MAX_SHIFT);
        let capped = self
            .config
            .base_delay_ms
            .saturating_mul(factor)
            .min(self.config.max_delay_ms);

        // Apply jitter only if jitter_factor > 0
        let final_delay = if self.config.jitter_factor > 0.0 {
            let jitter_range = capped as f64 * self.config.jitter_factor;
            let jitter = rand::rng().random_range(-jitter_range..=jitter_range);
            (capped as f64 + jitter).max(1.0) as u64
        } else {
            capped.max(1)
        };

        Duration::from_millis(final_delay)
    }

    /// Clear the failure streak after a successful connect.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Number of consecutive failures so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}
