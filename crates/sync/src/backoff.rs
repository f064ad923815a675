//! Exponential backoff with jitter for entity pollers.
//!
//! A healthy poller waits its configured interval between cycles. After
//! consecutive failures the wait grows geometrically, gets a random
//! jitter so sources do not retry in lockstep, and is capped at
//! [`BackoffConfig::max_delay`]. The first success resets it.

use std::time::Duration;

use rand::Rng;

/// Tunable parameters for the backoff strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Factor by which the delay grows after each consecutive failure.
    pub multiplier: f64,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Relative jitter: the delay is scaled by a random factor in
    /// `1 - jitter ..= 1 + jitter`.
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            jitter: 0.2,
        }
    }
}

/// Delay before the next attempt, without jitter.
///
/// `interval * multiplier^failures`, clamped to the cap. The cap is never
/// below `interval` itself.
pub fn next_delay(interval: Duration, consecutive_failures: u32, config: &BackoffConfig) -> Duration {
    let cap = config.max_delay.max(interval);
    if consecutive_failures == 0 {
        return interval;
    }
    let exponent = consecutive_failures.min(32) as i32;
    let scaled_ms = interval.as_millis() as f64 * config.multiplier.max(1.0).powi(exponent);
    Duration::from_millis(scaled_ms.min(cap.as_millis() as f64) as u64).min(cap)
}

/// Scale `delay` by a random factor within the configured jitter, clamped
/// to `[0, cap]`.
pub fn apply_jitter<R: Rng>(
    delay: Duration,
    cap: Duration,
    config: &BackoffConfig,
    rng: &mut R,
) -> Duration {
    let jitter = config.jitter.clamp(0.0, 1.0);
    if jitter == 0.0 {
        return delay.min(cap);
    }
    let factor = rng.random_range(1.0 - jitter..=1.0 + jitter);
    Duration::from_secs_f64(delay.as_secs_f64() * factor).min(cap)
}

/// Per-poller backoff state.
#[derive(Debug, Clone)]
pub struct Backoff {
    interval: Duration,
    config: BackoffConfig,
    consecutive_failures: u32,
}

impl Backoff {
    pub fn new(interval: Duration, config: BackoffConfig) -> Self {
        Self {
            interval,
            config,
            consecutive_failures: 0,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    /// Returns the new consecutive failure count.
    pub fn record_failure(&mut self) -> u32 {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_failures
    }

    /// How long to wait before the next cycle.
    ///
    /// Healthy pollers get their exact interval; jitter applies only while
    /// backing off.
    pub fn delay(&self) -> Duration {
        let base = next_delay(self.interval, self.consecutive_failures, &self.config);
        if self.consecutive_failures == 0 {
            return base;
        }
        let cap = self.config.max_delay.max(self.interval);
        apply_jitter(base, cap, &self.config, &mut rand::rng())
    }
}
