//! Retry policy with exponential, jittered backoff.

use rand::Rng;
use std::time::Duration;

/// How connection failures are retried
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    /// Fractional jitter window, e.g. 0.2 for +/-20%
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(100),
            multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Un-jittered delay before retry number `retry` (1-based). Saturates at
    /// `Duration::MAX` when the product does not fit.
    pub fn nominal_delay(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
        let factor = self.multiplier.max(1.0).powi(exponent);
        saturating_secs(self.base_delay.as_secs_f64() * factor)
    }

    /// Delay before retry number `retry` (1-based), jittered within the window.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let nominal = self.nominal_delay(retry);
        let jitter = self.jitter.clamp(0.0, 0.99);
        if jitter == 0.0 || nominal.is_zero() || nominal == Duration::MAX {
            return nominal;
        }
        let factor = rand::thread_rng().gen_range((1.0 - jitter)..=(1.0 + jitter));
        saturating_secs(nominal.as_secs_f64() * factor)
    }
}

fn saturating_secs(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(if secs.is_nan() {
        Duration::ZERO
    } else {
        Duration::MAX
    })
}
