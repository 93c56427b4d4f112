//! Polling backoff
//!
//! After `n` consecutive failures the base interval is
//! `min(initial * multiplier^n, max)`; the returned delay is that base with
//! symmetric jitter, clamped to `max` and never shorter than the previous
//! delay. A success resets to `initial` exactly.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Largest accepted growth factor
pub const MAX_MULTIPLIER: f64 = 10.0;

/// Largest accepted delay (one day), in milliseconds
pub const MAX_INTERVAL_MS: u64 = 86_400_000;

/// Backoff settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackoffConfig {
    /// Delay after a successful fetch, in milliseconds
    #[serde(default = "default_initial_interval_ms")]
    pub initial_interval_ms: u64,

    /// Upper bound of any delay, in milliseconds
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,

    /// Growth factor per consecutive failure
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Jitter as a fraction of the base interval (0 disables it)
    #[serde(default = "default_randomization_factor")]
    pub randomization_factor: f64,
}

fn default_initial_interval_ms() -> u64 { 10_000 }
fn default_max_interval_ms() -> u64 { 60_000 }
fn default_multiplier() -> f64 { 1.5 }
fn default_randomization_factor() -> f64 { 0.5 }

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_interval_ms: default_initial_interval_ms(),
            max_interval_ms: default_max_interval_ms(),
            multiplier: default_multiplier(),
            randomization_factor: default_randomization_factor(),
        }
    }
}

impl BackoffConfig {
    pub fn initial_interval(&self) -> Duration {
        Duration::from_millis(self.initial_interval_ms)
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.initial_interval_ms == 0 {
            return Err(Error::Config("backoff.initial_interval_ms must be positive".into()));
        }
        if self.max_interval_ms < self.initial_interval_ms {
            return Err(Error::Config(
                "backoff.max_interval_ms must not be below initial_interval_ms".into(),
            ));
        }
        if self.max_interval_ms > MAX_INTERVAL_MS {
            return Err(Error::Config(format!(
                "backoff.max_interval_ms must be at most {}",
                MAX_INTERVAL_MS
            )));
        }
        if !(1.0..=MAX_MULTIPLIER).contains(&self.multiplier) {
            return Err(Error::Config(format!(
                "backoff.multiplier must be in [1, {}]",
                MAX_MULTIPLIER
            )));
        }
        if !(0.0..1.0).contains(&self.randomization_factor) {
            return Err(Error::Config(
                "backoff.randomization_factor must be in [0, 1)".into(),
            ));
        }
        Ok(())
    }
}

/// Exponential backoff with jitter
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    config: BackoffConfig,
    /// Un-jittered interval of the current failure streak
    current: Duration,
    /// Last delay handed out
    last_delay: Duration,
    failures: u32,
}

impl ExponentialBackoff {
    pub fn new(config: BackoffConfig) -> Self {
        let initial = config.initial_interval();
        Self {
            config,
            current: initial,
            last_delay: initial,
            failures: 0,
        }
    }

    /// Consecutive failures since the last success
    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    /// A fetch succeeded: back to the initial interval
    pub fn on_success(&mut self) -> Duration {
        self.failures = 0;
        self.current = self.config.initial_interval();
        self.last_delay = self.current;
        self.last_delay
    }

    /// A fetch failed: grow the interval and return the next delay
    pub fn on_failure(&mut self) -> Duration {
        let max = self.config.max_interval();
        self.failures = self.failures.saturating_add(1);
        self.current = scale(self.current, self.config.multiplier, max);

        let jittered = self.jitter(self.current, max);
        self.last_delay = jittered.max(self.last_delay);
        self.last_delay
    }

    fn jitter(&self, base: Duration, max: Duration) -> Duration {
        let factor = self.config.randomization_factor;
        if !(factor > 0.0) {
            return base;
        }
        let factor = factor.min(1.0);
        let spread: f64 = rand::thread_rng().gen_range(-factor..=factor);
        scale(base, 1.0 + spread, max)
    }
}

/// `d * factor` capped at `max`; out-of-range products give `max`
fn scale(d: Duration, factor: f64, max: Duration) -> Duration {
    Duration::try_from_secs_f64(d.as_secs_f64() * factor).map_or(max, |scaled| scaled.min(max))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(randomization_factor: f64) -> BackoffConfig {
        BackoffConfig {
            initial_interval_ms: 10_000,
            max_interval_ms: 60_000,
            multiplier: 1.5,
            randomization_factor,
        }
    }

    #[test]
    fn test_growth_without_jitter() {
        let mut b = ExponentialBackoff::new(config(0.0));
        assert_eq!(b.on_failure(), Duration::from_millis(15_000));
        assert_eq!(b.on_failure(), Duration::from_millis(22_500));
        assert_eq!(b.on_failure(), Duration::from_millis(33_750));
        assert_eq!(b.on_failure(), Duration::from_micros(50_625_000));
        assert_eq!(b.on_failure(), Duration::from_secs(60));
        assert_eq!(b.on_failure(), Duration::from_secs(60));
        assert_eq!(b.failures(), 6);
    }

    #[test]
    fn test_success_resets_to_initial() {
        let mut b = ExponentialBackoff::new(config(0.5));
        for _ in 0..4 {
            b.on_failure();
        }
        assert_eq!(b.on_success(), Duration::from_secs(10));
        assert_eq!(b.failures(), 0);
    }

    #[test]
    fn test_failures_never_shrink_and_respect_max() {
        for _ in 0..200 {
            let mut b = ExponentialBackoff::new(config(0.5));
            let mut previous = Duration::from_secs(10);
            for _ in 0..12 {
                let d = b.on_failure();
                assert!(d >= previous, "{:?} < {:?}", d, previous);
                assert!(d <= Duration::from_secs(60));
                previous = d;
            }
        }
    }

    #[test]
    fn test_third_failure_within_jitter_bounds() {
        for _ in 0..200 {
            let mut b = ExponentialBackoff::new(config(0.5));
            b.on_failure();
            b.on_failure();
            let d = b.on_failure();
            let base = 10.0 * 1.5f64.powi(3);
            assert!(d.as_secs_f64() >= base * 0.5 - 1e-6);
            assert!(d.as_secs_f64() <= (base * 1.5).min(60.0) + 1e-6);
        }
    }

    #[test]
    fn test_validate() {
        assert!(BackoffConfig::default().validate().is_ok());
        assert!(BackoffConfig { multiplier: 0.5, ..Default::default() }.validate().is_err());
        assert!(BackoffConfig { randomization_factor: 1.0, ..Default::default() }.validate().is_err());
        assert!(BackoffConfig { max_interval_ms: 1, ..Default::default() }.validate().is_err());
        assert!(BackoffConfig { initial_interval_ms: 0, ..Default::default() }.validate().is_err());
        assert!(BackoffConfig { multiplier: 1e30, ..Default::default() }.validate().is_err());
        assert!(BackoffConfig { multiplier: f64::NAN, ..Default::default() }.validate().is_err());
        assert!(BackoffConfig { max_interval_ms: u64::MAX, ..Default::default() }.validate().is_err());
        assert!(BackoffConfig { multiplier: MAX_MULTIPLIER, max_interval_ms: MAX_INTERVAL_MS, ..Default::default() }
            .validate()
            .is_ok());
    }

    #[test]
    fn test_huge_growth_saturates_at_max() {
        let huge = |randomization_factor| BackoffConfig {
            initial_interval_ms: 10_000,
            max_interval_ms: u64::MAX,
            multiplier: 1e30,
            randomization_factor,
        };
        let max = Duration::from_millis(u64::MAX);

        let mut b = ExponentialBackoff::new(huge(0.0));
        assert_eq!(b.on_failure(), max);
        assert_eq!(b.on_failure(), max);

        let mut b = ExponentialBackoff::new(huge(0.5));
        for _ in 0..5 {
            assert!(b.on_failure() <= max);
        }
        assert_eq!(b.on_success(), Duration::from_secs(10));
    }
}
