//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

use crate::error::{Result, VigilError};

/// Backoff policy parameters.
#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    /// Successful delays handed out before the producer is exhausted.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Growth factor per attempt; must be >= 1.
    pub multiplier: f64,
    /// Jitter fraction in [0, 1]; each delay is scaled by a uniform draw
    /// from `[1 - jitter, 1 + jitter]`.
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        BackoffConfig {
            max_retries: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl BackoffConfig {
    pub fn validate(&self) -> Result<()> {
        if self.multiplier < 1.0 {
            return Err(VigilError::InvalidConfig(format!(
                "backoff multiplier must be >= 1, got {}",
                self.multiplier
            )));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(VigilError::InvalidConfig(format!(
                "backoff jitter must be within [0, 1], got {}",
                self.jitter
            )));
        }
        Ok(())
    }
}

/// Stateful producer of retry delays.
#[derive(Debug)]
pub struct Backoff {
    config: BackoffConfig,
    attempts: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Backoff {
            config,
            attempts: 0,
        }
    }

    /// The next delay, or `None` once the retry budget is spent.
    ///
    /// Attempt `n` (0-based) waits `min(max, initial * multiplier^n)`
    /// scaled by the jitter draw; the base is monotone non-decreasing
    /// until it saturates at `max_delay`.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.config.max_retries {
            return None;
        }
        let n = self.attempts;
        self.attempts += 1;

        let base = (self.config.initial_delay.as_secs_f64()
            * self.config.multiplier.powi(n as i32))
        .min(self.config.max_delay.as_secs_f64());

        let factor = if self.config.jitter > 0.0 {
            let mut rng = rand::rng();
            rng.random_range((1.0 - self.config.jitter)..=(1.0 + self.config.jitter))
        } else {
            1.0
        };

        Some(Duration::from_secs_f64(base * factor))
    }

    /// Delays handed out since construction or the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jitterless(max_retries: u32) -> Backoff {
        Backoff::new(BackoffConfig {
            max_retries,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(3600),
            multiplier: 2.0,
            jitter: 0.0,
        })
    }

    #[test]
    fn test_jitterless_series_doubles() {
        let mut backoff = jitterless(10);
        let series: Vec<u64> = (0..5)
            .map(|_| backoff.next_delay().unwrap().as_secs())
            .collect();
        assert_eq!(series, vec![1, 2, 4, 8, 16]);
        assert_eq!(backoff.attempts(), 5);
    }

    #[test]
    fn test_exhaustion_after_max_retries() {
        let mut backoff = jitterless(3);
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_none());
        assert!(backoff.next_delay().is_none());
        assert_eq!(backoff.attempts(), 3);
    }

    #[test]
    fn test_base_saturates_at_max_delay() {
        let mut backoff = Backoff::new(BackoffConfig {
            max_retries: 10,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: 0.0,
        });
        let series: Vec<u64> = (0..6)
            .map(|_| backoff.next_delay().unwrap().as_secs())
            .collect();
        assert_eq!(series, vec![1, 2, 4, 5, 5, 5]);
    }

    #[test]
    fn test_jitter_bounds() {
        let config = BackoffConfig {
            max_retries: 100,
            initial_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(10),
            multiplier: 1.0,
            jitter: 0.5,
        };
        let mut backoff = Backoff::new(config);
        for _ in 0..100 {
            let d = backoff.next_delay().unwrap().as_secs_f64();
            assert!((5.0..=15.0).contains(&d), "delay {d} out of jitter bounds");
        }
    }

    #[test]
    fn test_reset_restarts_the_series() {
        let mut backoff = jitterless(3);
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.next_delay().unwrap().as_secs(), 1);
    }

    #[test]
    fn test_validate_rejects_bad_config() {
        let bad_multiplier = BackoffConfig {
            multiplier: 0.5,
            ..BackoffConfig::default()
        };
        assert!(bad_multiplier.validate().is_err());

        let bad_jitter = BackoffConfig {
            jitter: 1.5,
            ..BackoffConfig::default()
        };
        assert!(bad_jitter.validate().is_err());

        assert!(BackoffConfig::default().validate().is_ok());
    }
}
