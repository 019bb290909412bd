//! Bounded exponential backoff for broker reconnection.
//!
//! `delay[n] = min(initial * multiplier^(n-1), max)`, for at most
//! `max_attempts` consecutive attempts. A successful connect-ack resets it.

use std::time::Duration;

use thiserror::Error;

use nichoir_core::config::ReconnectConfig;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BackoffError {
    #[error("Reconnection gave up after {0} attempts")]
    Exhausted(u32),
}

#[derive(Debug, Clone)]
pub struct Backoff {
    initial_delay: Duration,
    current_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    attempt: u32,
    max_attempts: u32,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, multiplier: f64, max_attempts: u32) -> Self {
        Self {
            initial_delay: initial,
            current_delay: initial,
            max_delay: max.max(initial),
            multiplier: multiplier.max(1.0),
            attempt: 0,
            max_attempts,
        }
    }

    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self::new(
            Duration::from_millis(config.initial_delay_ms),
            Duration::from_millis(config.max_delay_ms),
            config.multiplier,
            config.max_attempts,
        )
    }

    /// Delay before the next attempt, or `Exhausted` once the budget is spent.
    pub fn next_sleep(&mut self) -> Result<Duration, BackoffError> {
        if self.attempt >= self.max_attempts {
            return Err(BackoffError::Exhausted(self.max_attempts));
        }
        self.attempt += 1;

        let sleep = self.current_delay;
        // Cap in f64 first; an unbounded product would not fit a Duration.
        let next = (self.current_delay.as_secs_f64() * self.multiplier)
            .min(self.max_delay.as_secs_f64());
        self.current_delay = Duration::try_from_secs_f64(next)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);
        Ok(sleep)
    }

    pub fn reset(&mut self) {
        self.current_delay = self.initial_delay;
        self.attempt = 0;
    }

    /// Attempts consumed since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::from_config(&ReconnectConfig::default())
    }
}
