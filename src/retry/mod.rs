//! Retry policies for conflict-safe writes
//!
//! A policy answers one question: after `attempt` conflicting attempts, how
//! long to wait before the next one, or whether to give up. The write loop
//! itself never changes when the policy does.


use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::BackoffPolicy;
use crate::BackoffStrategy;

/// Strategy consulted by [`crate::ConflictSafeWriter`] after each conflict.
pub trait RetryPolicy: Debug + Send + Sync {
    /// `attempt` is the 1-based number of the attempt that just conflicted.
    /// Returns the delay before the next attempt, or `None` to give up.
    fn next_delay(
        &self,
        attempt: usize,
    ) -> Option<Duration>;
}

/// Same delay between every attempt, bounded attempt count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedBackoff {
    pub max_attempts: usize,
    pub delay: Duration,
}

impl FixedBackoff {
    pub fn new(
        max_attempts: usize,
        delay: Duration,
    ) -> Self {
        Self { max_attempts, delay }
    }
}

impl Default for FixedBackoff {
    fn default() -> Self {
        let policy = BackoffPolicy::default();
        Self::new(policy.max_attempts, Duration::from_millis(policy.base_delay_ms))
    }
}

impl RetryPolicy for FixedBackoff {
    fn next_delay(
        &self,
        attempt: usize,
    ) -> Option<Duration> {
        (attempt < self.max_attempts).then_some(self.delay)
    }
}

/// Delay doubling per attempt from `base` up to `max`, optionally jittered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    pub max_attempts: usize,
    pub base: Duration,
    pub max: Duration,
    pub jitter: bool,
}

impl ExponentialBackoff {
    fn raw_delay(
        &self,
        attempt: usize,
    ) -> Duration {
        let shift = attempt.saturating_sub(1).min(31) as u32;
        self.base.saturating_mul(1u32 << shift).min(self.max)
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn next_delay(
        &self,
        attempt: usize,
    ) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }

        let delay = self.raw_delay(attempt);
        if !self.jitter || delay.is_zero() {
            return Some(delay);
        }

        // Uniform in [delay / 2, delay]
        let half = delay / 2;
        let spread = rand::thread_rng().gen_range(0..=(delay - half).as_micros() as u64);
        Some(half + Duration::from_micros(spread))
    }
}

impl BackoffPolicy {
    /// Builds the policy object this template describes.
    pub fn build(&self) -> Arc<dyn RetryPolicy> {
        match self.strategy {
            BackoffStrategy::Fixed => Arc::new(FixedBackoff::new(
                self.max_attempts,
                Duration::from_millis(self.base_delay_ms),
            )),
            BackoffStrategy::Exponential => Arc::new(ExponentialBackoff {
                max_attempts: self.max_attempts,
                base: Duration::from_millis(self.base_delay_ms),
                max: Duration::from_millis(self.max_delay_ms),
                jitter: self.jitter,
            }),
        }
    }
}
