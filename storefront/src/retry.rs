//! Bounded retry of order placements that collide with concurrent writers.

use std::time::Duration;

use nutype::nutype;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Total number of placement attempts, the first one included.
///
/// Validated to 1..=10 so a misconfiguration can never turn a conflict into
/// an unbounded loop.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 10),
    default = 3,
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Display,
        Default,
        FromStr,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct MaxAttempts(u32);

/// Exponential backoff multiplier, 1.0..=10.0.
#[nutype(
    validate(greater_or_equal = 1.0, less_or_equal = 10.0),
    default = 2.0,
    derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Into)
)]
pub struct BackoffMultiplier(f64);

/// Where in an attempt a conflict was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConflictPhase {
    /// While locking rows, decrementing stock or writing the order.
    Validating,
    /// While committing.
    Committing,
}

/// Information handed to a [`MetricsHook`] before a retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryContext {
    /// The attempt about to start (2 for the first retry).
    pub attempt: u32,
    /// Configured attempt limit.
    pub max_attempts: u32,
    /// Backoff applied before the attempt starts.
    pub delay: Duration,
    /// Phase in which the previous attempt conflicted.
    pub phase: ConflictPhase,
}

/// Observer notified when the engine retries a conflicting placement.
///
/// The engine itself never logs; callers that want retry visibility plug in
/// a hook and record it however they like.
pub trait MetricsHook: Send + Sync {
    /// Called once per retry, before the backoff sleep.
    fn on_retry_attempt(&self, ctx: &RetryContext);
}

/// Retry configuration for conflicting placements.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: MaxAttempts,
    base_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: BackoffMultiplier,
    use_jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MaxAttempts::default(),
            base_delay: Duration::from_millis(20),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: BackoffMultiplier::default(),
            use_jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Default policy with a custom attempt limit.
    pub fn new(max_attempts: MaxAttempts) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// Retry immediately, without any backoff.
    pub fn immediate(max_attempts: MaxAttempts) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: BackoffMultiplier::default(),
            use_jitter: false,
        }
    }

    /// Set the delay before the first retry.
    #[must_use]
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Cap the delay between retries.
    #[must_use]
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Set the growth factor between successive delays.
    #[must_use]
    pub fn with_backoff_multiplier(mut self, backoff_multiplier: BackoffMultiplier) -> Self {
        self.backoff_multiplier = backoff_multiplier;
        self
    }

    /// Disable jitter, making delays deterministic.
    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.use_jitter = false;
        self
    }

    /// Attempt limit, the first attempt included.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts.into_inner()
    }

    /// Backoff to apply before `attempt` starts.
    ///
    /// Zero for the first attempt. The second waits `base_delay`, each later
    /// one `backoff_multiplier` times longer, never more than `max_delay`.
    /// Jitter scales the delay by 0.8..1.2 and is clamped to the same cap.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt - 2).unwrap_or(i32::MAX);
        let multiplier = self.backoff_multiplier.into_inner();
        let cap = self.max_delay.as_secs_f64();
        let mut delay = (self.base_delay.as_secs_f64() * multiplier.powi(exponent)).min(cap);

        if self.use_jitter {
            delay = (delay * rand::rng().random_range(0.8..1.2)).min(cap);
        }

        Duration::try_from_secs_f64(delay)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}
