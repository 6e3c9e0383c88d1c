use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::AttemptOutcome;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

const MAX_EXPONENTIAL_SHIFT: u32 = 16;

/// How long a worker pauses between attempts on the same item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    /// `base * 2^attempt`, capped at `cap`.
    Exponential { base: Duration, cap: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    #[default]
    Fixed,
    Exponential,
}

impl Backoff {
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { base, cap } => {
                let factor = 1u32 << attempt.min(MAX_EXPONENTIAL_SHIFT);
                base.saturating_mul(factor).min(cap)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// The attempt succeeded, the item is finished.
    Done,
    Retry { delay: Duration },
    GiveUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: Backoff::Fixed(DEFAULT_RETRY_DELAY),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Backoff) -> Self {
        Self { max_retries, backoff }
    }

    /// Decides what follows the attempt at `attempt` (0-based).
    pub fn decide(&self, attempt: u32, outcome: &AttemptOutcome) -> RetryDecision {
        if outcome.is_success() {
            return RetryDecision::Done;
        }
        if attempt < self.max_retries {
            RetryDecision::Retry { delay: self.backoff.delay_for_attempt(attempt) }
        } else {
            RetryDecision::GiveUp
        }
    }
}
