//! Retry policies and the pure decision function behind them.
//!
//! The engine never sleeps itself: it only tells the step runner whether to
//! try again and how long to wait first.

use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::error::PermanentFailure;

/// Wait strategy between attempts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    /// Wait `delay` before every retry
    #[default]
    Fixed,

    /// Wait `delay * 2^(n-1)` before the n-th retry
    Exponential,
}

/// Retry policy attached to a step invocation
///
/// The default is a single attempt with no delay and no timeout, so a failure
/// is immediately terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including first try)
    #[serde(default = "default_limit")]
    pub limit: u32,

    /// Base delay between attempts in milliseconds
    #[serde(default)]
    pub delay_ms: u64,

    #[serde(default)]
    pub backoff: Backoff,

    /// Maximum duration of a single attempt in milliseconds
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Upper bound for any single wait
    #[serde(default)]
    pub max_delay_ms: Option<u64>,
}

fn default_limit() -> u32 {
    1
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            delay_ms: 0,
            backoff: Backoff::Fixed,
            timeout_ms: None,
            max_delay_ms: None,
        }
    }
}

impl RetryPolicy {
    /// Policy allowing up to `limit` attempts with no delay (0 is treated as 1)
    pub fn new(limit: u32) -> Self {
        Self {
            limit: limit.max(1),
            ..Default::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay_ms = duration_ms(delay);
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(duration_ms(timeout));
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay_ms = Some(duration_ms(max_delay));
        self
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// Per-attempt timeout, if any
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Check the policy for values the engine cannot honor
    pub fn validate(&self) -> Result<()> {
        if self.limit < 1 {
            anyhow::bail!("Retry limit must be at least 1 (got {})", self.limit);
        }
        if self.timeout_ms == Some(0) {
            anyhow::bail!("Retry timeout must be greater than zero");
        }
        Ok(())
    }

    /// Wait before the given retry (1-indexed: the first retry is 1)
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let base = self.delay();
        let delay = match self.backoff {
            Backoff::Fixed => base,
            Backoff::Exponential => {
                let exp = retry.saturating_sub(1).min(31);
                base.saturating_mul(1u32 << exp)
            }
        };

        match self.max_delay_ms {
            Some(max) => delay.min(Duration::from_millis(max)),
            None => delay,
        }
    }

    /// True once `attempts` attempts use up the whole budget
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.limit.max(1)
    }

    /// Decide what follows a failed attempt
    ///
    /// `attempt` is the number of attempts made so far, including the one that
    /// just failed.
    pub fn decide(&self, attempt: u32, error: &anyhow::Error) -> RetryDecision {
        if self.is_exhausted(attempt) {
            return RetryDecision::GiveUp;
        }
        if error.downcast_ref::<PermanentFailure>().is_some() {
            return RetryDecision::GiveUp;
        }
        RetryDecision::RetryAfter(self.delay_for_retry(attempt))
    }
}

/// Outcome of consulting a policy after a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

/// An attempt ran past its policy timeout
#[derive(Debug, Clone, Error)]
#[error("Attempt timed out after {0:?}")]
pub struct AttemptTimedOut(pub Duration);

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
