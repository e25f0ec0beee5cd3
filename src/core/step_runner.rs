//! Executes one step function under the memoization and retry contract.
//!
//! Every run checks the ledger first. A step that already succeeded returns
//! its stored result without invoking the function again, which is what makes
//! an instance safely resumable after a crash.

use std::future::Future;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::error::{LedgerError, StepError};
use super::memo::{StepMemoStore, StepName, StepOutcome};
use super::retry::{AttemptTimedOut, RetryDecision, RetryPolicy};

/// Runs named, checkpointed steps
#[derive(Clone)]
pub struct StepRunner {
    memo: StepMemoStore,
}

impl StepRunner {
    pub fn new(memo: StepMemoStore) -> Self {
        Self { memo }
    }

    pub fn memo(&self) -> &StepMemoStore {
        &self.memo
    }

    /// Run `step_fn` as the step `step` of `instance_id`
    ///
    /// Returns the memoized result when the step already succeeded, replays a
    /// recorded terminal failure as `StepError::Permanent`, and otherwise
    /// attempts the function until it succeeds or the policy gives up. Ledger
    /// failures are returned as `StepError::Fatal` and never retried here.
    #[instrument(skip_all, fields(instance_id = %instance_id, step = %step))]
    pub async fn run<T, F, Fut>(
        &self,
        instance_id: Uuid,
        step: &StepName,
        policy: &RetryPolicy,
        mut step_fn: F,
    ) -> Result<T, StepError>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        match self.memo.lookup(instance_id, step).await? {
            Some(StepOutcome::Succeeded { result }) => {
                debug!("Step already succeeded, returning memoized result");
                return serde_json::from_value(result).map_err(|e| {
                    StepError::Fatal(LedgerError::Corrupt {
                        step: step.clone(),
                        reason: e.to_string(),
                    })
                });
            }
            Some(StepOutcome::Failed { error, attempts }) => {
                debug!(attempts, "Step already failed, replaying recorded failure");
                return Err(StepError::Permanent {
                    step: step.clone(),
                    attempts,
                    message: error,
                });
            }
            None => {}
        }

        // Continue the attempt count and any pending backoff from before a restart
        let progress = self.memo.progress(instance_id, step).await?;
        let mut attempt = progress.failed_attempts;
        if attempt > 0 && policy.is_exhausted(attempt) {
            let message = progress
                .last_error
                .unwrap_or_else(|| "Retry budget exhausted".to_string());
            self.memo
                .record(
                    instance_id,
                    step,
                    &StepOutcome::Failed {
                        error: message.clone(),
                        attempts: attempt,
                    },
                )
                .await?;
            error!(attempt, error = %message, "Retry budget already used up, step failed permanently");
            return Err(StepError::Permanent {
                step: step.clone(),
                attempts: attempt,
                message,
            });
        }

        let pending = progress.remaining_delay(Utc::now());
        if !pending.is_zero() {
            info!(
                attempt,
                delay_ms = pending.as_millis() as u64,
                "Resuming step, waiting out remaining backoff"
            );
            tokio::time::sleep(pending).await;
        }

        loop {
            attempt += 1;
            self.memo.attempt_started(instance_id, step, attempt).await?;
            let started = Instant::now();

            let outcome = match policy.timeout() {
                Some(limit) => match tokio::time::timeout(limit, step_fn()).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(AttemptTimedOut(limit).into()),
                },
                None => step_fn().await,
            };

            let duration_ms = started.elapsed().as_millis() as u64;

            let failure = match outcome {
                Ok(value) => {
                    let result = serde_json::to_value(&value).map_err(LedgerError::from)?;
                    self.memo
                        .record_timed(
                            instance_id,
                            step,
                            &StepOutcome::Succeeded { result },
                            Some(duration_ms),
                        )
                        .await?;
                    info!(attempt, duration_ms, "Step succeeded");
                    return Ok(value);
                }
                Err(e) => e,
            };

            let message = format!("{:#}", failure);

            match policy.decide(attempt, &failure) {
                RetryDecision::RetryAfter(delay) => {
                    let transient = StepError::Transient {
                        step: step.clone(),
                        attempt,
                        message: message.clone(),
                    };
                    warn!(
                        duration_ms,
                        delay_ms = delay.as_millis() as u64,
                        "{}, retrying",
                        transient
                    );
                    self.memo
                        .retry_scheduled(instance_id, step, attempt, delay, &message)
                        .await?;
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::GiveUp => {
                    self.memo
                        .record_timed(
                            instance_id,
                            step,
                            &StepOutcome::Failed {
                                error: message.clone(),
                                attempts: attempt,
                            },
                            Some(duration_ms),
                        )
                        .await?;
                    error!(attempt, error = %message, "Step failed permanently");
                    return Err(StepError::Permanent {
                        step: step.clone(),
                        attempts: attempt,
                        message,
                    });
                }
            }
        }
    }
}
