//! Step identity and the memoization ledger.
//!
//! The memo store answers one question before any step function runs: has this
//! named step already reached a terminal result in this instance? It is built
//! on top of an [`EventLog`], so the answer survives process restarts.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{Event, EventType, StepStatus};

use super::error::LedgerError;
use super::event_store::EventLog;

/// Logical purpose of a step; never contains ':'
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepPurpose {
    List,
    Classify,
    Update,
}

impl StepPurpose {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::List => "list",
            Self::Classify => "classify",
            Self::Update => "update",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "list" => Some(Self::List),
            "classify" => Some(Self::Classify),
            "update" => Some(Self::Update),
            _ => None,
        }
    }
}

impl fmt::Display for StepPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deterministic step identity: `"<purpose>:<subject>"`
///
/// The purpose never contains the separator, so splitting on the first ':'
/// recovers both parts and distinct (purpose, subject) pairs never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepName(String);

impl StepName {
    pub fn new(purpose: StepPurpose, subject: &str) -> Self {
        Self(format!("{}:{}", purpose.as_str(), subject))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn purpose(&self) -> Option<StepPurpose> {
        self.0.split_once(':').and_then(|(p, _)| StepPurpose::parse(p))
    }

    /// Item key (or listing prefix) this step operates on
    pub fn subject(&self) -> &str {
        self.0.split_once(':').map(|(_, s)| s).unwrap_or_default()
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Terminal result of a step
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Succeeded { result: serde_json::Value },
    Failed { error: String, attempts: u32 },
}

/// Non-terminal progress of a step, rebuilt from the ledger
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepProgress {
    /// Attempts that failed and were scheduled for retry
    pub failed_attempts: u32,

    /// When the pending retry becomes due
    pub retry_due_at: Option<DateTime<Utc>>,

    /// Error of the most recent failed attempt
    pub last_error: Option<String>,
}

impl StepProgress {
    /// Time left before the pending retry may start
    pub fn remaining_delay(&self, now: DateTime<Utc>) -> std::time::Duration {
        self.retry_due_at
            .and_then(|due| (due - now).to_std().ok())
            .unwrap_or_default()
    }
}

/// Durable idempotency ledger keyed by (instance, step name)
#[derive(Clone)]
pub struct StepMemoStore {
    log: Arc<dyn EventLog>,
}

impl StepMemoStore {
    pub fn new(log: Arc<dyn EventLog>) -> Self {
        Self { log }
    }

    /// Terminal outcome already recorded for this step, if any
    pub async fn lookup(
        &self,
        instance_id: Uuid,
        step: &StepName,
    ) -> Result<Option<StepOutcome>, LedgerError> {
        let events = self.log.replay(instance_id).await?;

        let Some(event) = events
            .iter()
            .find(|e| e.step.as_ref() == Some(step) && e.is_step_terminal())
        else {
            return Ok(None);
        };

        let outcome = match event.event_type {
            EventType::StepSucceeded => StepOutcome::Succeeded {
                result: event.output.clone().ok_or_else(|| LedgerError::Corrupt {
                    step: step.clone(),
                    reason: "succeeded without a result".to_string(),
                })?,
            },
            _ => StepOutcome::Failed {
                error: event.error.clone().unwrap_or_default(),
                attempts: event.attempt.unwrap_or(1),
            },
        };

        Ok(Some(outcome))
    }

    /// Record the terminal outcome; a step can be closed only once
    pub async fn record(
        &self,
        instance_id: Uuid,
        step: &StepName,
        outcome: &StepOutcome,
    ) -> Result<(), LedgerError> {
        self.record_timed(instance_id, step, outcome, None).await
    }

    /// Like [`record`](Self::record), keeping the duration of the final attempt
    pub async fn record_timed(
        &self,
        instance_id: Uuid,
        step: &StepName,
        outcome: &StepOutcome,
        duration_ms: Option<u64>,
    ) -> Result<(), LedgerError> {
        if self.lookup(instance_id, step).await?.is_some() {
            return Err(LedgerError::AlreadyRecorded {
                instance_id,
                step: step.clone(),
            });
        }

        let event = match outcome {
            StepOutcome::Succeeded { result } => Event::new(
                instance_id,
                Some(step.clone()),
                EventType::StepSucceeded,
                format!("Step '{}' succeeded", step),
                StepStatus::Succeeded,
            )
            .with_output(result.clone()),
            StepOutcome::Failed { error, attempts } => Event::new(
                instance_id,
                Some(step.clone()),
                EventType::StepFailed,
                format!("Step '{}' failed after {} attempt(s)", step, attempts),
                StepStatus::Failed,
            )
            .with_attempt(*attempts)
            .with_error(error.clone()),
        };

        let event = match duration_ms {
            Some(ms) => event.with_duration(ms),
            None => event,
        };

        self.log.append(&event).await
    }

    /// Failed attempts and pending retry deadline for a step
    pub async fn progress(
        &self,
        instance_id: Uuid,
        step: &StepName,
    ) -> Result<StepProgress, LedgerError> {
        let events = self.log.replay(instance_id).await?;
        let mut progress = StepProgress::default();

        for event in events
            .iter()
            .filter(|e| e.step.as_ref() == Some(step))
        {
            match event.event_type {
                EventType::StepRetrying => {
                    progress.failed_attempts += 1;
                    let delay = ChronoDuration::milliseconds(
                        i64::try_from(event.delay_ms.unwrap_or(0)).unwrap_or(i64::MAX),
                    );
                    progress.retry_due_at = event.timestamp.checked_add_signed(delay);
                    progress.last_error = event.error.clone();
                }
                EventType::StepStarted => progress.retry_due_at = None,
                _ => {}
            }
        }

        Ok(progress)
    }

    pub async fn attempt_started(
        &self,
        instance_id: Uuid,
        step: &StepName,
        attempt: u32,
    ) -> Result<(), LedgerError> {
        let event = Event::new(
            instance_id,
            Some(step.clone()),
            EventType::StepStarted,
            format!("Step '{}' attempt {}", step, attempt),
            StepStatus::Running,
        )
        .with_attempt(attempt);

        self.log.append(&event).await
    }

    pub async fn retry_scheduled(
        &self,
        instance_id: Uuid,
        step: &StepName,
        attempt: u32,
        delay: std::time::Duration,
        error: &str,
    ) -> Result<(), LedgerError> {
        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        let event = Event::new(
            instance_id,
            Some(step.clone()),
            EventType::StepRetrying,
            format!(
                "Step '{}' attempt {} failed, retrying in {:?}",
                step, attempt, delay
            ),
            StepStatus::WaitingRetry,
        )
        .with_attempt(attempt)
        .with_delay(delay_ms)
        .with_error(error);

        self.log.append(&event).await
    }
}
