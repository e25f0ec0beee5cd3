//! Error taxonomy for the orchestration engine.
//!
//! - `StepError::Transient`: one attempt failed, the retry policy decides what happens next
//! - `StepError::Permanent`: the step is terminally failed, isolated to its item
//! - `LedgerError` (surfaced as `StepError::Fatal`): the durability layer itself
//!   failed; never retried, terminates the instance

use std::path::PathBuf;

use thiserror::Error;
use uuid::Uuid;

use super::memo::StepName;

/// Failure of the durable ledger
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Ledger I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Ledger serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt ledger entry for step '{step}': {reason}")]
    Corrupt { step: StepName, reason: String },

    #[error("Step '{step}' already has a terminal result in instance {instance_id}")]
    AlreadyRecorded { instance_id: Uuid, step: StepName },

    #[error("Ledger unavailable: {0}")]
    Unavailable(String),
}

impl LedgerError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Failure of a step run
#[derive(Debug, Error)]
pub enum StepError {
    #[error("Step '{step}' attempt {attempt} failed: {message}")]
    Transient {
        step: StepName,
        attempt: u32,
        message: String,
    },

    #[error("Step '{step}' failed after {attempts} attempt(s): {message}")]
    Permanent {
        step: StepName,
        attempts: u32,
        message: String,
    },

    #[error("Fatal infrastructure error: {0}")]
    Fatal(#[from] LedgerError),
}

impl StepError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

/// Errors surfaced by the instance registry
#[derive(Debug, Error)]
pub enum InstanceError {
    #[error("Instance {0} not found")]
    NotFound(Uuid),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Returned by a step function to mark a failure that retrying cannot fix
///
/// ```rust,ignore
/// return Err(PermanentFailure::new("object was deleted").into());
/// ```
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct PermanentFailure(pub String);

impl PermanentFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}
