//! Core orchestration logic.
//!
//! This module contains:
//! - EventStore: Append-only event logging (the durable ledger)
//! - StepMemoStore: Step identity and memoized terminal results
//! - RetryPolicy: Backoff and retry decisions
//! - StepRunner: Memoized, retried execution of one step
//! - BatchCoordinator: Per-item classify/update with failure isolation
//! - InstanceRegistry: Instance lifecycle and status queries

pub mod batch;
pub mod error;
pub mod event_store;
pub mod memo;
pub mod registry;
pub mod retry;
pub mod step_runner;

// Re-export commonly used types
pub use batch::{BatchCoordinator, ItemResult, CLASSIFICATION_FIELD, PROCESSED_AT_FIELD};
pub use error::{InstanceError, LedgerError, PermanentFailure, StepError};
pub use event_store::{EventLog, EventStore, MemoryEventLog};
pub use memo::{StepMemoStore, StepName, StepOutcome, StepProgress, StepPurpose};
pub use registry::InstanceRegistry;
pub use retry::{AttemptTimedOut, Backoff, RetryDecision, RetryPolicy};
pub use step_runner::StepRunner;
