//! Domain types for the durabatch orchestrator.
//!
//! This module contains the core data structures:
//! - Events: Immutable records of state changes
//! - Instance: Orchestration run state
//! - Batch: Work items and batch output

pub mod batch;
pub mod events;
pub mod instance;

// Re-export commonly used types
pub use batch::{BatchResult, BatchSummary, Classification, ItemFailure, ItemOutcome, WorkItem};
pub use events::{Event, EventType, StepStatus};
pub use instance::{
    Instance, InstanceParams, InstanceStatus, StatusSnapshot, StepRecord, DEFAULT_PREFIX,
};
