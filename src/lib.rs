//! durabatch - Durable batch classification orchestrator
//!
//! Lists work items from an object store, classifies each one and writes the
//! label back into the object's metadata. Every step is checkpointed, so an
//! interrupted instance resumes without redoing finished work.
//!
//! # Architecture
//!
//! The system is built around event sourcing:
//! - All state changes are recorded as immutable events
//! - Instance state and step results are derived by replaying events
//! - A step that already reached a terminal result is never run again
//!
//! # Modules
//!
//! - `adapters`: Storage and inference collaborators
//! - `core`: Ledger, retry, step runner, batch coordinator, registry
//! - `domain`: Data structures (Event, Instance, BatchResult)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Classify everything under images/
//! durabatch run --prefix images/
//!
//! # Check instance status
//! durabatch status <instance-id>
//!
//! # Resume an interrupted instance
//! durabatch resume <instance-id>
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use crate::adapters::{Classifier, ObjectStore};
pub use crate::core::{InstanceRegistry, RetryPolicy, StepRunner};
pub use crate::domain::{BatchResult, Event, EventType, Instance, InstanceStatus};
