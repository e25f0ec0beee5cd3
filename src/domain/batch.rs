//! Work items and the batch output attached to a completed instance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::memo::StepPurpose;

/// One unit of work from the listing (metadata only, never the content)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Unique key within the listing
    pub key: String,

    /// Payload length in bytes
    pub size: u64,
}

impl WorkItem {
    pub fn new(key: impl Into<String>, size: u64) -> Self {
        Self {
            key: key.into(),
            size,
        }
    }
}

/// Label produced by the classify step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub label: String,
    pub confidence: f64,
}

/// Per-item success record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemOutcome {
    pub key: String,
    pub classification: String,
    pub confidence: f64,
    pub processed_at: DateTime<Utc>,
}

/// An item that hit a terminal step failure and was left out of the results
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemFailure {
    pub key: String,
    pub step: StepPurpose,
    pub error: String,
}

/// Aggregate counters for a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    /// Number of items in the original listing
    pub total_items: usize,
    pub successfully_processed: usize,
    pub timestamp: DateTime<Utc>,
}

/// Final output of an instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub processed_count: usize,

    /// Successful items, in listing order
    pub results: Vec<ItemOutcome>,

    /// Items omitted from `results`
    #[serde(default)]
    pub failures: Vec<ItemFailure>,

    pub summary: BatchSummary,
}

impl BatchResult {
    /// Build the result from per-item outcomes; `total_items` is the listing size
    pub fn new(total_items: usize, results: Vec<ItemOutcome>, failures: Vec<ItemFailure>) -> Self {
        let processed_count = results.len();
        Self {
            processed_count,
            results,
            failures,
            summary: BatchSummary {
                total_items,
                successfully_processed: processed_count,
                timestamp: Utc::now(),
            },
        }
    }
}
