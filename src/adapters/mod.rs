//! Adapter interfaces for external collaborators.
//!
//! The engine only talks to storage and inference through these traits:
//! - `ObjectStore`: lists, fetches and writes back work-item payloads
//! - `Classifier`: computes labels for a payload

pub mod fs_store;
pub mod inference;
pub mod memory;

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::WorkItem;

pub use fs_store::FsObjectStore;
pub use inference::HttpClassifier;
pub use memory::MemoryObjectStore;

/// User metadata attached to a stored object
pub type Metadata = BTreeMap<String, String>;

/// Payload and metadata of a stored object
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredObject {
    pub payload: Vec<u8>,
    pub metadata: Metadata,
}

impl StoredObject {
    pub fn new(payload: impl Into<Vec<u8>>, metadata: Metadata) -> Self {
        Self {
            payload: payload.into(),
            metadata,
        }
    }
}

/// One label with its confidence score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: String,
    pub score: f64,
}

/// Storage collaborator
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Human-readable store name
    fn name(&self) -> &str;

    /// Objects whose key starts with `prefix`, in listing order
    async fn list(&self, prefix: &str) -> Result<Vec<WorkItem>>;

    /// Fetch an object; `None` when the key does not exist
    async fn get(&self, key: &str) -> Result<Option<StoredObject>>;

    /// Write an object, replacing payload and metadata
    async fn put(&self, key: &str, payload: Vec<u8>, metadata: Metadata) -> Result<()>;
}

/// Inference collaborator
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Human-readable classifier name
    fn name(&self) -> &str;

    /// Predictions ordered by descending score
    async fn infer(&self, payload: &[u8]) -> Result<Vec<Prediction>>;
}

/// Sort predictions so the most confident comes first
pub fn rank_predictions(mut predictions: Vec<Prediction>) -> Vec<Prediction> {
    predictions.sort_by(|a, b| b.score.total_cmp(&a.score));
    predictions
}
