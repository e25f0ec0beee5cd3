//! In-memory object store.
//!
//! Keeps everything in a sorted map, so listings come back in key order like
//! a real bucket listing.

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::WorkItem;

use super::{Metadata, ObjectStore, StoredObject};

#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<BTreeMap<String, StoredObject>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object directly
    pub async fn insert(&self, key: impl Into<String>, object: StoredObject) {
        self.objects.write().await.insert(key.into(), object);
    }

    /// Current metadata of an object, if present
    pub async fn metadata(&self, key: &str) -> Option<Metadata> {
        self.objects
            .read()
            .await
            .get(key)
            .map(|o| o.metadata.clone())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn list(&self, prefix: &str) -> Result<Vec<WorkItem>> {
        Ok(self
            .objects
            .read()
            .await
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, object)| WorkItem::new(key.clone(), object.payload.len() as u64))
            .collect())
    }

    async fn get(&self, key: &str) -> Result<Option<StoredObject>> {
        Ok(self.objects.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, payload: Vec<u8>, metadata: Metadata) -> Result<()> {
        self.objects
            .write()
            .await
            .insert(key.to_string(), StoredObject { payload, metadata });
        Ok(())
    }
}
