//! Shared fakes for the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use durabatch::adapters::{
    Classifier, MemoryObjectStore, Metadata, ObjectStore, Prediction, StoredObject,
};
use durabatch::config::BatchSettings;
use durabatch::core::{EventLog, InstanceRegistry, MemoryEventLog};
use durabatch::domain::WorkItem;

/// Classifier that always answers with the same label and counts calls
pub struct FixedClassifier {
    label: String,
    score: f64,
    delay: Duration,
    calls: AtomicU32,
}

impl FixedClassifier {
    pub fn new(label: &str, score: f64) -> Self {
        Self::with_delay(label, score, Duration::ZERO)
    }

    /// Each inference takes `delay` before answering
    pub fn with_delay(label: &str, score: f64, delay: Duration) -> Self {
        Self {
            label: label.to_string(),
            score,
            delay,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Classifier for FixedClassifier {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn infer(&self, _payload: &[u8]) -> Result<Vec<Prediction>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(vec![
            Prediction {
                label: self.label.clone(),
                score: self.score,
            },
            Prediction {
                label: "other".to_string(),
                score: self.score / 2.0,
            },
        ])
    }
}

/// Classifier that never finds anything
pub struct EmptyClassifier;

#[async_trait]
impl Classifier for EmptyClassifier {
    fn name(&self) -> &str {
        "empty"
    }

    async fn infer(&self, _payload: &[u8]) -> Result<Vec<Prediction>> {
        Ok(Vec::new())
    }
}

/// Object store wrapper that injects failures
#[derive(Default)]
pub struct FaultyStore {
    inner: MemoryObjectStore,
    /// Remaining put failures per key (`u32::MAX` fails forever)
    put_failures: Mutex<HashMap<String, u32>>,
    fail_list: bool,
    puts: AtomicU32,
    lists: AtomicU32,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose listing always fails
    pub fn unlistable() -> Self {
        Self {
            fail_list: true,
            ..Self::default()
        }
    }

    pub async fn insert(&self, key: &str, payload: &[u8], metadata: Metadata) {
        self.inner
            .insert(key, StoredObject::new(payload.to_vec(), metadata))
            .await;
    }

    /// Make the next `times` puts of `key` fail
    pub fn fail_puts(&self, key: &str, times: u32) {
        self.put_failures
            .lock()
            .unwrap()
            .insert(key.to_string(), times);
    }

    pub async fn metadata(&self, key: &str) -> Option<Metadata> {
        self.inner.metadata(key).await
    }

    pub fn puts(&self) -> u32 {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn lists(&self) -> u32 {
        self.lists.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for FaultyStore {
    fn name(&self) -> &str {
        "faulty"
    }

    async fn list(&self, prefix: &str) -> Result<Vec<WorkItem>> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        if self.fail_list {
            anyhow::bail!("bucket unreachable");
        }
        self.inner.list(prefix).await
    }

    async fn get(&self, key: &str) -> Result<Option<StoredObject>> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, payload: Vec<u8>, metadata: Metadata) -> Result<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        {
            let mut failures = self.put_failures.lock().unwrap();
            if let Some(remaining) = failures.get_mut(key) {
                if *remaining > 0 {
                    if *remaining != u32::MAX {
                        *remaining -= 1;
                    }
                    anyhow::bail!("write to '{}' rejected", key);
                }
            }
        }
        self.inner.put(key, payload, metadata).await
    }
}

/// Store seeded with `images/1.jpg`, `images/2.jpg`, `images/3.jpg`
pub async fn three_images() -> FaultyStore {
    let store = FaultyStore::new();
    for n in 1..=3 {
        store
            .insert(&format!("images/{}.jpg", n), b"jpeg", Metadata::new())
            .await;
    }
    store
}

pub fn metadata(pairs: &[(&str, &str)]) -> Metadata {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Registry over an in-memory ledger with the default batch settings
pub fn registry(
    log: Arc<dyn EventLog>,
    store: Arc<FaultyStore>,
    classifier: Arc<dyn Classifier>,
) -> InstanceRegistry {
    InstanceRegistry::new(log, store, classifier, BatchSettings::default())
}

pub fn memory_log() -> Arc<dyn EventLog> {
    Arc::new(MemoryEventLog::new())
}
