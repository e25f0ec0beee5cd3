//! Instance lifecycle: creation, background execution and status queries.
//!
//! The registry owns no state beyond the flows it has running. Each entry
//! stays registered until its task ends, and at most one flow per instance
//! is alive in the process at any time. The status of an instance is always
//! derived by replaying its events, so a query made from another process
//! sees the same answer.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::adapters::{Classifier, ObjectStore};
use crate::config::BatchSettings;
use crate::domain::{
    Event, EventType, Instance, InstanceParams, StatusSnapshot, StepStatus,
};

use super::batch::BatchCoordinator;
use super::error::{InstanceError, LedgerError};
use super::event_store::EventLog;
use super::memo::StepMemoStore;
use super::step_runner::StepRunner;

/// Creates instances and drives them in the background
pub struct InstanceRegistry {
    log: Arc<dyn EventLog>,
    coordinator: Arc<BatchCoordinator>,
    active: ActiveFlows,
}

/// Completion signals of the flows alive in this process
type ActiveFlows = Arc<Mutex<HashMap<Uuid, watch::Receiver<bool>>>>;

/// Unregisters a flow when its task ends, including by panic
struct FlowGuard {
    active: ActiveFlows,
    id: Uuid,
    done: watch::Sender<bool>,
}

impl Drop for FlowGuard {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
        self.done.send_replace(true);
    }
}

impl InstanceRegistry {
    pub fn new(
        log: Arc<dyn EventLog>,
        objects: Arc<dyn ObjectStore>,
        classifier: Arc<dyn Classifier>,
        settings: BatchSettings,
    ) -> Self {
        let runner = StepRunner::new(StepMemoStore::new(Arc::clone(&log)));
        let coordinator = BatchCoordinator::new(runner, objects, classifier, settings);

        Self {
            log,
            coordinator: Arc::new(coordinator),
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn settings(&self) -> &BatchSettings {
        self.coordinator.settings()
    }

    /// Record a new instance and start processing it in the background
    pub async fn create(&self, params: InstanceParams) -> Result<Instance, InstanceError> {
        let id = Uuid::new_v4();
        let output = serde_json::to_value(&params).map_err(LedgerError::from)?;

        let event = Event::new(
            id,
            None,
            EventType::InstanceCreated,
            format!("Instance created for prefix '{}'", params.prefix),
            StepStatus::Running,
        )
        .with_output(output);
        self.log.append(&event).await?;

        info!(instance_id = %id, prefix = %params.prefix, "Instance created");

        let mut instance = Instance::new(id, params.clone());
        instance.created_at = event.timestamp;

        self.try_spawn(id, params);
        Ok(instance)
    }

    /// Current state of an instance
    pub async fn get(&self, id: Uuid) -> Result<Instance, InstanceError> {
        let events = self.log.replay(id).await?;
        Instance::from_events(&events).ok_or(InstanceError::NotFound(id))
    }

    /// Point-in-time status; valid while the instance is still running
    pub async fn status(&self, id: Uuid) -> Result<StatusSnapshot, InstanceError> {
        Ok(self.get(id).await?.snapshot())
    }

    /// Re-drive a running instance whose flow is not alive in this process
    ///
    /// Terminal instances are returned unchanged. Completed steps are served
    /// from the ledger, so only unfinished work is executed again.
    pub async fn resume(&self, id: Uuid) -> Result<Instance, InstanceError> {
        let instance = self.get(id).await?;

        if instance.status.is_terminal() {
            info!(instance_id = %id, status = %instance.status, "Instance already finished");
            return Ok(instance);
        }

        if self.try_spawn(id, instance.params.clone()) {
            let done = instance
                .steps
                .values()
                .filter(|s| s.state.is_terminal())
                .count();
            info!(instance_id = %id, completed_steps = done, "Resumed instance");
        } else {
            info!(instance_id = %id, "Instance is already being driven");
        }

        Ok(instance)
    }

    /// Wait for the background flow of an instance, then return its state
    ///
    /// The flow stays registered while waiting, so a concurrent `resume`
    /// still sees it as alive.
    pub async fn wait(&self, id: Uuid) -> Result<Instance, InstanceError> {
        let signal = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned();

        if let Some(mut done) = signal {
            if let Err(e) = done.wait_for(|finished| *finished).await {
                warn!(instance_id = %id, error = %e, "Instance flow did not finish cleanly");
            }
        }

        self.get(id).await
    }

    /// Most recent instances first
    pub async fn list(&self, limit: usize) -> Result<Vec<Instance>, InstanceError> {
        let mut instances = Vec::new();

        for id in self.log.list_instances().await? {
            let events = self.log.replay(id).await?;
            if let Some(instance) = Instance::from_events(&events) {
                instances.push(instance);
            }
        }

        instances.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        instances.truncate(limit);
        Ok(instances)
    }

    /// Start a flow unless one is already alive; false if one was
    fn try_spawn(&self, id: Uuid, params: InstanceParams) -> bool {
        let (done, signal) = watch::channel(false);

        {
            let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
            if active.contains_key(&id) {
                return false;
            }
            active.insert(id, signal);
        }

        let guard = FlowGuard {
            active: Arc::clone(&self.active),
            id,
            done,
        };
        let log = Arc::clone(&self.log);
        let coordinator = Arc::clone(&self.coordinator);

        tokio::spawn(
            async move {
                let _guard = guard;
                drive(log, coordinator, id, params).await;
            }
            .instrument(info_span!("instance", instance_id = %id)),
        );
        true
    }
}

/// Run the batch and record the terminal lifecycle event
async fn drive(
    log: Arc<dyn EventLog>,
    coordinator: Arc<BatchCoordinator>,
    id: Uuid,
    params: InstanceParams,
) {
    let event = match coordinator.execute(id, &params).await {
        Ok(result) => match serde_json::to_value(&result) {
            Ok(output) => {
                info!(
                    processed = result.processed_count,
                    total = result.summary.total_items,
                    failed = result.failures.len(),
                    "Instance completed"
                );
                Event::new(
                    id,
                    None,
                    EventType::InstanceCompleted,
                    format!(
                        "Processed {}/{} items",
                        result.processed_count, result.summary.total_items
                    ),
                    StepStatus::Succeeded,
                )
                .with_output(output)
            }
            Err(e) => errored(id, &format!("Failed to serialize batch result: {}", e)),
        },
        Err(e) => errored(id, &e.to_string()),
    };

    if let Err(e) = log.append(&event).await {
        error!(error = %e, "Failed to record instance outcome, instance stays running until resumed");
    }
}

fn errored(id: Uuid, message: &str) -> Event {
    error!(error = %message, "Instance errored");
    Event::new(
        id,
        None,
        EventType::InstanceErrored,
        "Instance errored",
        StepStatus::Failed,
    )
    .with_error(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{MemoryObjectStore, Metadata, Prediction, StoredObject};
    use crate::core::event_store::MemoryEventLog;
    use crate::domain::InstanceStatus;
    use async_trait::async_trait;

    struct Tabby;

    #[async_trait]
    impl Classifier for Tabby {
        fn name(&self) -> &str {
            "tabby"
        }

        async fn infer(&self, _payload: &[u8]) -> anyhow::Result<Vec<Prediction>> {
            Ok(vec![Prediction {
                label: "tabby".to_string(),
                score: 0.9,
            }])
        }
    }

    async fn registry() -> InstanceRegistry {
        let objects = MemoryObjectStore::new();
        objects
            .insert("images/a.jpg", StoredObject::new(b"a".to_vec(), Metadata::new()))
            .await;

        InstanceRegistry::new(
            Arc::new(MemoryEventLog::new()),
            Arc::new(objects),
            Arc::new(Tabby),
            BatchSettings::default(),
        )
    }

    #[tokio::test]
    async fn test_create_then_wait() {
        let registry = registry().await;

        let created = registry.create(InstanceParams::default()).await.unwrap();
        assert_eq!(created.status, InstanceStatus::Running);

        let finished = registry.wait(created.id).await.unwrap();
        assert_eq!(finished.status, InstanceStatus::Completed);
        assert_eq!(finished.result.unwrap().processed_count, 1);
    }

    #[tokio::test]
    async fn test_unknown_instance() {
        let registry = registry().await;

        let err = registry.status(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, InstanceError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_wait_without_live_flow_reads_ledger() {
        let registry = registry().await;
        let created = registry.create(InstanceParams::default()).await.unwrap();
        registry.wait(created.id).await.unwrap();

        let again = registry.wait(created.id).await.unwrap();
        assert_eq!(again.status, InstanceStatus::Completed);
        assert!(registry.active.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_resume_finished_instance_is_noop() {
        let registry = registry().await;
        let created = registry.create(InstanceParams::default()).await.unwrap();
        let finished = registry.wait(created.id).await.unwrap();

        let resumed = registry.resume(created.id).await.unwrap();
        assert_eq!(resumed.status, InstanceStatus::Completed);
        assert_eq!(resumed.finished_at, finished.finished_at);
    }
}
