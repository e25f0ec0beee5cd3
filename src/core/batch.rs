//! Batch coordination: list work items, then classify and update each one.
//!
//! Items are processed one at a time in listing order. A terminal failure of
//! either step is caught at the item boundary and recorded as an
//! `ItemFailure`; only ledger failures escape and end the instance.

use std::sync::Arc;

use anyhow::Context;
use chrono::{SecondsFormat, SubsecRound, Utc};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::adapters::{Classifier, ObjectStore};
use crate::config::BatchSettings;
use crate::domain::{BatchResult, Classification, InstanceParams, ItemFailure, ItemOutcome, WorkItem};

use super::error::{LedgerError, PermanentFailure, StepError};
use super::memo::{StepName, StepPurpose};
use super::retry::RetryPolicy;
use super::step_runner::StepRunner;

/// Metadata field carrying the label
pub const CLASSIFICATION_FIELD: &str = "classification";

/// Metadata field carrying the processing timestamp
pub const PROCESSED_AT_FIELD: &str = "processedAt";

/// Outcome of one item: its result, or the isolated failure
pub type ItemResult = Result<ItemOutcome, ItemFailure>;

/// Drives the two-step pipeline over a batch
pub struct BatchCoordinator {
    runner: StepRunner,
    objects: Arc<dyn ObjectStore>,
    classifier: Arc<dyn Classifier>,
    settings: BatchSettings,
}

impl BatchCoordinator {
    pub fn new(
        runner: StepRunner,
        objects: Arc<dyn ObjectStore>,
        classifier: Arc<dyn Classifier>,
        settings: BatchSettings,
    ) -> Self {
        Self {
            runner,
            objects,
            classifier,
            settings,
        }
    }

    pub fn settings(&self) -> &BatchSettings {
        &self.settings
    }

    /// List, then process; any error returned here is instance-level
    #[instrument(skip_all, fields(instance_id = %instance_id, prefix = %params.prefix))]
    pub async fn execute(
        &self,
        instance_id: Uuid,
        params: &InstanceParams,
    ) -> Result<BatchResult, StepError> {
        let items = self.list_items(instance_id, &params.prefix).await?;
        info!(items = items.len(), "Listed work items");

        Ok(self.process(instance_id, &items).await?)
    }

    /// Run the memoized listing step
    pub async fn list_items(
        &self,
        instance_id: Uuid,
        prefix: &str,
    ) -> Result<Vec<WorkItem>, StepError> {
        let step = StepName::new(StepPurpose::List, prefix);
        let objects = self.objects.as_ref();

        self.runner
            .run(instance_id, &step, &self.settings.list_retry, move || async move {
                objects
                    .list(prefix)
                    .await
                    .with_context(|| format!("Failed to list objects under '{}'", prefix))
            })
            .await
    }

    /// Process every item, isolating per-item failures
    pub async fn process(
        &self,
        instance_id: Uuid,
        items: &[WorkItem],
    ) -> Result<BatchResult, LedgerError> {
        let mut results = Vec::new();
        let mut failures = Vec::new();

        for item in items {
            match self.process_item(instance_id, item).await? {
                Ok(outcome) => {
                    info!(
                        key = %outcome.key,
                        classification = %outcome.classification,
                        confidence = outcome.confidence,
                        "Item processed"
                    );
                    results.push(outcome);
                }
                Err(failure) => {
                    warn!(
                        key = %failure.key,
                        step = %failure.step,
                        error = %failure.error,
                        "Item failed, continuing with next item"
                    );
                    failures.push(failure);
                }
            }
        }

        Ok(BatchResult::new(items.len(), results, failures))
    }

    /// Classify then update one item
    pub async fn process_item(
        &self,
        instance_id: Uuid,
        item: &WorkItem,
    ) -> Result<ItemResult, LedgerError> {
        let classification = match isolate(
            item,
            StepPurpose::Classify,
            self.classify(instance_id, item).await,
        )? {
            Ok(classification) => classification,
            Err(failure) => return Ok(Err(failure)),
        };

        isolate(
            item,
            StepPurpose::Update,
            self.update(instance_id, item, &classification).await,
        )
    }

    /// Fetch the payload and label it. Runs under the default policy: no retry.
    async fn classify(
        &self,
        instance_id: Uuid,
        item: &WorkItem,
    ) -> Result<Classification, StepError> {
        let step = StepName::new(StepPurpose::Classify, &item.key);
        let objects = self.objects.as_ref();
        let classifier = self.classifier.as_ref();
        let key = item.key.as_str();

        self.runner
            .run(instance_id, &step, &RetryPolicy::default(), move || async move {
                let object = objects
                    .get(key)
                    .await
                    .with_context(|| format!("Failed to fetch '{}'", key))?
                    .ok_or_else(|| PermanentFailure::new(format!("Object '{}' not found", key)))?;

                let predictions = classifier
                    .infer(&object.payload)
                    .await
                    .with_context(|| format!("Failed to classify '{}'", key))?;
                drop(object);

                let top = predictions.into_iter().next().ok_or_else(|| {
                    PermanentFailure::new(format!("Classifier returned no predictions for '{}'", key))
                })?;

                Ok(Classification {
                    label: top.label,
                    confidence: top.score,
                })
            })
            .await
    }

    /// Write the object back with the classification merged into its metadata
    async fn update(
        &self,
        instance_id: Uuid,
        item: &WorkItem,
        classification: &Classification,
    ) -> Result<ItemOutcome, StepError> {
        let step = StepName::new(StepPurpose::Update, &item.key);
        let objects = self.objects.as_ref();
        let key = item.key.as_str();

        self.runner
            .run(instance_id, &step, &self.settings.update_retry, move || async move {
                let object = objects
                    .get(key)
                    .await
                    .with_context(|| format!("Failed to fetch '{}'", key))?
                    .ok_or_else(|| PermanentFailure::new(format!("Object '{}' not found", key)))?;

                let processed_at = Utc::now().trunc_subsecs(3);
                let mut metadata = object.metadata;
                metadata.insert(CLASSIFICATION_FIELD.to_string(), classification.label.clone());
                metadata.insert(
                    PROCESSED_AT_FIELD.to_string(),
                    processed_at.to_rfc3339_opts(SecondsFormat::Millis, true),
                );

                objects
                    .put(key, object.payload, metadata)
                    .await
                    .with_context(|| format!("Failed to write '{}'", key))?;

                Ok(ItemOutcome {
                    key: key.to_string(),
                    classification: classification.label.clone(),
                    confidence: classification.confidence,
                    processed_at,
                })
            })
            .await
    }
}

/// Catch a step failure at the item boundary; ledger failures pass through
fn isolate<T>(
    item: &WorkItem,
    purpose: StepPurpose,
    result: Result<T, StepError>,
) -> Result<Result<T, ItemFailure>, LedgerError> {
    match result {
        Ok(value) => Ok(Ok(value)),
        Err(StepError::Fatal(e)) => Err(e),
        Err(e) => Ok(Err(ItemFailure {
            key: item.key.clone(),
            step: purpose,
            error: e.to_string(),
        })),
    }
}
