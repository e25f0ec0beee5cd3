//! Instance state and reconstruction from events.
//!
//! An Instance is one durable run of the orchestrator over a batch.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use super::batch::BatchResult;
use super::events::{Event, EventType, StepStatus};

/// Namespace selected when the caller does not supply a prefix
pub const DEFAULT_PREFIX: &str = "images/";

/// Caller-supplied input, immutable for the instance's lifetime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceParams {
    /// Key prefix used to select work items
    pub prefix: String,
}

impl InstanceParams {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Default for InstanceParams {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX)
    }
}

/// Lifecycle status of an instance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    #[default]
    Running,
    Completed,
    Errored,
}

impl InstanceStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }

    /// Status only moves forward: running -> {completed, errored}
    pub fn can_transition_to(self, next: InstanceStatus) -> bool {
        matches!(self, Self::Running) && next.is_terminal()
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Errored => "errored",
        };
        f.write_str(s)
    }
}

/// Latest known state of one step
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub state: StepStatus,

    /// Attempts started so far
    pub attempt: u32,

    pub last_error: Option<String>,
}

/// One orchestration run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub id: Uuid,
    pub params: InstanceParams,
    pub status: InstanceStatus,
    pub created_at: DateTime<Utc>,

    /// When the instance reached a terminal status
    pub finished_at: Option<DateTime<Utc>>,

    /// Step name -> latest state
    pub steps: BTreeMap<String, StepRecord>,

    /// Attached only on `completed`
    pub result: Option<BatchResult>,

    /// Terminating error, only on `errored`
    pub error: Option<String>,
}

impl Instance {
    /// Create a new running instance
    pub fn new(id: Uuid, params: InstanceParams) -> Self {
        Self {
            id,
            params,
            status: InstanceStatus::Running,
            created_at: Utc::now(),
            finished_at: None,
            steps: BTreeMap::new(),
            result: None,
            error: None,
        }
    }

    /// Reconstruct instance state from a sequence of events
    pub fn from_events(events: &[Event]) -> Option<Self> {
        let first_event = events.first()?;

        let mut instance = Self::new(first_event.instance_id, InstanceParams::default());
        instance.created_at = first_event.timestamp;

        for (i, event) in events.iter().enumerate() {
            // Params are fixed by the first creation event
            if i > 0 && event.event_type == EventType::InstanceCreated {
                warn!(instance_id = %instance.id, "Ignoring duplicate creation event");
                continue;
            }
            instance.apply_event(event);
        }

        Some(instance)
    }

    /// Apply a single event to update instance state
    fn apply_event(&mut self, event: &Event) {
        match event.event_type {
            EventType::InstanceCreated => {
                if let Some(params) = event
                    .output
                    .as_ref()
                    .and_then(|v| serde_json::from_value(v.clone()).ok())
                {
                    self.params = params;
                }
                self.created_at = event.timestamp;
            }
            EventType::InstanceCompleted => {
                if !self.status.can_transition_to(InstanceStatus::Completed) {
                    warn!(instance_id = %self.id, status = %self.status, "Ignoring late completion event");
                    return;
                }
                self.status = InstanceStatus::Completed;
                self.finished_at = Some(event.timestamp);
                self.result = event
                    .output
                    .as_ref()
                    .and_then(|v| serde_json::from_value(v.clone()).ok());
            }
            EventType::InstanceErrored => {
                if !self.status.can_transition_to(InstanceStatus::Errored) {
                    warn!(instance_id = %self.id, status = %self.status, "Ignoring late error event");
                    return;
                }
                self.status = InstanceStatus::Errored;
                self.finished_at = Some(event.timestamp);
                self.error = Some(event.error.clone().unwrap_or_default());
            }
            EventType::StepStarted
            | EventType::StepRetrying
            | EventType::StepSucceeded
            | EventType::StepFailed => {
                let Some(ref step) = event.step else {
                    return;
                };
                let record = self.steps.entry(step.to_string()).or_default();
                if record.state.is_terminal() {
                    return;
                }
                record.state = event.status;
                if let Some(attempt) = event.attempt {
                    record.attempt = record.attempt.max(attempt);
                }
                if event.error.is_some() {
                    record.last_error = event.error.clone();
                }
            }
        }
    }

    /// Check if the instance is still in progress
    pub fn is_running(&self) -> bool {
        self.status == InstanceStatus::Running
    }

    /// Check if a specific step has succeeded
    pub fn is_step_succeeded(&self, step_name: &str) -> bool {
        self.steps
            .get(step_name)
            .map(|s| s.state == StepStatus::Succeeded)
            .unwrap_or(false)
    }

    /// Point-in-time view for status queries
    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            id: self.id,
            status: self.status,
            created_at: self.created_at,
            finished_at: self.finished_at,
            steps: self.steps.clone(),
            result: self.result.clone(),
            error: self.error.clone(),
        }
    }
}

/// Status query response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub id: Uuid,
    pub status: InstanceStatus,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub steps: BTreeMap<String, StepRecord>,
    pub result: Option<BatchResult>,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::memo::{StepName, StepPurpose};

    fn lifecycle(instance_id: Uuid, event_type: EventType) -> Event {
        Event::new(instance_id, None, event_type, "lifecycle", StepStatus::Running)
    }

    #[test]
    fn test_instance_creation() {
        let id = Uuid::new_v4();
        let instance = Instance::new(id, InstanceParams::default());

        assert_eq!(instance.id, id);
        assert_eq!(instance.params.prefix, DEFAULT_PREFIX);
        assert!(instance.is_running());
    }

    #[test]
    fn test_instance_from_events() {
        let id = Uuid::new_v4();
        let step = StepName::new(StepPurpose::Classify, "images/a.jpg");
        let result = BatchResult::new(1, Vec::new(), Vec::new());

        let events = vec![
            lifecycle(id, EventType::InstanceCreated)
                .with_output(serde_json::to_value(InstanceParams::new("docs/")).unwrap()),
            Event::new(
                id,
                Some(step.clone()),
                EventType::StepStarted,
                "started",
                StepStatus::Running,
            )
            .with_attempt(1),
            Event::new(
                id,
                Some(step.clone()),
                EventType::StepSucceeded,
                "done",
                StepStatus::Succeeded,
            )
            .with_attempt(1),
            lifecycle(id, EventType::InstanceCompleted)
                .with_output(serde_json::to_value(&result).unwrap()),
        ];

        let instance = Instance::from_events(&events).unwrap();

        assert_eq!(instance.id, id);
        assert_eq!(instance.params.prefix, "docs/");
        assert_eq!(instance.status, InstanceStatus::Completed);
        assert!(instance.is_step_succeeded(step.as_str()));
        assert_eq!(instance.result, Some(result));
    }

    #[test]
    fn test_status_never_regresses() {
        let id = Uuid::new_v4();
        let events = vec![
            lifecycle(id, EventType::InstanceCreated),
            lifecycle(id, EventType::InstanceErrored).with_error("listing failed"),
            lifecycle(id, EventType::InstanceCompleted),
            lifecycle(id, EventType::InstanceCreated),
        ];

        let instance = Instance::from_events(&events).unwrap();

        assert_eq!(instance.status, InstanceStatus::Errored);
        assert!(instance.result.is_none());
        assert_eq!(instance.error.as_deref(), Some("listing failed"));
    }

    #[test]
    fn test_later_creation_event_keeps_params() {
        let id = Uuid::new_v4();
        let first = lifecycle(id, EventType::InstanceCreated)
            .with_output(serde_json::to_value(InstanceParams::new("docs/")).unwrap());
        let mut second = lifecycle(id, EventType::InstanceCreated)
            .with_output(serde_json::to_value(InstanceParams::new("other/")).unwrap());
        second.timestamp = first.timestamp + chrono::Duration::seconds(60);

        let instance = Instance::from_events(&[first.clone(), second]).unwrap();

        assert_eq!(instance.params.prefix, "docs/");
        assert_eq!(instance.created_at, first.timestamp);
        assert!(instance.is_running());
    }

    #[test]
    fn test_transitions() {
        assert!(InstanceStatus::Running.can_transition_to(InstanceStatus::Completed));
        assert!(InstanceStatus::Running.can_transition_to(InstanceStatus::Errored));
        assert!(!InstanceStatus::Completed.can_transition_to(InstanceStatus::Errored));
        assert!(!InstanceStatus::Errored.can_transition_to(InstanceStatus::Running));
        assert!(!InstanceStatus::Running.can_transition_to(InstanceStatus::Running));
    }
}
