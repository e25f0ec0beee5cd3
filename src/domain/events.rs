//! Event types for the durable ledger.
//!
//! Every state change of an instance is recorded as an immutable event in an
//! append-only log. Instance state and step memoization are both derived by
//! replaying these events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::memo::StepName;

/// A single event in the append-only ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier for this event
    pub id: Uuid,

    /// When this event occurred (ISO 8601)
    pub timestamp: DateTime<Utc>,

    /// The instance this event belongs to
    pub instance_id: Uuid,

    /// Step this event refers to (None for instance lifecycle events)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<StepName>,

    /// Type of event
    pub event_type: EventType,

    /// Human-readable summary
    pub summary: String,

    /// Status of the step/instance after this event
    pub status: StepStatus,

    /// Attempt number (1-indexed) for step events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,

    /// Time taken in milliseconds (for finished attempts)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,

    /// Scheduled backoff before the next attempt (retry events only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,

    /// Error message if failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Serialized payload: step result, instance params or batch result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
}

impl Event {
    /// Create a new event with the current timestamp
    pub fn new(
        instance_id: Uuid,
        step: Option<StepName>,
        event_type: EventType,
        summary: impl Into<String>,
        status: StepStatus,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            instance_id,
            step,
            event_type,
            summary: summary.into(),
            status,
            attempt: None,
            duration_ms: None,
            delay_ms: None,
            error: None,
            output: None,
        }
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    /// Create an event with duration information
    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.delay_ms = Some(delay_ms);
        self
    }

    /// Create an event with error information
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_output(mut self, output: serde_json::Value) -> Self {
        self.output = Some(output);
        self
    }

    /// Whether this event closes a step for good
    pub fn is_step_terminal(&self) -> bool {
        matches!(
            self.event_type,
            EventType::StepSucceeded | EventType::StepFailed
        )
    }
}

/// Types of events that can occur during an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A new instance was created (output carries the params)
    InstanceCreated,

    /// The batch finished (output carries the batch result)
    InstanceCompleted,

    /// An infrastructure failure terminated the instance
    InstanceErrored,

    /// A step attempt started
    StepStarted,

    /// A step attempt failed and another attempt is scheduled
    StepRetrying,

    /// A step produced its result (terminal)
    StepSucceeded,

    /// A step exhausted its policy (terminal)
    StepFailed,
}

/// Status of a step or instance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Not yet started
    #[default]
    Pending,

    /// Currently executing
    Running,

    /// Failed, next attempt scheduled
    WaitingRetry,

    /// Completed successfully
    Succeeded,

    /// Failed permanently
    Failed,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::memo::StepPurpose;

    #[test]
    fn test_event_serialization() {
        let event = Event::new(
            Uuid::new_v4(),
            Some(StepName::new(StepPurpose::Classify, "images/cat.jpg")),
            EventType::StepStarted,
            "Starting classify step",
            StepStatus::Running,
        )
        .with_attempt(1);

        let json = serde_json::to_string(&event).unwrap();
        let parsed: Event = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.event_type, EventType::StepStarted);
        assert_eq!(parsed.status, StepStatus::Running);
        assert_eq!(parsed.step.unwrap().as_str(), "classify:images/cat.jpg");
        assert_eq!(parsed.attempt, Some(1));
    }

    #[test]
    fn test_optional_fields_are_omitted() {
        let event = Event::new(
            Uuid::new_v4(),
            None,
            EventType::InstanceCreated,
            "created",
            StepStatus::Running,
        );

        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("delay_ms"));
        assert!(!json.contains("\"step\""));
    }

    #[test]
    fn test_event_with_error() {
        let event = Event::new(
            Uuid::new_v4(),
            Some(StepName::new(StepPurpose::Update, "a")),
            EventType::StepFailed,
            "Failed update step",
            StepStatus::Failed,
        )
        .with_error("Connection timeout");

        assert_eq!(event.error, Some("Connection timeout".to_string()));
        assert!(event.is_step_terminal());
    }
}
