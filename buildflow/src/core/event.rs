//! Typed events emitted by the coordinator and push manager.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use super::status::{BuildCoordinationStatus, SetStatus};

/// An event fired on the event boundary.
///
/// Subscribers (notification and messaging layers) are external; events are
/// plain data so any sink can serialize or route them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildEvent {
    /// The event type (e.g., "build.completed").
    #[serde(rename = "type")]
    pub event_type: String,

    /// When the event occurred (ISO 8601).
    pub timestamp: String,

    /// The event payload data.
    #[serde(default)]
    pub data: HashMap<String, serde_json::Value>,
}

impl BuildEvent {
    /// Creates a new event of the given type.
    #[must_use]
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            timestamp: Utc::now().to_rfc3339(),
            data: HashMap::new(),
        }
    }

    /// Adds a data field to the event.
    #[must_use]
    pub fn add_data(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// A task was accepted and handed to the scheduler.
    #[must_use]
    pub fn task_enqueued(task_id: Uuid, name: &str) -> Self {
        Self::new("build.enqueued")
            .add_data("task_id", serde_json::json!(task_id))
            .add_data("name", serde_json::json!(name))
    }

    /// The scheduler reported a task as running.
    #[must_use]
    pub fn task_started(task_id: Uuid) -> Self {
        Self::new("build.started").add_data("task_id", serde_json::json!(task_id))
    }

    /// A task reached a terminal status.
    #[must_use]
    pub fn task_completed(task_id: Uuid, status: BuildCoordinationStatus) -> Self {
        Self::new("build.completed")
            .add_data("task_id", serde_json::json!(task_id))
            .add_data("status", serde_json::json!(status))
    }

    /// A task was refused because a dependency terminated unsuccessfully.
    #[must_use]
    pub fn dependency_rejected(task_id: Uuid, failed_dependency: &str) -> Self {
        Self::new("build.dependency_rejected")
            .add_data("task_id", serde_json::json!(task_id))
            .add_data("failed_dependency", serde_json::json!(failed_dependency))
    }

    /// A set record was created and submitted.
    #[must_use]
    pub fn set_created(set_id: Uuid, task_count: usize) -> Self {
        Self::new("build_set.created")
            .add_data("set_id", serde_json::json!(set_id))
            .add_data("task_count", serde_json::json!(task_count))
    }

    /// A submission was refused during validation.
    #[must_use]
    pub fn set_rejected(reason: &str) -> Self {
        Self::new("build_set.rejected").add_data("reason", serde_json::json!(reason))
    }

    /// A set record reached its aggregate terminal status.
    #[must_use]
    pub fn set_finalized(set_id: Uuid, status: SetStatus) -> Self {
        Self::new("build_set.finalized")
            .add_data("set_id", serde_json::json!(set_id))
            .add_data("status", serde_json::json!(status))
    }

    /// A push was accepted for downstream submission.
    #[must_use]
    pub fn push_accepted(record_id: Uuid, tag: &str) -> Self {
        Self::new("push.accepted")
            .add_data("record_id", serde_json::json!(record_id))
            .add_data("tag", serde_json::json!(tag))
    }

    /// A push finished, one way or the other.
    #[must_use]
    pub fn push_completed(record_id: Uuid, status: &str) -> Self {
        Self::new("push.completed")
            .add_data("record_id", serde_json::json!(record_id))
            .add_data("status", serde_json::json!(status))
    }

    /// An in-progress push was cancelled.
    #[must_use]
    pub fn push_cancelled(record_id: Uuid) -> Self {
        Self::new("push.cancelled").add_data("record_id", serde_json::json!(record_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_creation() {
        let event = BuildEvent::new("test.event");
        assert_eq!(event.event_type, "test.event");
        assert!(event.data.is_empty());
        assert!(!event.timestamp.is_empty());
    }

    #[test]
    fn test_task_completed_event() {
        let id = Uuid::new_v4();
        let event = BuildEvent::task_completed(id, BuildCoordinationStatus::Done);
        assert_eq!(event.event_type, "build.completed");
        assert_eq!(event.data.get("status"), Some(&serde_json::json!("done")));
    }

    #[test]
    fn test_event_serialization_round_trip() {
        let event = BuildEvent::set_rejected("Cycle dependencies found: a -> b -> a");
        let json = serde_json::to_string(&event).unwrap();
        let parsed: BuildEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.event_type, "build_set.rejected");
        assert_eq!(parsed.data.get("reason"), event.data.get("reason"));
    }
}
