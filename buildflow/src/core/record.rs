//! Persisted build outcomes and grouped set records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::config::IdRev;
use super::status::{BuildCoordinationStatus, SetStatus};
use super::task::{BuildResult, BuildTask};

/// Persisted outcome of one build task.
///
/// Records are written exactly once, when the owning task reaches a terminal
/// status, and never change afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildRecord {
    /// Record id, equal to the task id it was produced from.
    pub id: Uuid,
    /// The audited configuration that was built.
    pub id_rev: IdRev,
    /// Configuration name.
    pub name: String,
    /// The terminal status the task ended in.
    pub status: BuildCoordinationStatus,
    /// Input fingerprint the task was built from.
    pub fingerprint: String,
    /// Whether the artifacts are temporary (pre-release).
    pub temporary_build: bool,
    /// When the task was accepted for scheduling.
    pub submit_time: Option<DateTime<Utc>>,
    /// When the build started.
    pub start_time: Option<DateTime<Utc>>,
    /// When the task reached its terminal status.
    pub end_time: Option<DateTime<Utc>>,
    /// References to produced artifacts.
    #[serde(default)]
    pub artifacts: Vec<String>,
    /// Reference to the build logs.
    pub logs_ref: Option<String>,
    /// Record ids of the dependencies this build consumed.
    #[serde(default)]
    pub dependency_record_ids: Vec<Uuid>,
    /// Human-readable explanation of the terminal status.
    pub status_description: Option<String>,
    /// Correlates every record of one submission.
    pub correlation_id: Uuid,
    /// The prior record that satisfied this task, when no rebuild ran.
    pub no_rebuild_cause: Option<Uuid>,
}

impl BuildRecord {
    /// Builds the record for a task that reached a terminal status.
    #[must_use]
    pub fn from_task(task: &BuildTask, result: Option<&BuildResult>) -> Self {
        Self {
            id: task.id,
            id_rev: task.id_rev.clone(),
            name: task.name.clone(),
            status: task.status,
            fingerprint: task.fingerprint.clone(),
            temporary_build: task.options.temporary_build,
            submit_time: task.submit_time,
            start_time: task.start_time,
            end_time: task.end_time,
            artifacts: result.map(|r| r.artifacts.clone()).unwrap_or_default(),
            logs_ref: result.and_then(|r| r.logs_ref.clone()),
            dependency_record_ids: task.dependency_ids.iter().copied().collect(),
            status_description: task.status_description.clone(),
            correlation_id: task.correlation_id,
            no_rebuild_cause: task.no_rebuild_cause,
        }
    }

    /// Returns true if this record can satisfy a later identical request.
    #[must_use]
    pub fn is_successful(&self) -> bool {
        self.status == BuildCoordinationStatus::Done
    }
}

/// A named group of build tasks submitted and tracked together.
///
/// The status is only ever written directly as [`SetStatus::Building`]; every
/// later value is derived from member statuses by the aggregator through an
/// optimistic version check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfigSetRecord {
    /// The set record id.
    pub id: Uuid,
    /// Human-readable set name.
    pub name: String,
    /// Current aggregate status.
    pub status: SetStatus,
    /// Optimistic concurrency version, bumped on every status write.
    pub version: u64,
    /// Member task ids.
    pub task_ids: Vec<Uuid>,
    /// When the set was submitted.
    pub start_time: DateTime<Utc>,
    /// When the set reached a terminal status.
    pub end_time: Option<DateTime<Utc>>,
}

impl BuildConfigSetRecord {
    /// Creates a new set record in the initial `Building` state.
    #[must_use]
    pub fn new(name: impl Into<String>, task_ids: Vec<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            status: SetStatus::Building,
            version: 0,
            task_ids,
            start_time: Utc::now(),
            end_time: None,
        }
    }
}

/// Synchronous answer to a `build_set` call.
///
/// Rejections are carried here as a value with a human-readable description;
/// every other outcome is observed through status polling or events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildSetTask {
    /// Id of the backing set record, when one was created.
    pub id: Uuid,
    /// Status at submission time: `Building`, `Rejected` or `NoRebuildRequired`.
    pub status: SetStatus,
    /// Rejection reason or submission summary.
    pub description: Option<String>,
    /// Member task ids.
    pub task_ids: Vec<Uuid>,
    /// Correlates the tasks of this submission.
    pub correlation_id: Uuid,
}

impl BuildSetTask {
    /// A synchronous rejection with a reason. No tasks were created.
    #[must_use]
    pub fn rejected(description: impl Into<String>, correlation_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            status: SetStatus::Rejected,
            description: Some(description.into()),
            task_ids: Vec::new(),
            correlation_id,
        }
    }

    /// Returns true if the submission was refused.
    #[must_use]
    pub fn is_rejected(&self) -> bool {
        self.status == SetStatus::Rejected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::BuildConfiguration;
    use crate::core::task::BuildOptions;

    #[test]
    fn test_record_from_task_copies_terminal_state() {
        let config = BuildConfiguration::new("libfoo", "mvn deploy");
        let mut task = BuildTask::new(&config.audit(), BuildOptions::default(), Uuid::new_v4());
        task.status = BuildCoordinationStatus::Done;
        task.end_time = Some(Utc::now());

        let result = BuildResult::success().with_artifacts(vec!["libfoo-1.jar".to_string()]);
        let record = BuildRecord::from_task(&task, Some(&result));

        assert_eq!(record.id, task.id);
        assert_eq!(record.status, BuildCoordinationStatus::Done);
        assert_eq!(record.artifacts, vec!["libfoo-1.jar".to_string()]);
        assert!(record.is_successful());
    }

    #[test]
    fn test_record_without_result_has_no_artifacts() {
        let config = BuildConfiguration::new("libfoo", "mvn deploy");
        let mut task = BuildTask::new(&config.audit(), BuildOptions::default(), Uuid::new_v4());
        task.status = BuildCoordinationStatus::RejectedFailedDependencies;

        let record = BuildRecord::from_task(&task, None);
        assert!(record.artifacts.is_empty());
        assert!(!record.is_successful());
    }

    #[test]
    fn test_set_record_starts_building_at_version_zero() {
        let record = BuildConfigSetRecord::new("nightly", vec![Uuid::new_v4()]);
        assert_eq!(record.status, SetStatus::Building);
        assert_eq!(record.version, 0);
        assert!(record.end_time.is_none());
    }

    #[test]
    fn test_rejected_set_task_has_description() {
        let set = BuildSetTask::rejected("Cycle dependencies found: a -> b -> a", Uuid::new_v4());
        assert!(set.is_rejected());
        assert!(set.description.as_deref().unwrap_or("").contains("Cycle"));
        assert!(set.task_ids.is_empty());
    }
}
