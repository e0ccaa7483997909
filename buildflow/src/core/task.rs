//! Build tasks and their submission options.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

use super::config::{BuildConfigurationAudited, IdRev};
use super::status::{BuildCoordinationStatus, CompletionStatus};

/// Policy governing whether unchanged configurations are rebuilt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebuildMode {
    /// Always rebuild, regardless of prior records.
    Force,
    /// Rebuild when the configuration changed or any dependency rebuilds.
    ImplicitDependencyCheck,
    /// Rebuild only explicitly dirty configurations and their dependants.
    ExplicitDependencyCheck,
}

impl Default for RebuildMode {
    fn default() -> Self {
        Self::ImplicitDependencyCheck
    }
}

impl fmt::Display for RebuildMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Force => write!(f, "force"),
            Self::ImplicitDependencyCheck => write!(f, "implicit_dependency_check"),
            Self::ExplicitDependencyCheck => write!(f, "explicit_dependency_check"),
        }
    }
}

/// Preference for aligning dependency versions during the build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlignmentPreference {
    /// Align against persistent (released) dependency versions.
    PreferPersistent,
    /// Align against temporary (pre-release) dependency versions.
    PreferTemporary,
}

impl Default for AlignmentPreference {
    fn default() -> Self {
        Self::PreferPersistent
    }
}

/// Options governing one build submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BuildOptions {
    /// The rebuild policy for the submission.
    pub rebuild_mode: RebuildMode,
    /// Whether the produced artifacts are temporary (pre-release).
    pub temporary_build: bool,
    /// Dependency version alignment preference.
    pub alignment_preference: AlignmentPreference,
}

impl BuildOptions {
    /// Options that force a rebuild of everything.
    #[must_use]
    pub fn forced() -> Self {
        Self {
            rebuild_mode: RebuildMode::Force,
            ..Self::default()
        }
    }

    /// Options for a temporary (pre-release) build.
    #[must_use]
    pub fn temporary() -> Self {
        Self {
            temporary_build: true,
            alignment_preference: AlignmentPreference::PreferTemporary,
            ..Self::default()
        }
    }
}

/// One scheduled build of a specific audited configuration.
///
/// Owned exclusively by the coordinator until it reaches a terminal status,
/// then handed to persistence as a [`BuildRecord`](super::record::BuildRecord).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildTask {
    /// The task id.
    pub id: Uuid,
    /// The audited configuration this task builds.
    pub id_rev: IdRev,
    /// Configuration name, for logs and descriptions.
    pub name: String,
    /// Current lifecycle status.
    pub status: BuildCoordinationStatus,
    /// When the task was accepted for scheduling.
    pub submit_time: Option<DateTime<Utc>>,
    /// When the scheduler reported the build as started.
    pub start_time: Option<DateTime<Utc>>,
    /// When the task reached a terminal status.
    pub end_time: Option<DateTime<Utc>>,
    /// Task ids this task depends on.
    pub dependency_ids: HashSet<Uuid>,
    /// Task ids depending on this task.
    pub dependant_ids: HashSet<Uuid>,
    /// The options the task was submitted under.
    pub options: BuildOptions,
    /// Human-readable explanation of the current status.
    pub status_description: Option<String>,
    /// Correlates every task of one submission.
    pub correlation_id: Uuid,
    /// Input fingerprint of the audited configuration under `options`.
    pub fingerprint: String,
    /// Whether the configuration was explicitly marked dirty.
    pub explicitly_dirty: bool,
    /// The prior record satisfying this task, when short-circuited.
    pub no_rebuild_cause: Option<Uuid>,
}

impl BuildTask {
    /// Creates a new task for an audited configuration.
    #[must_use]
    pub fn new(
        audited: &BuildConfigurationAudited,
        options: BuildOptions,
        correlation_id: Uuid,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            id_rev: audited.id_rev.clone(),
            name: audited.name.clone(),
            status: BuildCoordinationStatus::New,
            submit_time: None,
            start_time: None,
            end_time: None,
            dependency_ids: HashSet::new(),
            dependant_ids: HashSet::new(),
            options,
            status_description: None,
            correlation_id,
            fingerprint: audited.fingerprint(&options),
            explicitly_dirty: audited.explicitly_dirty,
            no_rebuild_cause: None,
        }
    }

    /// Returns true if the task has reached a terminal status.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// The minimal descriptor sent across the scheduler boundary.
    #[must_use]
    pub fn to_remote(&self) -> RemoteBuildTask {
        RemoteBuildTask {
            id: self.id,
            dependency_ids: self.dependency_ids.iter().copied().collect(),
            options: self.options,
            content_id: self.id_rev.to_string(),
        }
    }
}

/// Minimal task descriptor for the scheduler submission round-trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteBuildTask {
    /// The task id.
    pub id: Uuid,
    /// Task ids this task waits for.
    pub dependency_ids: Vec<Uuid>,
    /// The options the task was submitted under.
    pub options: BuildOptions,
    /// Identifies the build content, as (configuration id):(revision).
    pub content_id: String,
}

/// Result payload delivered by the scheduler callback for one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildResult {
    /// The reported outcome.
    pub completion: CompletionStatus,
    /// References to produced artifacts.
    #[serde(default)]
    pub artifacts: Vec<String>,
    /// Reference to the build logs.
    pub logs_ref: Option<String>,
    /// True when a successful build carries artifact repair problems.
    #[serde(default)]
    pub artifact_problems: bool,
    /// Free-form message from the scheduler.
    pub message: Option<String>,
}

impl BuildResult {
    /// A clean success result.
    #[must_use]
    pub fn success() -> Self {
        Self {
            completion: CompletionStatus::Success,
            artifacts: Vec::new(),
            logs_ref: None,
            artifact_problems: false,
            message: None,
        }
    }

    /// A failure result with a message.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            completion: CompletionStatus::Failed,
            artifacts: Vec::new(),
            logs_ref: None,
            artifact_problems: false,
            message: Some(message.into()),
        }
    }

    /// A result with the given completion status.
    #[must_use]
    pub fn with_completion(completion: CompletionStatus) -> Self {
        Self {
            completion,
            artifacts: Vec::new(),
            logs_ref: None,
            artifact_problems: false,
            message: None,
        }
    }

    /// Attaches artifact references.
    #[must_use]
    pub fn with_artifacts(mut self, artifacts: Vec<String>) -> Self {
        self.artifacts = artifacts;
        self
    }

    /// Flags artifact repair problems on a success.
    #[must_use]
    pub fn with_artifact_problems(mut self) -> Self {
        self.artifact_problems = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::BuildConfiguration;

    #[test]
    fn test_new_task_starts_in_new() {
        let config = BuildConfiguration::new("libfoo", "mvn deploy");
        let task = BuildTask::new(&config.audit(), BuildOptions::default(), Uuid::new_v4());
        assert_eq!(task.status, BuildCoordinationStatus::New);
        assert!(!task.is_terminal());
        assert!(task.submit_time.is_none());
    }

    #[test]
    fn test_to_remote_carries_content_id() {
        let config = BuildConfiguration::new("libfoo", "mvn deploy").with_revision("3");
        let task = BuildTask::new(&config.audit(), BuildOptions::default(), Uuid::new_v4());
        let remote = task.to_remote();
        assert_eq!(remote.id, task.id);
        assert_eq!(remote.content_id, format!("{}:3", config.id));
    }

    #[test]
    fn test_rebuild_mode_default_is_implicit() {
        assert_eq!(RebuildMode::default(), RebuildMode::ImplicitDependencyCheck);
    }

    #[test]
    fn test_build_options_serialization() {
        let options = BuildOptions::temporary();
        let json = serde_json::to_string(&options).unwrap();
        let parsed: BuildOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, options);
        assert!(parsed.temporary_build);
    }
}
