//! Task and set status enums with their transition and aggregation tables.
//!
//! The cross-mapping from scheduler outcomes to coordinator statuses and the
//! group aggregation rule live here as explicit lookup functions so they can
//! be unit tested away from any call site.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome reported by the external execution scheduler for one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    /// The build ran and produced its artifacts.
    Success,
    /// The build ran and failed.
    Failed,
    /// The build was cancelled while scheduled or running.
    Cancelled,
    /// The scheduler hit an infrastructure problem running the build.
    SystemError,
    /// The scheduler confirmed no rebuild was necessary.
    NoRebuildRequired,
}

impl fmt::Display for CompletionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::SystemError => write!(f, "system_error"),
            Self::NoRebuildRequired => write!(f, "no_rebuild_required"),
        }
    }
}

impl CompletionStatus {
    /// Maps a scheduler outcome to the coordinator-owned terminal status.
    ///
    /// A success that carries artifact repair problems is degraded to
    /// [`BuildCoordinationStatus::DoneWithErrors`].
    #[must_use]
    pub fn coordination_status(self, artifact_problems: bool) -> BuildCoordinationStatus {
        match self {
            Self::Success if artifact_problems => BuildCoordinationStatus::DoneWithErrors,
            Self::Success => BuildCoordinationStatus::Done,
            Self::Failed => BuildCoordinationStatus::DoneWithErrors,
            Self::Cancelled => BuildCoordinationStatus::Cancelled,
            Self::SystemError => BuildCoordinationStatus::SystemError,
            Self::NoRebuildRequired => BuildCoordinationStatus::RejectedAlreadyBuilt,
        }
    }
}

/// Coordinator-owned lifecycle status of a build task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildCoordinationStatus {
    /// Created, not yet accepted for scheduling.
    New,
    /// Refused during validation or decision, never scheduled.
    Rejected,
    /// Short-circuited because a prior successful build satisfies the request.
    RejectedAlreadyBuilt,
    /// Refused because a dependency terminated unsuccessfully.
    RejectedFailedDependencies,
    /// Accepted and handed to the scheduler.
    Enqueued,
    /// The scheduler reported the build as running.
    Building,
    /// Completed successfully.
    Done,
    /// Completed, but the build or its artifacts carry errors.
    DoneWithErrors,
    /// An unrecoverable internal failure was recorded for this task.
    SystemError,
    /// Cancelled before completion.
    Cancelled,
}

impl Default for BuildCoordinationStatus {
    fn default() -> Self {
        Self::New
    }
}

impl fmt::Display for BuildCoordinationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::New => write!(f, "new"),
            Self::Rejected => write!(f, "rejected"),
            Self::RejectedAlreadyBuilt => write!(f, "rejected_already_built"),
            Self::RejectedFailedDependencies => write!(f, "rejected_failed_dependencies"),
            Self::Enqueued => write!(f, "enqueued"),
            Self::Building => write!(f, "building"),
            Self::Done => write!(f, "done"),
            Self::DoneWithErrors => write!(f, "done_with_errors"),
            Self::SystemError => write!(f, "system_error"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl BuildCoordinationStatus {
    /// Returns true if the status is terminal. Terminal statuses never change.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Rejected
                | Self::RejectedAlreadyBuilt
                | Self::RejectedFailedDependencies
                | Self::Done
                | Self::DoneWithErrors
                | Self::SystemError
                | Self::Cancelled
        )
    }

    /// Returns true if the status counts as a successful outcome.
    ///
    /// A build satisfied by a prior record is as good as a fresh success for
    /// dependants and for group aggregation.
    #[must_use]
    pub fn is_successful(&self) -> bool {
        matches!(self, Self::Done | Self::RejectedAlreadyBuilt)
    }

    /// Returns true if the status is a terminal failure.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(
            self,
            Self::Rejected
                | Self::RejectedFailedDependencies
                | Self::DoneWithErrors
                | Self::SystemError
        )
    }

    /// Returns true if the task has been handed to the scheduler.
    #[must_use]
    pub fn is_dispatched(&self) -> bool {
        matches!(self, Self::Building)
    }

    /// The task state machine, as an explicit transition table.
    ///
    /// New -> {Rejected, RejectedAlreadyBuilt, RejectedFailedDependencies, Enqueued};
    /// Enqueued -> {Building, any terminal}; Building -> {Done, DoneWithErrors,
    /// SystemError, Cancelled}. Terminal states admit nothing.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        match self {
            Self::New => matches!(
                next,
                Self::Rejected
                    | Self::RejectedAlreadyBuilt
                    | Self::RejectedFailedDependencies
                    | Self::Enqueued
            ),
            Self::Enqueued => matches!(
                next,
                Self::Building
                    | Self::Done
                    | Self::DoneWithErrors
                    | Self::SystemError
                    | Self::Cancelled
                    | Self::RejectedFailedDependencies
            ),
            Self::Building => matches!(
                next,
                Self::Done | Self::DoneWithErrors | Self::SystemError | Self::Cancelled
            ),
            _ => false,
        }
    }
}

/// Aggregate status of a build configuration set record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetStatus {
    /// Members are still in flight. The only status ever written directly.
    Building,
    /// Every member finished successfully.
    Success,
    /// At least one member failed.
    Failed,
    /// At least one member was cancelled and none failed.
    Cancelled,
    /// Every member was satisfied by a prior build.
    NoRebuildRequired,
    /// The set was refused during validation and never started.
    Rejected,
}

impl fmt::Display for SetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Building => write!(f, "building"),
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::NoRebuildRequired => write!(f, "no_rebuild_required"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

impl SetStatus {
    /// Returns true if the status is terminal for the group.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Building)
    }

    /// Derives the aggregate status from member task statuses.
    ///
    /// Returns `None` while any member is non-terminal; the record must not
    /// be rewritten until every member has settled. Failure dominates
    /// cancellation, which dominates success.
    #[must_use]
    pub fn aggregate(members: &[BuildCoordinationStatus]) -> Option<Self> {
        if members.is_empty() || members.iter().any(|s| !s.is_terminal()) {
            return None;
        }

        if members.iter().any(BuildCoordinationStatus::is_failed) {
            return Some(Self::Failed);
        }
        if members
            .iter()
            .any(|s| *s == BuildCoordinationStatus::Cancelled)
        {
            return Some(Self::Cancelled);
        }
        if members
            .iter()
            .all(|s| *s == BuildCoordinationStatus::RejectedAlreadyBuilt)
        {
            return Some(Self::NoRebuildRequired);
        }
        Some(Self::Success)
    }
}
