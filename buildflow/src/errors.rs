//! Error types for the buildflow engine.
//!
//! Validation failures are expected outcomes and travel as values; callers
//! inspect them to produce synchronous rejections. Only infrastructure
//! problems (scheduler, datastore, push transport) surface as hard errors.

use thiserror::Error;
use uuid::Uuid;

use crate::core::BuildCoordinationStatus;

/// The main error type for buildflow operations.
#[derive(Debug, Error)]
pub enum BuildflowError {
    /// The submitted configuration set failed graph validation.
    #[error("{0}")]
    Validation(#[from] GraphValidationError),

    /// The external scheduler reported a failure.
    #[error("{0}")]
    Scheduler(#[from] SchedulerError),

    /// The datastore reported a failure.
    #[error("{0}")]
    Datastore(#[from] DatastoreError),

    /// The downstream push client reported a failure.
    #[error("{0}")]
    PushClient(#[from] PushClientError),

    /// A push completion arrived for a build with no in-progress marker.
    #[error("no push in progress for build record {record_id}")]
    PushNotInProgress {
        /// The build record id the completion referenced.
        record_id: Uuid,
    },

    /// A task id was not known to the coordinator.
    #[error("unknown build task {0}")]
    UnknownTask(Uuid),

    /// A status transition violated the task state machine.
    #[error("invalid status transition {from} -> {to}")]
    InvalidTransition {
        /// The status the task currently holds.
        from: BuildCoordinationStatus,
        /// The status that was requested.
        to: BuildCoordinationStatus,
    },

    /// A polling monitor failed.
    #[error("{0}")]
    Monitor(#[from] MonitorError),

    /// A generic internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Validation errors produced while assembling a dependency graph.
///
/// These are pure rejection reasons, never faults: no partial graph exists
/// when one is returned.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphValidationError {
    /// A configuration declares a dependency on itself.
    #[error("build configuration '{name}' depends on itself")]
    SelfDependency {
        /// Name of the offending configuration.
        name: String,
    },

    /// The dependency relation contains a cycle.
    #[error("Cycle dependencies found: {}", .path.join(" -> "))]
    Cycle {
        /// Configuration names along the cycle, first repeated last.
        path: Vec<String>,
    },

    /// A declared dependency is not part of the submitted set.
    #[error("build configuration '{name}' depends on '{dependency}', which is not in the submitted set")]
    MissingDependency {
        /// Name of the configuration with the dangling reference.
        name: String,
        /// The unresolved dependency id.
        dependency: Uuid,
    },
}

/// Errors at the external scheduler boundary.
#[derive(Debug, Clone, Error)]
pub enum SchedulerError {
    /// The scheduler could not be reached.
    #[error("scheduler unavailable: {0}")]
    Unavailable(String),

    /// The scheduler refused the submission.
    #[error("scheduler rejected submission: {0}")]
    Rejected(String),
}

/// Errors at the persistence boundary.
#[derive(Debug, Clone, Error)]
pub enum DatastoreError {
    /// No entity with the given id exists.
    #[error("not found: {0}")]
    NotFound(Uuid),

    /// An optimistic version check failed.
    #[error("version conflict on {id}: expected {expected}")]
    Conflict {
        /// Id of the contested record.
        id: Uuid,
        /// The version the caller expected.
        expected: u64,
    },

    /// The backing store failed.
    #[error("datastore backend error: {0}")]
    Backend(String),
}

/// Errors at the downstream push boundary.
#[derive(Debug, Clone, Error)]
pub enum PushClientError {
    /// The remote system could not be reached.
    #[error("push transport error: {0}")]
    Transport(String),

    /// The remote system refused the import.
    #[error("push rejected by remote system: {0}")]
    Rejected(String),
}

/// Errors produced by a polling monitor.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum MonitorError {
    /// The deadline elapsed before the condition became true.
    #[error("monitor timed out before the condition was satisfied")]
    Timeout,

    /// The monitor was cancelled before completion.
    #[error("monitor was cancelled")]
    Cancelled,
}
