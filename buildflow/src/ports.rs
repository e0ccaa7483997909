//! External collaborator interfaces.
//!
//! The scheduler, persistence and downstream push systems are consumed
//! through these traits; driver implementations live outside this crate.
//! In-memory implementations for tests are in [`crate::testing`].

use async_trait::async_trait;
use uuid::Uuid;

use crate::core::{BuildConfigSetRecord, BuildRecord, IdRev, RemoteBuildTask, SetStatus, User};
use crate::errors::{DatastoreError, PushClientError, SchedulerError};
use crate::graph::Graph;
use crate::push::{PushPayload, PushResult};

/// The external execution scheduler.
///
/// The whole dependency graph goes over in one submission; the scheduler owns
/// dispatch ordering and resource allocation, and reports per-task outcomes
/// back through [`BuildCoordinator::complete_build`](crate::coordinator::BuildCoordinator::complete_build).
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Submits a validated graph for execution.
    async fn start_building(
        &self,
        graph: &Graph<RemoteBuildTask>,
        user: &User,
    ) -> Result<(), SchedulerError>;

    /// Requests cancellation of a dispatched task.
    ///
    /// Returns true when the scheduler acknowledged the cancellation.
    async fn cancel(&self, task_id: Uuid) -> Result<bool, SchedulerError>;
}

/// The persistence boundary.
#[async_trait]
pub trait BuildDatastore: Send + Sync {
    /// Fetches a build record by id.
    async fn get_record(&self, id: Uuid) -> Result<Option<BuildRecord>, DatastoreError>;

    /// Persists a build record. Records are immutable once written.
    async fn save_record(&self, record: BuildRecord) -> Result<(), DatastoreError>;

    /// The latest successful record for an audited configuration, filtered by
    /// the temporary flag.
    async fn get_latest_successful_record(
        &self,
        id_rev: &IdRev,
        temporary: bool,
    ) -> Result<Option<BuildRecord>, DatastoreError>;

    /// Whether no usable prior record satisfies the given fingerprint.
    ///
    /// Records listed in `exclude_ids` are ignored, so a caller can disregard
    /// records invalidated within the current batch.
    async fn requires_rebuild(
        &self,
        id_rev: &IdRev,
        fingerprint: &str,
        temporary: bool,
        exclude_ids: &[Uuid],
    ) -> Result<bool, DatastoreError> {
        match self.get_latest_successful_record(id_rev, temporary).await? {
            Some(record) if !exclude_ids.contains(&record.id) => {
                Ok(record.fingerprint != fingerprint)
            }
            _ => Ok(true),
        }
    }

    /// Persists a set record.
    async fn save_set_record(&self, record: BuildConfigSetRecord) -> Result<(), DatastoreError>;

    /// Fetches a set record by id.
    async fn get_set_record(
        &self,
        id: Uuid,
    ) -> Result<Option<BuildConfigSetRecord>, DatastoreError>;

    /// All set records still in the `Building` state.
    async fn sets_in_building(&self) -> Result<Vec<BuildConfigSetRecord>, DatastoreError>;

    /// Writes a set status iff the stored version matches `expected_version`.
    ///
    /// Returns false when the version check lost; the caller retries on its
    /// next sweep. The write bumps the version.
    async fn compare_and_update_set_status(
        &self,
        id: Uuid,
        expected_version: u64,
        status: SetStatus,
    ) -> Result<bool, DatastoreError>;

    /// Persists the outcome of a push.
    async fn save_push_result(&self, result: PushResult) -> Result<(), DatastoreError>;

    /// Fetches the persisted outcome of a push.
    async fn get_push_result(
        &self,
        record_id: Uuid,
    ) -> Result<Option<PushResult>, DatastoreError>;
}

/// Client for the downstream release system.
#[async_trait]
pub trait BuildPushClient: Send + Sync {
    /// Submits one build for import downstream.
    ///
    /// Returns true when the remote system accepted the submission; the
    /// actual import completes later through a callback keyed by the record
    /// id.
    async fn import_build(
        &self,
        payload: &PushPayload,
        auth_token: &str,
    ) -> Result<bool, PushClientError>;
}
