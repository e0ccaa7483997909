//! Deduplicated, retried forwarding of finished builds to the downstream
//! release system.
//!
//! At most one push per build record is ever in flight: submission must win
//! an atomic claim in the [`InProgressRegistry`] first, and the claim is only
//! released by the matching completion or an explicit cancellation. Crashes
//! on the remote side therefore cannot produce a second concurrent import,
//! and duplicate completions are refused instead of silently accepted.

mod registry;

pub use registry::{InProgressRegistry, PushMarker};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::{BuildEvent, BuildRecord};
use crate::errors::BuildflowError;
use crate::events::EventSink;
use crate::monitor::{MonitorHandle, PollingMonitor};
use crate::ports::{BuildDatastore, BuildPushClient};
use crate::retry::{with_retry, RetryConfig};

/// A request to push one or more finished builds downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushRequest {
    /// The build records to push.
    pub build_record_ids: Vec<Uuid>,
    /// Token authenticating against the downstream system.
    pub auth_token: String,
    /// Template for the completion callback URL; `{record_id}` is replaced
    /// per record.
    pub callback_url_template: Option<String>,
    /// Prefix for the downstream import tag.
    pub tag_prefix: Option<String>,
    /// Whether an earlier import of the same record may be overwritten.
    pub reimport: bool,
}

impl PushRequest {
    /// Creates a push request for the given records.
    #[must_use]
    pub fn new(build_record_ids: Vec<Uuid>, auth_token: impl Into<String>) -> Self {
        Self {
            build_record_ids,
            auth_token: auth_token.into(),
            callback_url_template: None,
            tag_prefix: None,
            reimport: false,
        }
    }

    /// Sets the callback URL template.
    #[must_use]
    pub fn with_callback_url_template(mut self, template: impl Into<String>) -> Self {
        self.callback_url_template = Some(template.into());
        self
    }

    /// Sets the tag prefix.
    #[must_use]
    pub fn with_tag_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.tag_prefix = Some(prefix.into());
        self
    }

    /// Allows overwriting an earlier import.
    #[must_use]
    pub fn reimport(mut self) -> Self {
        self.reimport = true;
        self
    }
}

/// Status of one push, from submission to downstream completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushStatus {
    /// The downstream system accepted the submission.
    Accepted,
    /// The push was refused before or at submission.
    Rejected,
    /// The downstream import finished successfully.
    Success,
    /// The downstream import failed.
    Failed,
    /// The push was cancelled while in flight.
    Cancelled,
}

impl fmt::Display for PushStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accepted => write!(f, "accepted"),
            Self::Rejected => write!(f, "rejected"),
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Outcome of a push for one build record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushResult {
    /// The build record the outcome belongs to. For requests naming a
    /// short-circuited record, this is the resolved prior record.
    pub record_id: Uuid,
    /// The push status.
    pub status: PushStatus,
    /// Human-readable detail.
    pub message: Option<String>,
}

impl PushResult {
    /// An accepted submission.
    #[must_use]
    pub fn accepted(record_id: Uuid) -> Self {
        Self {
            record_id,
            status: PushStatus::Accepted,
            message: None,
        }
    }

    /// A refused submission with a reason.
    #[must_use]
    pub fn rejected(record_id: Uuid, message: impl Into<String>) -> Self {
        Self {
            record_id,
            status: PushStatus::Rejected,
            message: Some(message.into()),
        }
    }

    /// Returns true if the submission was accepted.
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        self.status == PushStatus::Accepted
    }
}

/// Payload assembled for the downstream import.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushPayload {
    /// The build record being imported.
    pub record_id: Uuid,
    /// Configuration name the record was built from.
    pub name: String,
    /// Artifact references.
    pub artifacts: Vec<String>,
    /// Record ids of the build's dependencies.
    pub dependency_record_ids: Vec<Uuid>,
    /// Reference to the build logs.
    pub logs_ref: Option<String>,
    /// Completion callback URL for this record.
    pub callback_url: Option<String>,
    /// The downstream import tag.
    pub tag: String,
    /// Whether an earlier import may be overwritten.
    pub reimport: bool,
}

impl PushPayload {
    fn assemble(record: &BuildRecord, request: &PushRequest, tag: String) -> Self {
        let callback_url = request
            .callback_url_template
            .as_ref()
            .map(|template| template.replace("{record_id}", &record.id.to_string()));
        Self {
            record_id: record.id,
            name: record.name.clone(),
            artifacts: record.artifacts.clone(),
            dependency_record_ids: record.dependency_record_ids.clone(),
            logs_ref: record.logs_ref.clone(),
            callback_url,
            tag,
            reimport: request.reimport,
        }
    }
}

/// Forwards finished build results downstream, exactly once in flight per
/// record.
pub struct PushManager {
    datastore: Arc<dyn BuildDatastore>,
    client: Arc<dyn BuildPushClient>,
    registry: Arc<InProgressRegistry>,
    sink: Arc<dyn EventSink>,
    retry: RetryConfig,
    monitor: PollingMonitor,
}

impl PushManager {
    /// Creates a push manager over the given collaborators.
    ///
    /// Must be created inside a Tokio runtime.
    #[must_use]
    pub fn new(
        datastore: Arc<dyn BuildDatastore>,
        client: Arc<dyn BuildPushClient>,
        registry: Arc<InProgressRegistry>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            datastore,
            client,
            registry,
            sink,
            retry: RetryConfig::default(),
            monitor: PollingMonitor::new(),
        }
    }

    /// Overrides the retry policy used at the submission boundary.
    #[must_use]
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Pushes each requested record downstream, concurrently.
    ///
    /// Per-record problems come back as `Rejected` results in request order;
    /// the remaining records are still attempted.
    pub async fn push(&self, request: &PushRequest) -> Vec<PushResult> {
        futures::future::join_all(
            request
                .build_record_ids
                .iter()
                .map(|record_id| self.push_one(*record_id, request)),
        )
        .await
    }

    async fn push_one(&self, record_id: Uuid, request: &PushRequest) -> PushResult {
        let record = match self.resolve_record(record_id).await {
            Ok(record) => record,
            Err(reason) => return PushResult::rejected(record_id, reason),
        };

        let tag = match &request.tag_prefix {
            Some(prefix) => format!("{prefix}-{}", record.id),
            None => record.id.to_string(),
        };

        if !self.registry.try_begin(record.id, &tag) {
            debug!(record_id = %record.id, "Push already running");
            return PushResult::rejected(
                record.id,
                format!("push already running for build record {}", record.id),
            );
        }

        let payload = PushPayload::assemble(&record, request, tag.clone());
        let submitted = with_retry(&self.retry, "push.import_build", || {
            let client = Arc::clone(&self.client);
            let payload = &payload;
            let token = request.auth_token.as_str();
            async move { client.import_build(payload, token).await }
        })
        .await;

        match submitted {
            Ok(true) => {
                info!(record_id = %record.id, tag = %tag, "Push accepted downstream");
                self.sink
                    .emit(BuildEvent::push_accepted(record.id, &tag))
                    .await;
                PushResult::accepted(record.id)
            }
            Ok(false) => {
                self.registry.complete(record.id);
                PushResult::rejected(record.id, "submission refused by the downstream system")
            }
            Err(e) => {
                // Exhausted retries: release the claim and report the failure.
                self.registry.complete(record.id);
                warn!(record_id = %record.id, error = %e, "Push submission failed");
                PushResult::rejected(record.id, format!("push submission failed: {e}"))
            }
        }
    }

    /// Resolves the record to push, following a short-circuited record to the
    /// prior successful build that satisfied it.
    async fn resolve_record(&self, record_id: Uuid) -> Result<BuildRecord, String> {
        let record = self
            .datastore
            .get_record(record_id)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("build record {record_id} not found"))?;

        let record = if record.status == crate::core::BuildCoordinationStatus::RejectedAlreadyBuilt
        {
            let cause = record
                .no_rebuild_cause
                .ok_or_else(|| format!("build record {record_id} has no prior build to push"))?;
            self.datastore
                .get_record(cause)
                .await
                .map_err(|e| e.to_string())?
                .ok_or_else(|| format!("prior build record {cause} not found"))?
        } else {
            record
        };

        if !record.is_successful() {
            return Err(format!(
                "build record {} did not complete successfully and cannot be pushed",
                record.id
            ));
        }
        Ok(record)
    }

    /// Applies the downstream completion callback for one record.
    ///
    /// The in-progress marker must exist; a completion without one is
    /// refused, never silently accepted. The result is persisted and the
    /// result event fired exactly once.
    ///
    /// # Errors
    ///
    /// [`BuildflowError::PushNotInProgress`] when no push is in flight for
    /// the record, or datastore failures.
    pub async fn complete(
        &self,
        record_id: Uuid,
        status: PushStatus,
        message: Option<String>,
    ) -> Result<PushResult, BuildflowError> {
        if self.registry.complete(record_id).is_none() {
            warn!(record_id = %record_id, "Completion for a push that is not in progress");
            return Err(BuildflowError::PushNotInProgress { record_id });
        }

        let result = PushResult {
            record_id,
            status,
            message,
        };
        self.datastore.save_push_result(result.clone()).await?;
        info!(record_id = %record_id, status = %status, "Push completed");
        self.sink
            .emit(BuildEvent::push_completed(record_id, &status.to_string()))
            .await;
        Ok(result)
    }

    /// Cancels an in-flight push.
    ///
    /// Removes the marker and records a cancelled result. Work already
    /// dispatched on the remote side is not stopped.
    ///
    /// # Errors
    ///
    /// Datastore failures.
    pub async fn cancel_in_progress_push(
        &self,
        record_id: Uuid,
    ) -> Result<bool, BuildflowError> {
        if self.registry.complete(record_id).is_none() {
            return Ok(false);
        }

        let result = PushResult {
            record_id,
            status: PushStatus::Cancelled,
            message: Some("push cancelled".to_string()),
        };
        self.datastore.save_push_result(result).await?;
        info!(record_id = %record_id, "In-progress push cancelled");
        self.sink.emit(BuildEvent::push_cancelled(record_id)).await;
        Ok(true)
    }

    /// Resolves once no push is in flight for the record.
    pub fn wait_until_completed(
        &self,
        record_id: Uuid,
        interval: Duration,
        timeout: Duration,
    ) -> MonitorHandle {
        let registry = Arc::clone(&self.registry);
        self.monitor
            .monitor_fn(move || !registry.contains(record_id), interval, timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        BuildConfiguration, BuildCoordinationStatus, BuildOptions, BuildResult, BuildTask,
    };
    use crate::events::CollectingEventSink;
    use crate::testing::{InMemoryDatastore, MockPushClient};

    struct Fixture {
        datastore: Arc<InMemoryDatastore>,
        client: Arc<MockPushClient>,
        registry: Arc<InProgressRegistry>,
        sink: Arc<CollectingEventSink>,
        manager: PushManager,
    }

    fn fixture() -> Fixture {
        let datastore = Arc::new(InMemoryDatastore::new());
        let client = Arc::new(MockPushClient::accepting());
        let registry = Arc::new(InProgressRegistry::new());
        let sink = Arc::new(CollectingEventSink::new());
        let manager = PushManager::new(
            Arc::clone(&datastore) as Arc<dyn BuildDatastore>,
            Arc::clone(&client) as Arc<dyn BuildPushClient>,
            Arc::clone(&registry),
            Arc::clone(&sink) as Arc<dyn EventSink>,
        )
        .with_retry_config(RetryConfig::new().with_max_attempts(3).with_base_delay_ms(1));
        Fixture {
            datastore,
            client,
            registry,
            sink,
            manager,
        }
    }

    fn record_with_status(status: BuildCoordinationStatus) -> BuildRecord {
        let config = BuildConfiguration::new("libfoo", "make");
        let mut task = BuildTask::new(&config.audit(), BuildOptions::default(), Uuid::new_v4());
        task.status = status;
        task.end_time = Some(chrono::Utc::now());
        BuildRecord::from_task(
            &task,
            Some(&BuildResult::success().with_artifacts(vec!["libfoo.jar".to_string()])),
        )
    }

    #[tokio::test]
    async fn test_push_accepts_successful_record() {
        let f = fixture();
        let record = record_with_status(BuildCoordinationStatus::Done);
        let record_id = record.id;
        f.datastore.insert_record(record);

        let results = f
            .manager
            .push(&PushRequest::new(vec![record_id], "token"))
            .await;

        assert_eq!(results.len(), 1);
        assert!(results[0].is_accepted());
        // The marker stays until the downstream completion arrives.
        assert!(f.registry.contains(record_id));
        assert_eq!(f.client.calls(), 1);
    }

    #[tokio::test]
    async fn test_push_rejects_unsuccessful_record() {
        let f = fixture();
        let record = record_with_status(BuildCoordinationStatus::DoneWithErrors);
        let record_id = record.id;
        f.datastore.insert_record(record);

        let results = f
            .manager
            .push(&PushRequest::new(vec![record_id], "token"))
            .await;

        assert_eq!(results[0].status, PushStatus::Rejected);
        assert!(!f.registry.contains(record_id));
        assert_eq!(f.client.calls(), 0);
    }

    #[tokio::test]
    async fn test_push_resolves_no_rebuild_to_prior_record() {
        let f = fixture();
        let prior = record_with_status(BuildCoordinationStatus::Done);
        let prior_id = prior.id;

        let mut shortcut = record_with_status(BuildCoordinationStatus::RejectedAlreadyBuilt);
        shortcut.no_rebuild_cause = Some(prior_id);
        let shortcut_id = shortcut.id;

        f.datastore.insert_record(prior);
        f.datastore.insert_record(shortcut);

        let results = f
            .manager
            .push(&PushRequest::new(vec![shortcut_id], "token"))
            .await;

        assert!(results[0].is_accepted());
        assert_eq!(results[0].record_id, prior_id);
        assert!(f.registry.contains(prior_id));
    }

    #[tokio::test]
    async fn test_concurrent_pushes_dedup_to_one_accepted() {
        let f = fixture();
        let record = record_with_status(BuildCoordinationStatus::Done);
        let record_id = record.id;
        f.datastore.insert_record(record);

        let request = PushRequest::new(vec![record_id], "token");
        let (first, second) = tokio::join!(
            f.manager.push(&request),
            f.manager.push(&request)
        );

        let statuses = [first[0].status, second[0].status];
        assert!(statuses.contains(&PushStatus::Accepted));
        assert!(statuses.contains(&PushStatus::Rejected));
        let rejected = if first[0].status == PushStatus::Rejected {
            &first[0]
        } else {
            &second[0]
        };
        assert!(rejected
            .message
            .as_deref()
            .unwrap_or("")
            .contains("already running"));
    }

    #[tokio::test]
    async fn test_remote_refusal_releases_marker() {
        let datastore = Arc::new(InMemoryDatastore::new());
        let client = Arc::new(MockPushClient::refusing());
        let registry = Arc::new(InProgressRegistry::new());
        let manager = PushManager::new(
            Arc::clone(&datastore) as Arc<dyn BuildDatastore>,
            Arc::clone(&client) as Arc<dyn BuildPushClient>,
            Arc::clone(&registry),
            Arc::new(CollectingEventSink::new()) as Arc<dyn EventSink>,
        );

        let record = record_with_status(BuildCoordinationStatus::Done);
        let record_id = record.id;
        datastore.insert_record(record);

        let results = manager.push(&PushRequest::new(vec![record_id], "token")).await;

        assert_eq!(results[0].status, PushStatus::Rejected);
        assert!(!registry.contains(record_id));
    }

    #[tokio::test]
    async fn test_submission_failure_releases_marker() {
        let f = fixture();
        f.client.fail_always();
        let record = record_with_status(BuildCoordinationStatus::Done);
        let record_id = record.id;
        f.datastore.insert_record(record);

        let results = f
            .manager
            .push(&PushRequest::new(vec![record_id], "token"))
            .await;

        assert_eq!(results[0].status, PushStatus::Rejected);
        assert!(!f.registry.contains(record_id));
        // Bounded retry: the configured three attempts, no more.
        assert_eq!(f.client.calls(), 3);
    }

    #[tokio::test]
    async fn test_submission_retries_through_transient_failures() {
        let f = fixture();
        f.client.fail_times(2);
        let record = record_with_status(BuildCoordinationStatus::Done);
        let record_id = record.id;
        f.datastore.insert_record(record);

        let results = f
            .manager
            .push(&PushRequest::new(vec![record_id], "token"))
            .await;

        assert!(results[0].is_accepted());
        assert_eq!(f.client.calls(), 3);
    }

    #[tokio::test]
    async fn test_complete_requires_marker() {
        let f = fixture();
        let record_id = Uuid::new_v4();

        let err = f
            .manager
            .complete(record_id, PushStatus::Success, None)
            .await
            .expect_err("completion without marker must fail");
        assert!(matches!(err, BuildflowError::PushNotInProgress { .. }));
    }

    #[tokio::test]
    async fn test_complete_persists_result_and_fires_event_once() {
        let f = fixture();
        let record = record_with_status(BuildCoordinationStatus::Done);
        let record_id = record.id;
        f.datastore.insert_record(record);
        f.manager
            .push(&PushRequest::new(vec![record_id], "token"))
            .await;

        f.manager
            .complete(record_id, PushStatus::Success, None)
            .await
            .expect("completion");

        assert!(!f.registry.contains(record_id));
        let stored = f.datastore.push_result(record_id).expect("persisted result");
        assert_eq!(stored.status, PushStatus::Success);
        assert_eq!(f.sink.events_of_type("push.completed").len(), 1);

        // The duplicate is refused and changes nothing.
        let err = f
            .manager
            .complete(record_id, PushStatus::Failed, None)
            .await
            .expect_err("duplicate completion must fail");
        assert!(matches!(err, BuildflowError::PushNotInProgress { .. }));
        assert_eq!(f.sink.events_of_type("push.completed").len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_in_progress_push() {
        let f = fixture();
        let record = record_with_status(BuildCoordinationStatus::Done);
        let record_id = record.id;
        f.datastore.insert_record(record);
        f.manager
            .push(&PushRequest::new(vec![record_id], "token"))
            .await;

        assert!(f
            .manager
            .cancel_in_progress_push(record_id)
            .await
            .expect("cancel"));
        assert!(!f.registry.contains(record_id));
        let stored = f.datastore.push_result(record_id).expect("persisted result");
        assert_eq!(stored.status, PushStatus::Cancelled);

        // Nothing left to cancel.
        assert!(!f
            .manager
            .cancel_in_progress_push(record_id)
            .await
            .expect("cancel"));
    }

    #[tokio::test]
    async fn test_wait_until_completed_resolves_after_completion() {
        let f = fixture();
        let record = record_with_status(BuildCoordinationStatus::Done);
        let record_id = record.id;
        f.datastore.insert_record(record);
        f.manager
            .push(&PushRequest::new(vec![record_id], "token"))
            .await;

        let handle = f.manager.wait_until_completed(
            record_id,
            Duration::from_millis(10),
            Duration::from_secs(5),
        );
        f.manager
            .complete(record_id, PushStatus::Success, None)
            .await
            .expect("completion");

        handle.wait().await.expect("push completed");
    }

    #[tokio::test]
    async fn test_tag_prefix_applied() {
        let f = fixture();
        let record = record_with_status(BuildCoordinationStatus::Done);
        let record_id = record.id;
        f.datastore.insert_record(record);

        f.manager
            .push(&PushRequest::new(vec![record_id], "token").with_tag_prefix("release"))
            .await;

        let marker = f.registry.get(record_id).expect("marker");
        assert!(marker.tag.starts_with("release-"));
    }
}
