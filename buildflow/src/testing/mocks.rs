//! In-memory mock implementations of the external boundaries.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use uuid::Uuid;

use crate::core::{
    BuildConfigSetRecord, BuildRecord, IdRev, RemoteBuildTask, SetStatus, User,
};
use crate::errors::{DatastoreError, PushClientError, SchedulerError};
use crate::graph::Graph;
use crate::ports::{BuildDatastore, BuildPushClient, Scheduler};
use crate::push::{PushPayload, PushResult};

/// A scheduler that records submissions and answers cancellations from
/// configuration.
#[derive(Debug, Default)]
pub struct MockScheduler {
    submissions: Mutex<Vec<Graph<RemoteBuildTask>>>,
    cancelled: Mutex<Vec<Uuid>>,
    fail_remaining: AtomicUsize,
    acknowledge_cancel: AtomicBool,
}

impl MockScheduler {
    /// Creates a scheduler accepting everything.
    #[must_use]
    pub fn new() -> Self {
        Self {
            submissions: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
            fail_remaining: AtomicUsize::new(0),
            acknowledge_cancel: AtomicBool::new(true),
        }
    }

    /// Makes the next `n` submissions fail as unavailable.
    pub fn fail_times(&self, n: usize) {
        self.fail_remaining.store(n, Ordering::SeqCst);
    }

    /// Makes cancellations go unacknowledged.
    pub fn refuse_cancellations(&self) {
        self.acknowledge_cancel.store(false, Ordering::SeqCst);
    }

    /// Returns the recorded submissions.
    #[must_use]
    pub fn submissions(&self) -> Vec<Graph<RemoteBuildTask>> {
        self.submissions.lock().clone()
    }

    /// Number of submissions received.
    #[must_use]
    pub fn submission_count(&self) -> usize {
        self.submissions.lock().len()
    }

    /// Task ids whose cancellation was requested.
    #[must_use]
    pub fn cancelled(&self) -> Vec<Uuid> {
        self.cancelled.lock().clone()
    }
}

#[async_trait]
impl Scheduler for MockScheduler {
    async fn start_building(
        &self,
        graph: &Graph<RemoteBuildTask>,
        _user: &User,
    ) -> Result<(), SchedulerError> {
        let remaining = self.fail_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(SchedulerError::Unavailable("scheduler down".to_string()));
        }
        self.submissions.lock().push(graph.clone());
        Ok(())
    }

    async fn cancel(&self, task_id: Uuid) -> Result<bool, SchedulerError> {
        self.cancelled.lock().push(task_id);
        Ok(self.acknowledge_cancel.load(Ordering::SeqCst))
    }
}

/// An in-memory datastore with optimistic set-record versioning.
#[derive(Debug, Default)]
pub struct InMemoryDatastore {
    records: DashMap<Uuid, BuildRecord>,
    record_saves: DashMap<Uuid, usize>,
    sets: DashMap<Uuid, BuildConfigSetRecord>,
    push_results: DashMap<Uuid, PushResult>,
}

impl InMemoryDatastore {
    /// Creates an empty datastore.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a record directly, bypassing the save counter.
    pub fn insert_record(&self, record: BuildRecord) {
        self.records.insert(record.id, record);
    }

    /// Inserts a set record directly.
    pub fn insert_set_record(&self, record: BuildConfigSetRecord) {
        self.sets.insert(record.id, record);
    }

    /// Returns a record snapshot.
    #[must_use]
    pub fn record(&self, id: Uuid) -> Option<BuildRecord> {
        self.records.get(&id).map(|r| r.clone())
    }

    /// Returns a set record snapshot.
    #[must_use]
    pub fn set_record(&self, id: Uuid) -> Option<BuildConfigSetRecord> {
        self.sets.get(&id).map(|r| r.clone())
    }

    /// Returns a push result snapshot.
    #[must_use]
    pub fn push_result(&self, record_id: Uuid) -> Option<PushResult> {
        self.push_results.get(&record_id).map(|r| r.clone())
    }

    /// How many times `save_record` ran for the id.
    #[must_use]
    pub fn record_save_count(&self, id: Uuid) -> usize {
        self.record_saves.get(&id).map_or(0, |n| *n)
    }

    /// Simulates a concurrent writer bumping the stored version.
    pub fn bump_set_version(&self, id: Uuid) {
        if let Some(mut set) = self.sets.get_mut(&id) {
            set.version += 1;
        }
    }

    /// Number of stored build records.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.records.len()
    }
}

#[async_trait]
impl BuildDatastore for InMemoryDatastore {
    async fn get_record(&self, id: Uuid) -> Result<Option<BuildRecord>, DatastoreError> {
        Ok(self.records.get(&id).map(|r| r.clone()))
    }

    async fn save_record(&self, record: BuildRecord) -> Result<(), DatastoreError> {
        *self.record_saves.entry(record.id).or_insert(0) += 1;
        self.records.insert(record.id, record);
        Ok(())
    }

    async fn get_latest_successful_record(
        &self,
        id_rev: &IdRev,
        temporary: bool,
    ) -> Result<Option<BuildRecord>, DatastoreError> {
        let latest = self
            .records
            .iter()
            .filter(|r| {
                r.id_rev == *id_rev && r.is_successful() && r.temporary_build == temporary
            })
            .max_by_key(|r| r.end_time)
            .map(|r| r.clone());
        Ok(latest)
    }

    async fn save_set_record(&self, record: BuildConfigSetRecord) -> Result<(), DatastoreError> {
        self.sets.insert(record.id, record);
        Ok(())
    }

    async fn get_set_record(
        &self,
        id: Uuid,
    ) -> Result<Option<BuildConfigSetRecord>, DatastoreError> {
        Ok(self.sets.get(&id).map(|r| r.clone()))
    }

    async fn sets_in_building(&self) -> Result<Vec<BuildConfigSetRecord>, DatastoreError> {
        Ok(self
            .sets
            .iter()
            .filter(|s| s.status == SetStatus::Building)
            .map(|s| s.clone())
            .collect())
    }

    async fn compare_and_update_set_status(
        &self,
        id: Uuid,
        expected_version: u64,
        status: SetStatus,
    ) -> Result<bool, DatastoreError> {
        let Some(mut set) = self.sets.get_mut(&id) else {
            return Err(DatastoreError::NotFound(id));
        };
        if set.version != expected_version {
            return Ok(false);
        }
        set.status = status;
        set.version += 1;
        if status.is_terminal() {
            set.end_time = Some(Utc::now());
        }
        Ok(true)
    }

    async fn save_push_result(&self, result: PushResult) -> Result<(), DatastoreError> {
        self.push_results.insert(result.record_id, result);
        Ok(())
    }

    async fn get_push_result(
        &self,
        record_id: Uuid,
    ) -> Result<Option<PushResult>, DatastoreError> {
        Ok(self.push_results.get(&record_id).map(|r| r.clone()))
    }
}

/// A push client with configurable acceptance and transient failures.
#[derive(Debug)]
pub struct MockPushClient {
    accept: AtomicBool,
    fail_remaining: AtomicUsize,
    fail_always: AtomicBool,
    calls: AtomicUsize,
    payloads: Mutex<Vec<PushPayload>>,
}

impl MockPushClient {
    /// A client accepting every submission.
    #[must_use]
    pub fn accepting() -> Self {
        Self {
            accept: AtomicBool::new(true),
            fail_remaining: AtomicUsize::new(0),
            fail_always: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            payloads: Mutex::new(Vec::new()),
        }
    }

    /// A client refusing every submission (without transport errors).
    #[must_use]
    pub fn refusing() -> Self {
        let client = Self::accepting();
        client.accept.store(false, Ordering::SeqCst);
        client
    }

    /// Makes the next `n` calls fail with a transport error.
    pub fn fail_times(&self, n: usize) {
        self.fail_remaining.store(n, Ordering::SeqCst);
    }

    /// Makes every call fail with a transport error.
    pub fn fail_always(&self) {
        self.fail_always.store(true, Ordering::SeqCst);
    }

    /// Number of submissions attempted.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Payloads of the accepted calls.
    #[must_use]
    pub fn payloads(&self) -> Vec<PushPayload> {
        self.payloads.lock().clone()
    }
}

#[async_trait]
impl BuildPushClient for MockPushClient {
    async fn import_build(
        &self,
        payload: &PushPayload,
        _auth_token: &str,
    ) -> Result<bool, PushClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_always.load(Ordering::SeqCst) {
            return Err(PushClientError::Transport("connection refused".to_string()));
        }
        let remaining = self.fail_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(PushClientError::Transport("connection reset".to_string()));
        }

        self.payloads.lock().push(payload.clone());
        Ok(self.accept.load(Ordering::SeqCst))
    }
}
