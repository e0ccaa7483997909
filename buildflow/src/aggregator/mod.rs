//! Fixed-delay polling job deriving group status from member task statuses.
//!
//! Polling instead of completion callbacks keeps the job correct under
//! out-of-order and duplicated scheduler signals, and lets several
//! coordinator instances run the sweep concurrently: every status write goes
//! through an optimistic version check, so a lost race is simply retried on
//! the next sweep.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::{BuildConfigSetRecord, BuildEvent, SetStatus};
use crate::errors::DatastoreError;
use crate::events::EventSink;
use crate::monitor::{Condition, MonitorHandle, PollingMonitor};
use crate::ports::BuildDatastore;

/// Configuration of the aggregation sweep.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Delay between the end of one sweep and the start of the next.
    pub poll_interval: Duration,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
        }
    }
}

/// Scans set records still in `Building` and finalizes those whose members
/// have all reached a terminal status.
pub struct SetRecordAggregator {
    datastore: Arc<dyn BuildDatastore>,
    sink: Arc<dyn EventSink>,
    config: AggregatorConfig,
    monitor: PollingMonitor,
}

impl SetRecordAggregator {
    /// Creates an aggregator with the default sweep delay.
    ///
    /// Must be created inside a Tokio runtime.
    #[must_use]
    pub fn new(datastore: Arc<dyn BuildDatastore>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            datastore,
            sink,
            config: AggregatorConfig::default(),
            monitor: PollingMonitor::new(),
        }
    }

    /// Overrides the sweep configuration.
    #[must_use]
    pub fn with_config(mut self, config: AggregatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Runs one sweep over all sets still building.
    ///
    /// Returns the number of sets finalized. A failure on one set is logged
    /// and does not stop the sweep; distinct records are independent.
    ///
    /// # Errors
    ///
    /// Only a failure to list the building sets aborts the sweep.
    pub async fn run_once(&self) -> Result<usize, DatastoreError> {
        let sets = self.datastore.sets_in_building().await?;
        let mut finalized = 0;

        for set in sets {
            match self.try_finalize(&set).await {
                Ok(true) => finalized += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(set_id = %set.id, error = %e, "Aggregation failed for set");
                }
            }
        }

        Ok(finalized)
    }

    async fn try_finalize(&self, set: &BuildConfigSetRecord) -> Result<bool, DatastoreError> {
        let mut statuses = Vec::with_capacity(set.task_ids.len());
        for task_id in &set.task_ids {
            match self.datastore.get_record(*task_id).await? {
                Some(record) => statuses.push(record.status),
                // A member without a record has not reached a terminal
                // status; the set is not ready.
                None => return Ok(false),
            }
        }

        let Some(aggregate) = SetStatus::aggregate(&statuses) else {
            return Ok(false);
        };

        let updated = self
            .datastore
            .compare_and_update_set_status(set.id, set.version, aggregate)
            .await?;

        if updated {
            info!(set_id = %set.id, status = %aggregate, "Build set finalized");
            self.sink
                .emit(BuildEvent::set_finalized(set.id, aggregate))
                .await;
        } else {
            debug!(set_id = %set.id, "Lost version race, retrying on next sweep");
        }

        Ok(updated)
    }

    /// Spawns the fixed-delay sweep loop. Abort the returned handle to stop.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(self.config.poll_interval).await;
                if let Err(e) = self.run_once().await {
                    warn!(error = %e, "Aggregation sweep failed");
                }
            }
        })
    }

    /// Resolves once the set record has left the `Building` state.
    pub fn wait_for_set(
        &self,
        set_id: Uuid,
        interval: Duration,
        timeout: Duration,
    ) -> MonitorHandle {
        self.monitor.monitor(
            SetTerminalCondition {
                datastore: Arc::clone(&self.datastore),
                set_id,
            },
            interval,
            timeout,
        )
    }
}

struct SetTerminalCondition {
    datastore: Arc<dyn BuildDatastore>,
    set_id: Uuid,
}

#[async_trait]
impl Condition for SetTerminalCondition {
    async fn check(&self) -> bool {
        match self.datastore.get_set_record(self.set_id).await {
            Ok(Some(record)) => record.status.is_terminal(),
            // Unknown or unreadable: keep polling until the deadline decides.
            Ok(None) | Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        BuildConfiguration, BuildCoordinationStatus, BuildOptions, BuildRecord, BuildResult,
        BuildTask,
    };
    use crate::events::CollectingEventSink;
    use crate::testing::InMemoryDatastore;

    fn record_with_status(status: BuildCoordinationStatus) -> BuildRecord {
        let config = BuildConfiguration::new("member", "make");
        let mut task = BuildTask::new(&config.audit(), BuildOptions::default(), Uuid::new_v4());
        task.status = status;
        task.end_time = Some(chrono::Utc::now());
        BuildRecord::from_task(&task, Some(&BuildResult::success()))
    }

    fn aggregator(
        datastore: &Arc<InMemoryDatastore>,
        sink: &Arc<CollectingEventSink>,
    ) -> SetRecordAggregator {
        SetRecordAggregator::new(
            Arc::clone(datastore) as Arc<dyn BuildDatastore>,
            Arc::clone(sink) as Arc<dyn EventSink>,
        )
    }

    #[tokio::test]
    async fn test_set_stays_building_until_all_members_terminal() {
        let datastore = Arc::new(InMemoryDatastore::new());
        let sink = Arc::new(CollectingEventSink::new());

        let done = record_with_status(BuildCoordinationStatus::Done);
        let missing_id = Uuid::new_v4();
        let set = BuildConfigSetRecord::new("partial", vec![done.id, missing_id]);
        let set_id = set.id;
        datastore.insert_record(done);
        datastore.insert_set_record(set);

        let aggregator = aggregator(&datastore, &sink);
        let finalized = aggregator.run_once().await.expect("sweep");

        assert_eq!(finalized, 0);
        let stored = datastore.set_record(set_id).expect("set record");
        assert_eq!(stored.status, SetStatus::Building);
    }

    #[tokio::test]
    async fn test_all_done_finalizes_success() {
        let datastore = Arc::new(InMemoryDatastore::new());
        let sink = Arc::new(CollectingEventSink::new());

        let a = record_with_status(BuildCoordinationStatus::Done);
        let b = record_with_status(BuildCoordinationStatus::RejectedAlreadyBuilt);
        let set = BuildConfigSetRecord::new("ok", vec![a.id, b.id]);
        let set_id = set.id;
        datastore.insert_record(a);
        datastore.insert_record(b);
        datastore.insert_set_record(set);

        let aggregator = aggregator(&datastore, &sink);
        let finalized = aggregator.run_once().await.expect("sweep");

        assert_eq!(finalized, 1);
        let stored = datastore.set_record(set_id).expect("set record");
        assert_eq!(stored.status, SetStatus::Success);
        assert_eq!(sink.events_of_type("build_set.finalized").len(), 1);
    }

    #[tokio::test]
    async fn test_any_failure_finalizes_failed() {
        let datastore = Arc::new(InMemoryDatastore::new());
        let sink = Arc::new(CollectingEventSink::new());

        let a = record_with_status(BuildCoordinationStatus::Done);
        let b = record_with_status(BuildCoordinationStatus::SystemError);
        let set = BuildConfigSetRecord::new("broken", vec![a.id, b.id]);
        let set_id = set.id;
        datastore.insert_record(a);
        datastore.insert_record(b);
        datastore.insert_set_record(set);

        let aggregator = aggregator(&datastore, &sink);
        aggregator.run_once().await.expect("sweep");

        let stored = datastore.set_record(set_id).expect("set record");
        assert_eq!(stored.status, SetStatus::Failed);
    }

    #[tokio::test]
    async fn test_lost_version_race_is_skipped() {
        let datastore = Arc::new(InMemoryDatastore::new());
        let sink = Arc::new(CollectingEventSink::new());

        let a = record_with_status(BuildCoordinationStatus::Done);
        let set = BuildConfigSetRecord::new("contested", vec![a.id]);
        let stale = set.clone();
        datastore.insert_record(a);
        datastore.insert_set_record(set);

        // Another instance wrote between our read and our write.
        datastore.bump_set_version(stale.id);

        let aggregator = aggregator(&datastore, &sink);
        let finalized = aggregator.try_finalize(&stale).await.expect("sweep");

        assert!(!finalized);
        assert!(sink.events_of_type("build_set.finalized").is_empty());
    }

    #[tokio::test]
    async fn test_wait_for_set_resolves_on_terminal_status() {
        let datastore = Arc::new(InMemoryDatastore::new());
        let sink = Arc::new(CollectingEventSink::new());

        let a = record_with_status(BuildCoordinationStatus::Done);
        let set = BuildConfigSetRecord::new("watched", vec![a.id]);
        let set_id = set.id;
        datastore.insert_record(a);
        datastore.insert_set_record(set);

        let aggregator = aggregator(&datastore, &sink);
        let handle = aggregator.wait_for_set(
            set_id,
            Duration::from_millis(10),
            Duration::from_secs(5),
        );

        aggregator.run_once().await.expect("sweep");
        handle.wait().await.expect("set finalized");
    }
}
