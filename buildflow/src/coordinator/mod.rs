//! Build coordination: submission, status ownership and scheduler signals.
//!
//! The coordinator owns every task from acceptance to its terminal status.
//! Terminal tasks are handed to persistence and leave the in-memory registry,
//! which is what makes duplicate completions cheap to detect and ignore.


use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::{
    BuildConfigSetRecord, BuildConfiguration, BuildCoordinationStatus, BuildEvent, BuildOptions,
    BuildRecord, BuildResult, BuildSetTask, BuildTask, SetStatus, User,
};
use crate::errors::BuildflowError;
use crate::events::EventSink;
use crate::graph::build_graph;
use crate::monitor::{MonitorHandle, PollingMonitor};
use crate::ports::{BuildDatastore, Scheduler};
use crate::rebuild::RebuildDecisionEngine;
use crate::retry::{with_retry, RetryConfig};

/// Coordinates build submissions against the external scheduler.
///
/// Must be created inside a Tokio runtime.
pub struct BuildCoordinator {
    scheduler: Arc<dyn Scheduler>,
    datastore: Arc<dyn BuildDatastore>,
    sink: Arc<dyn EventSink>,
    engine: RebuildDecisionEngine,
    tasks: Arc<DashMap<Uuid, BuildTask>>,
    retry: RetryConfig,
    monitor: PollingMonitor,
}

impl BuildCoordinator {
    /// Creates a coordinator over the given collaborators.
    #[must_use]
    pub fn new(
        scheduler: Arc<dyn Scheduler>,
        datastore: Arc<dyn BuildDatastore>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let engine = RebuildDecisionEngine::new(Arc::clone(&datastore));
        Self {
            scheduler,
            datastore,
            sink,
            engine,
            tasks: Arc::new(DashMap::new()),
            retry: RetryConfig::default(),
            monitor: PollingMonitor::new(),
        }
    }

    /// Overrides the retry policy used at the scheduler boundary.
    #[must_use]
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Validates, decides rebuilds, persists and submits a configuration set.
    ///
    /// A validation failure returns synchronously as a `Rejected` set task
    /// carrying the reason; nothing is submitted in that case. Accepted sets
    /// come back `Building` and are tracked to completion asynchronously.
    ///
    /// # Errors
    ///
    /// Only infrastructure failures (datastore, scheduler exhaustion) are
    /// errors; rejections are values.
    pub async fn build_set(
        &self,
        configs: &[BuildConfiguration],
        user: &User,
        options: BuildOptions,
    ) -> Result<BuildSetTask, BuildflowError> {
        let correlation_id = Uuid::new_v4();
        let audited: Vec<_> = configs.iter().map(BuildConfiguration::audit).collect();

        let mut graph = match build_graph(&audited, options, correlation_id) {
            Ok(graph) => graph,
            Err(reason) => {
                warn!(user = %user.username, reason = %reason, "Build set rejected");
                self.sink
                    .emit(BuildEvent::set_rejected(&reason.to_string()))
                    .await;
                return Ok(BuildSetTask::rejected(reason.to_string(), correlation_id));
            }
        };

        let rebuilding: HashSet<Uuid> =
            self.engine.annotate_graph(&mut graph).await?.into_iter().collect();

        let task_ids = graph.vertex_ids();
        let set_record =
            BuildConfigSetRecord::new(format!("build-set-{correlation_id}"), task_ids.clone());
        let set_id = set_record.id;
        self.datastore.save_set_record(set_record).await?;

        let now = Utc::now();
        for id in &task_ids {
            let Some(task) = graph.vertex_mut(*id) else {
                continue;
            };
            if rebuilding.contains(id) {
                task.status = BuildCoordinationStatus::Enqueued;
                task.submit_time = Some(now);
            }
        }

        // Short-circuited tasks never reach the scheduler; they are terminal
        // already and go straight to persistence.
        for id in &task_ids {
            let Some(task) = graph.vertex(*id) else {
                continue;
            };
            if task.status == BuildCoordinationStatus::RejectedAlreadyBuilt {
                self.datastore
                    .save_record(BuildRecord::from_task(task, None))
                    .await?;
                self.sink
                    .emit(BuildEvent::task_completed(task.id, task.status))
                    .await;
            } else {
                self.sink
                    .emit(BuildEvent::task_enqueued(task.id, &task.name))
                    .await;
                self.tasks.insert(task.id, task.clone());
            }
        }

        // Submission payload: only the tasks that actually build, with the
        // edges among them. Dependencies satisfied by prior records are
        // already resolved and carry no edge.
        let mut submission = graph.clone();
        submission.retain(|id, _| rebuilding.contains(&id));
        let remote_graph = submission.map(|_, task| {
            let mut remote = task.to_remote();
            remote.dependency_ids.retain(|dep| rebuilding.contains(dep));
            remote
        });

        if remote_graph.vertex_count() > 0 {
            let submitted = with_retry(&self.retry, "scheduler.start_building", || {
                let scheduler = Arc::clone(&self.scheduler);
                let graph = &remote_graph;
                async move { scheduler.start_building(graph, user).await }
            })
            .await;

            if let Err(e) = submitted {
                warn!(set_id = %set_id, error = %e, "Scheduler submission failed, marking tasks");
                for id in &rebuilding {
                    if let Some((_, mut task)) = self.tasks.remove(id) {
                        task.status = BuildCoordinationStatus::SystemError;
                        task.status_description =
                            Some(format!("scheduler submission failed: {e}"));
                        task.end_time = Some(Utc::now());
                        self.datastore
                            .save_record(BuildRecord::from_task(&task, None))
                            .await?;
                        self.sink
                            .emit(BuildEvent::task_completed(task.id, task.status))
                            .await;
                    }
                }
                return Err(e.into());
            }
        }

        info!(
            set_id = %set_id,
            tasks = task_ids.len(),
            building = rebuilding.len(),
            user = %user.username,
            "Build set submitted"
        );
        self.sink
            .emit(BuildEvent::set_created(set_id, task_ids.len()))
            .await;

        Ok(BuildSetTask {
            id: set_id,
            status: SetStatus::Building,
            description: None,
            task_ids,
            correlation_id,
        })
    }

    /// Applies a scheduler "started" signal.
    ///
    /// Duplicate signals and signals for already-terminal tasks are logged
    /// no-ops.
    ///
    /// # Errors
    ///
    /// [`BuildflowError::UnknownTask`] when the task was never registered.
    pub async fn build_started(&self, task_id: Uuid) -> Result<(), BuildflowError> {
        let mut known = false;
        if let Some(mut entry) = self.tasks.get_mut(&task_id) {
            known = true;
            if entry.status == BuildCoordinationStatus::Building {
                debug!(task_id = %task_id, "Duplicate start signal ignored");
                return Ok(());
            }
            if !entry
                .status
                .can_transition_to(BuildCoordinationStatus::Building)
            {
                let from = entry.status;
                drop(entry);
                return Err(BuildflowError::InvalidTransition {
                    from,
                    to: BuildCoordinationStatus::Building,
                });
            }
            entry.status = BuildCoordinationStatus::Building;
            entry.start_time = Some(Utc::now());
        }

        if !known {
            if self.datastore.get_record(task_id).await?.is_some() {
                debug!(task_id = %task_id, "Start signal for terminal task ignored");
                return Ok(());
            }
            return Err(BuildflowError::UnknownTask(task_id));
        }

        self.sink.emit(BuildEvent::task_started(task_id)).await;
        Ok(())
    }

    /// Applies a scheduler completion callback, exactly once per task.
    ///
    /// Maps the reported [`CompletionStatus`](crate::core::CompletionStatus)
    /// to the coordinator status, persists the record, fires the status
    /// event, and cascades failed-dependency rejections to undispatched
    /// dependants. A duplicate or late callback for an already-terminal task
    /// is a logged no-op: nothing is re-persisted and no event is re-fired.
    ///
    /// # Errors
    ///
    /// [`BuildflowError::UnknownTask`] for a task that was never registered,
    /// [`BuildflowError::InvalidTransition`] for a signal that violates the
    /// state machine, or datastore failures.
    pub async fn complete_build(
        &self,
        task_id: Uuid,
        result: BuildResult,
    ) -> Result<(), BuildflowError> {
        let Some((_, mut task)) = self.tasks.remove(&task_id) else {
            if self.datastore.get_record(task_id).await?.is_some() {
                debug!(task_id = %task_id, "Duplicate completion for terminal task ignored");
                return Ok(());
            }
            return Err(BuildflowError::UnknownTask(task_id));
        };

        let next = result.completion.coordination_status(result.artifact_problems);
        if !task.status.can_transition_to(next) {
            let from = task.status;
            // Leave the task exactly as it was; the signal is bogus.
            self.tasks.insert(task_id, task);
            return Err(BuildflowError::InvalidTransition { from, to: next });
        }

        task.status = next;
        task.end_time = Some(Utc::now());
        if task.status_description.is_none() {
            task.status_description = result.message.clone();
        }

        info!(task_id = %task_id, status = %next, "Build task completed");
        self.datastore
            .save_record(BuildRecord::from_task(&task, Some(&result)))
            .await?;
        self.sink.emit(BuildEvent::task_completed(task_id, next)).await;

        if !next.is_successful() {
            self.cascade_failed_dependencies(&task).await?;
        }
        Ok(())
    }

    /// Requests cancellation of a task.
    ///
    /// Returns false for an unknown or already-terminal task, and for a
    /// running task whose cancellation the scheduler did not acknowledge. A
    /// task that has not started is cancelled locally either way.
    ///
    /// # Errors
    ///
    /// Scheduler or datastore failures.
    pub async fn cancel(&self, task_id: Uuid) -> Result<bool, BuildflowError> {
        let status = match self.tasks.get(&task_id) {
            Some(entry) => entry.status,
            None => return Ok(false),
        };

        match status {
            BuildCoordinationStatus::New | BuildCoordinationStatus::Enqueued => {
                // Not started: drop it from the scheduler queue best-effort
                // and cancel locally.
                if let Err(e) = self.scheduler.cancel(task_id).await {
                    debug!(task_id = %task_id, error = %e, "Scheduler cancel of queued task failed");
                }
                self.apply_cancellation(task_id, |s| {
                    matches!(
                        s,
                        BuildCoordinationStatus::New | BuildCoordinationStatus::Enqueued
                    )
                })
                .await
            }
            BuildCoordinationStatus::Building => {
                let acknowledged = self.scheduler.cancel(task_id).await?;
                if !acknowledged {
                    return Ok(false);
                }
                self.apply_cancellation(task_id, |s| s == BuildCoordinationStatus::Building)
                    .await
            }
            _ => Ok(false),
        }
    }

    async fn apply_cancellation(
        &self,
        task_id: Uuid,
        claimable: impl Fn(BuildCoordinationStatus) -> bool,
    ) -> Result<bool, BuildflowError> {
        let Some((_, mut task)) = self.tasks.remove_if(&task_id, |_, t| claimable(t.status))
        else {
            // Lost the race against a completion callback.
            return Ok(false);
        };

        task.status = BuildCoordinationStatus::Cancelled;
        task.status_description = Some("cancelled on request".to_string());
        task.end_time = Some(Utc::now());

        info!(task_id = %task_id, "Build task cancelled");
        self.datastore
            .save_record(BuildRecord::from_task(&task, None))
            .await?;
        self.sink
            .emit(BuildEvent::task_completed(task_id, task.status))
            .await;

        // Cancelling upstream work rejects undispatched dependants; they are
        // not themselves cancelled.
        self.cascade_failed_dependencies(&task).await?;
        Ok(true)
    }

    /// Transitively rejects every not-yet-dispatched dependant of an
    /// unsuccessfully terminated task.
    ///
    /// Claiming through a compare-and-swap on the registry entry makes the
    /// walk idempotent and safe to interleave with concurrent completions:
    /// whichever signal claims a task first wins, the other sees it gone.
    async fn cascade_failed_dependencies(
        &self,
        failed: &BuildTask,
    ) -> Result<(), BuildflowError> {
        let mut queue: Vec<Uuid> = failed.dependant_ids.iter().copied().collect();

        while let Some(id) = queue.pop() {
            let claimed = self.tasks.remove_if(&id, |_, t| {
                matches!(
                    t.status,
                    BuildCoordinationStatus::New | BuildCoordinationStatus::Enqueued
                )
            });
            let Some((_, mut task)) = claimed else {
                continue;
            };

            task.status = BuildCoordinationStatus::RejectedFailedDependencies;
            // First observed failure wins the description.
            if task.status_description.is_none() {
                task.status_description =
                    Some(format!("dependency '{}' terminated unsuccessfully", failed.name));
            }
            task.end_time = Some(Utc::now());

            info!(
                task_id = %task.id,
                failed_dependency = %failed.name,
                "Rejecting task, dependency failed"
            );
            self.datastore
                .save_record(BuildRecord::from_task(&task, None))
                .await?;
            self.sink
                .emit(BuildEvent::dependency_rejected(task.id, &failed.name))
                .await;

            // Keep the scheduler from ever dispatching the rejected vertex.
            if let Err(e) = self.scheduler.cancel(task.id).await {
                debug!(task_id = %task.id, error = %e, "Scheduler cancel of rejected task failed");
            }

            queue.extend(task.dependant_ids.iter().copied());
        }

        Ok(())
    }

    /// Snapshot of a task still owned by the coordinator.
    #[must_use]
    pub fn task(&self, task_id: Uuid) -> Option<BuildTask> {
        self.tasks.get(&task_id).map(|entry| entry.clone())
    }

    /// Number of tasks not yet terminal.
    #[must_use]
    pub fn active_task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Resolves once the task has left the coordinator, i.e. reached a
    /// terminal status and been handed to persistence.
    pub fn wait_for_completion(
        &self,
        task_id: Uuid,
        interval: Duration,
        timeout: Duration,
    ) -> MonitorHandle {
        let tasks = Arc::clone(&self.tasks);
        self.monitor
            .monitor_fn(move || !tasks.contains_key(&task_id), interval, timeout)
    }
}
