//! Decides per configuration whether a prior successful build already
//! satisfies the request.
//!
//! The decision flows forward through the graph: a dependent of a rebuilding
//! node must rebuild as well, whatever its own fingerprint says.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::core::{BuildCoordinationStatus, BuildTask, RebuildMode};
use crate::errors::DatastoreError;
use crate::graph::Graph;
use crate::ports::BuildDatastore;

/// Outcome of the rebuild decision for one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebuildDecision {
    /// The task must be built.
    Rebuild {
        /// Why the rebuild is necessary.
        reason: String,
    },
    /// A prior successful record satisfies the request.
    NoRebuildRequired {
        /// The satisfying record, when one exists.
        prior_record: Option<Uuid>,
    },
}

impl RebuildDecision {
    /// Returns true if the task must be built.
    #[must_use]
    pub fn is_rebuild(&self) -> bool {
        matches!(self, Self::Rebuild { .. })
    }
}

/// Applies the rebuild policy of the submission to each task of a graph.
pub struct RebuildDecisionEngine {
    datastore: Arc<dyn BuildDatastore>,
}

impl RebuildDecisionEngine {
    /// Creates a new engine over the given datastore.
    #[must_use]
    pub fn new(datastore: Arc<dyn BuildDatastore>) -> Self {
        Self { datastore }
    }

    /// Decides whether one task needs building.
    ///
    /// `dependency_rebuilding` must be true when any of the task's
    /// dependencies was already decided to rebuild in the current batch.
    ///
    /// # Errors
    ///
    /// Propagates datastore failures.
    pub async fn decide(
        &self,
        task: &BuildTask,
        dependency_rebuilding: bool,
    ) -> Result<RebuildDecision, DatastoreError> {
        let temporary = task.options.temporary_build;
        match task.options.rebuild_mode {
            RebuildMode::Force => Ok(RebuildDecision::Rebuild {
                reason: "forced rebuild".to_string(),
            }),
            RebuildMode::ImplicitDependencyCheck => {
                if dependency_rebuilding {
                    return Ok(RebuildDecision::Rebuild {
                        reason: "a dependency rebuilds in this set".to_string(),
                    });
                }
                let changed = self
                    .datastore
                    .requires_rebuild(&task.id_rev, &task.fingerprint, temporary, &[])
                    .await?;
                if changed {
                    return Ok(RebuildDecision::Rebuild {
                        reason: "configuration changed since the last successful build"
                            .to_string(),
                    });
                }
                let prior = self
                    .datastore
                    .get_latest_successful_record(&task.id_rev, temporary)
                    .await?;
                Ok(RebuildDecision::NoRebuildRequired {
                    prior_record: prior.map(|r| r.id),
                })
            }
            RebuildMode::ExplicitDependencyCheck => {
                if task.explicitly_dirty {
                    return Ok(RebuildDecision::Rebuild {
                        reason: "explicitly marked dirty".to_string(),
                    });
                }
                if dependency_rebuilding {
                    return Ok(RebuildDecision::Rebuild {
                        reason: "a dependency rebuilds in this set".to_string(),
                    });
                }
                let prior = self
                    .datastore
                    .get_latest_successful_record(&task.id_rev, temporary)
                    .await?;
                Ok(RebuildDecision::NoRebuildRequired {
                    prior_record: prior.map(|r| r.id),
                })
            }
        }
    }

    /// Walks the graph in dependency order, short-circuits every task a
    /// prior record satisfies, and returns the ids of the tasks that must be
    /// built.
    ///
    /// Short-circuited tasks move to `RejectedAlreadyBuilt` and are never
    /// submitted to the scheduler.
    ///
    /// # Errors
    ///
    /// Propagates datastore failures; the graph is left unmodified past the
    /// failing vertex.
    pub async fn annotate_graph(
        &self,
        graph: &mut Graph<BuildTask>,
    ) -> Result<Vec<Uuid>, DatastoreError> {
        let order = graph.topological_order();
        let mut rebuilding: HashSet<Uuid> = HashSet::new();

        for id in order {
            let Some(task) = graph.vertex(id) else {
                continue;
            };
            let dependency_rebuilding = task
                .dependency_ids
                .iter()
                .any(|dep| rebuilding.contains(dep));
            let decision = self.decide(task, dependency_rebuilding).await?;

            match decision {
                RebuildDecision::Rebuild { reason } => {
                    debug!(task_id = %id, name = %task.name, reason = %reason, "Task requires rebuild");
                    rebuilding.insert(id);
                }
                RebuildDecision::NoRebuildRequired { prior_record } => {
                    if let Some(task) = graph.vertex_mut(id) {
                        debug!(
                            task_id = %id,
                            name = %task.name,
                            prior_record = ?prior_record,
                            "No rebuild required"
                        );
                        task.status = BuildCoordinationStatus::RejectedAlreadyBuilt;
                        task.status_description = Some(match prior_record {
                            Some(record) => format!("satisfied by existing build {record}"),
                            None => "no rebuild required".to_string(),
                        });
                        task.no_rebuild_cause = prior_record;
                        task.end_time = Some(chrono::Utc::now());
                    }
                }
            }
        }

        Ok(rebuilding.into_iter().collect())
    }
}
