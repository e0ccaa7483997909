//! Graph construction and validation for build submissions.
//!
//! Validation is pure: no partial graph, no external calls, no side effects.
//! A rejected set is an expected outcome and travels as a value.

use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use super::Graph;
use crate::core::{BuildConfigurationAudited, BuildOptions, BuildTask};
use crate::errors::GraphValidationError;

/// Converts a set of audited configurations into a validated graph of build
/// tasks.
#[derive(Debug, Clone, Copy, Default)]
pub struct GraphBuilder;

impl GraphBuilder {
    /// Creates a new graph builder.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Validates the dependency structure and produces the task graph.
    ///
    /// # Errors
    ///
    /// Returns [`GraphValidationError::SelfDependency`] when a configuration
    /// references itself, [`GraphValidationError::MissingDependency`] when a
    /// declared dependency is not part of the set, and
    /// [`GraphValidationError::Cycle`] when the dependency relation contains
    /// a cycle. No task is created in any of these cases.
    pub fn build(
        &self,
        configs: &[BuildConfigurationAudited],
        options: BuildOptions,
        correlation_id: Uuid,
    ) -> Result<Graph<BuildTask>, GraphValidationError> {
        let by_id: HashMap<Uuid, &BuildConfigurationAudited> =
            configs.iter().map(|c| (c.id(), c)).collect();

        // Immediate self-reference is cheaper to refuse than to discover
        // through traversal.
        for config in configs {
            if config.dependency_ids.contains(&config.id()) {
                return Err(GraphValidationError::SelfDependency {
                    name: config.name.clone(),
                });
            }
        }

        for config in configs {
            for dep in &config.dependency_ids {
                if !by_id.contains_key(dep) {
                    return Err(GraphValidationError::MissingDependency {
                        name: config.name.clone(),
                        dependency: *dep,
                    });
                }
            }
        }

        detect_cycles(&by_id)?;

        // Validation passed; materialize one task per configuration and the
        // dependency edges between them.
        let mut task_ids: HashMap<Uuid, Uuid> = HashMap::new();
        let mut graph = Graph::new();
        for config in configs {
            let task = BuildTask::new(config, options, correlation_id);
            task_ids.insert(config.id(), task.id);
            graph.insert_vertex(task.id, task);
        }

        for config in configs {
            let Some(&dependent) = task_ids.get(&config.id()) else {
                continue;
            };
            for dep in &config.dependency_ids {
                let Some(&dependency) = task_ids.get(dep) else {
                    continue;
                };
                graph.add_edge(dependency, dependent);
                if let Some(task) = graph.vertex_mut(dependent) {
                    task.dependency_ids.insert(dependency);
                }
                if let Some(task) = graph.vertex_mut(dependency) {
                    task.dependant_ids.insert(dependent);
                }
            }
        }

        Ok(graph)
    }
}

/// Convenience wrapper over [`GraphBuilder::build`].
///
/// # Errors
///
/// See [`GraphBuilder::build`].
pub fn build_graph(
    configs: &[BuildConfigurationAudited],
    options: BuildOptions,
    correlation_id: Uuid,
) -> Result<Graph<BuildTask>, GraphValidationError> {
    GraphBuilder::new().build(configs, options, correlation_id)
}

/// Depth-first cycle detection with an on-current-path marker set.
fn detect_cycles(
    by_id: &HashMap<Uuid, &BuildConfigurationAudited>,
) -> Result<(), GraphValidationError> {
    fn dfs(
        id: Uuid,
        by_id: &HashMap<Uuid, &BuildConfigurationAudited>,
        visited: &mut HashSet<Uuid>,
        on_path: &mut HashSet<Uuid>,
        path: &mut Vec<Uuid>,
    ) -> Result<(), Vec<Uuid>> {
        if on_path.contains(&id) {
            // Back-edge: the cycle is the path suffix starting at `id`.
            let start = path.iter().position(|n| *n == id).unwrap_or(0);
            let mut cycle: Vec<Uuid> = path[start..].to_vec();
            cycle.push(id);
            return Err(cycle);
        }
        if visited.contains(&id) {
            return Ok(());
        }

        visited.insert(id);
        on_path.insert(id);
        path.push(id);

        if let Some(config) = by_id.get(&id) {
            for dep in &config.dependency_ids {
                dfs(*dep, by_id, visited, on_path, path)?;
            }
        }

        on_path.remove(&id);
        path.pop();
        Ok(())
    }

    let mut visited = HashSet::new();
    let mut on_path = HashSet::new();
    let mut path = Vec::new();

    for id in by_id.keys() {
        if let Err(cycle) = dfs(*id, by_id, &mut visited, &mut on_path, &mut path) {
            let names = cycle
                .iter()
                .map(|n| {
                    by_id
                        .get(n)
                        .map_or_else(|| n.to_string(), |c| c.name.clone())
                })
                .collect();
            return Err(GraphValidationError::Cycle { path: names });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::BuildConfiguration;
    use pretty_assertions::assert_eq;

    fn audit_all(configs: &[&BuildConfiguration]) -> Vec<BuildConfigurationAudited> {
        configs.iter().map(|c| c.audit()).collect()
    }

    #[test]
    fn test_single_configuration() {
        let a = BuildConfiguration::new("a", "make");
        let graph = build_graph(&audit_all(&[&a]), BuildOptions::default(), Uuid::new_v4())
            .expect("valid set");
        assert_eq!(graph.vertex_count(), 1);
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn test_vertex_and_edge_counts_preserved() {
        // C -> B -> A, D -> {A, B}, E independent: 5 vertices, 4 edges.
        let a = BuildConfiguration::new("a", "make");
        let b = BuildConfiguration::new("b", "make").with_dependency(a.id);
        let c = BuildConfiguration::new("c", "make").with_dependency(b.id);
        let d = BuildConfiguration::new("d", "make")
            .with_dependency(a.id)
            .with_dependency(b.id);
        let e = BuildConfiguration::new("e", "make");

        let graph = build_graph(
            &audit_all(&[&a, &b, &c, &d, &e]),
            BuildOptions::default(),
            Uuid::new_v4(),
        )
        .expect("valid set");

        assert_eq!(graph.vertex_count(), 5);
        assert_eq!(graph.edge_count(), 4);
    }

    #[test]
    fn test_dependency_and_dependant_ids_filled() {
        let a = BuildConfiguration::new("a", "make");
        let b = BuildConfiguration::new("b", "make").with_dependency(a.id);
        let graph = build_graph(
            &audit_all(&[&a, &b]),
            BuildOptions::default(),
            Uuid::new_v4(),
        )
        .expect("valid set");

        let (a_task_id, a_task) = graph
            .vertices()
            .find(|(_, t)| t.name == "a")
            .expect("task a");
        let (b_task_id, b_task) = graph
            .vertices()
            .find(|(_, t)| t.name == "b")
            .expect("task b");

        assert!(b_task.dependency_ids.contains(&a_task_id));
        assert!(a_task.dependant_ids.contains(&b_task_id));
        assert!(a_task.dependency_ids.is_empty());
    }

    #[test]
    fn test_self_dependency_rejected() {
        let mut a = BuildConfiguration::new("a", "make");
        a.dependency_ids.insert(a.id);

        let err = build_graph(&audit_all(&[&a]), BuildOptions::default(), Uuid::new_v4())
            .expect_err("self-dependency must be rejected");
        assert!(err.to_string().contains("itself"));
    }

    #[test]
    fn test_two_node_cycle_rejected() {
        let mut a = BuildConfiguration::new("a", "make");
        let b = BuildConfiguration::new("b", "make").with_dependency(a.id);
        a.dependency_ids.insert(b.id);

        let err = build_graph(
            &audit_all(&[&a, &b]),
            BuildOptions::default(),
            Uuid::new_v4(),
        )
        .expect_err("cycle must be rejected");
        assert!(err.to_string().contains("Cycle dependencies found"));
    }

    #[test]
    fn test_three_node_cycle_rejected() {
        // A -> B -> C -> A
        let mut a = BuildConfiguration::new("a", "make");
        let mut b = BuildConfiguration::new("b", "make");
        let mut c = BuildConfiguration::new("c", "make");
        a.dependency_ids.insert(b.id);
        b.dependency_ids.insert(c.id);
        c.dependency_ids.insert(a.id);

        let err = build_graph(
            &audit_all(&[&a, &b, &c]),
            BuildOptions::default(),
            Uuid::new_v4(),
        )
        .expect_err("cycle must be rejected");
        assert!(err.to_string().contains("Cycle dependencies found"));
        assert!(matches!(
            err,
            GraphValidationError::Cycle { ref path } if path.len() == 4
        ));
    }

    #[test]
    fn test_diamond_is_not_a_cycle() {
        let a = BuildConfiguration::new("a", "make");
        let b = BuildConfiguration::new("b", "make").with_dependency(a.id);
        let c = BuildConfiguration::new("c", "make").with_dependency(a.id);
        let d = BuildConfiguration::new("d", "make")
            .with_dependency(b.id)
            .with_dependency(c.id);

        let result = build_graph(
            &audit_all(&[&a, &b, &c, &d]),
            BuildOptions::default(),
            Uuid::new_v4(),
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_missing_dependency_rejected() {
        let a = BuildConfiguration::new("a", "make").with_dependency(Uuid::new_v4());
        let err = build_graph(&audit_all(&[&a]), BuildOptions::default(), Uuid::new_v4())
            .expect_err("dangling dependency must be rejected");
        assert!(matches!(
            err,
            GraphValidationError::MissingDependency { .. }
        ));
    }

    #[test]
    fn test_all_tasks_share_correlation_id() {
        let a = BuildConfiguration::new("a", "make");
        let b = BuildConfiguration::new("b", "make").with_dependency(a.id);
        let correlation_id = Uuid::new_v4();
        let graph = build_graph(&audit_all(&[&a, &b]), BuildOptions::default(), correlation_id)
            .expect("valid set");
        assert!(graph
            .vertices()
            .all(|(_, t)| t.correlation_id == correlation_id));
    }
}
