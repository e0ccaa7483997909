//! Configuration fixtures for tests and benchmarks.

use uuid::Uuid;

use crate::core::{
    BuildConfiguration, BuildCoordinationStatus, BuildOptions, BuildRecord, BuildResult,
    BuildTask,
};

/// A minimal configuration with the given name.
#[must_use]
pub fn config(name: &str) -> BuildConfiguration {
    BuildConfiguration::new(name, format!("build {name}"))
}

/// A linear chain: each configuration depends on the previous one.
#[must_use]
pub fn chain(names: &[&str]) -> Vec<BuildConfiguration> {
    let mut configs: Vec<BuildConfiguration> = Vec::with_capacity(names.len());
    for name in names {
        let mut next = config(name);
        if let Some(previous) = configs.last() {
            next.dependency_ids.insert(previous.id);
        }
        configs.push(next);
    }
    configs
}

/// A diamond: d -> {b, c} -> a.
#[must_use]
pub fn diamond() -> Vec<BuildConfiguration> {
    let a = config("a");
    let b = config("b").with_dependency(a.id);
    let c = config("c").with_dependency(a.id);
    let d = config("d").with_dependency(b.id).with_dependency(c.id);
    vec![a, b, c, d]
}

/// The five-configuration scenario: C -> B -> A, D -> {A, B}, E independent.
#[must_use]
pub fn classic_five() -> Vec<BuildConfiguration> {
    let a = config("a");
    let b = config("b").with_dependency(a.id);
    let c = config("c").with_dependency(b.id);
    let d = config("d").with_dependency(a.id).with_dependency(b.id);
    let e = config("e");
    vec![a, b, c, d, e]
}

/// A persisted successful record for the configuration under the options.
#[must_use]
pub fn successful_record(config: &BuildConfiguration, options: BuildOptions) -> BuildRecord {
    let mut task = BuildTask::new(&config.audit(), options, Uuid::new_v4());
    task.status = BuildCoordinationStatus::Done;
    task.end_time = Some(chrono::Utc::now());
    BuildRecord::from_task(&task, Some(&BuildResult::success()))
}
