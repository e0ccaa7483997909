//! Core domain types: configurations, tasks, records, statuses and events.

mod config;
mod event;
mod record;
mod status;
mod task;

pub use config::{BuildConfiguration, BuildConfigurationAudited, IdRev, User};
pub use event::BuildEvent;
pub use record::{BuildConfigSetRecord, BuildRecord, BuildSetTask};
pub use status::{BuildCoordinationStatus, CompletionStatus, SetStatus};
pub use task::{
    AlignmentPreference, BuildOptions, BuildResult, BuildTask, RebuildMode, RemoteBuildTask,
};
