//! # Buildflow
//!
//! A build coordination and dependency graph engine.
//!
//! Buildflow decides which of a set of interdependent build configurations
//! actually need rebuilding, validates the dependency structure, submits the
//! work to an external execution scheduler, and tracks every task to
//! completion:
//!
//! - **Graph validation**: self-dependencies and cycles are rejected up
//!   front, with a human-readable reason and no partial submission
//! - **Rebuild decisions**: prior successful builds short-circuit unchanged
//!   configurations; rebuilds propagate forward through the graph
//! - **Status ownership**: a strict per-task state machine with cascading
//!   failed-dependency rejection and idempotent completion handling
//! - **Group aggregation**: set-level status derived by a polling job under
//!   optimistic versioning
//! - **Exactly-once push**: finished results are forwarded downstream,
//!   deduplicated in flight and retried with bounded backoff
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use buildflow::prelude::*;
//!
//! let coordinator = BuildCoordinator::new(scheduler, datastore, sink);
//! let set = coordinator
//!     .build_set(&configs, &user, BuildOptions::default())
//!     .await?;
//!
//! if set.is_rejected() {
//!     eprintln!("rejected: {:?}", set.description);
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod aggregator;
pub mod coordinator;
pub mod core;
pub mod errors;
pub mod events;
pub mod graph;
pub mod monitor;
pub mod ports;
pub mod push;
pub mod rebuild;
pub mod retry;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::aggregator::{AggregatorConfig, SetRecordAggregator};
    pub use crate::coordinator::BuildCoordinator;
    pub use crate::core::{
        AlignmentPreference, BuildConfigSetRecord, BuildConfiguration,
        BuildConfigurationAudited, BuildCoordinationStatus, BuildEvent, BuildOptions,
        BuildRecord, BuildResult, BuildSetTask, BuildTask, CompletionStatus, IdRev,
        RebuildMode, RemoteBuildTask, SetStatus, User,
    };
    pub use crate::errors::{
        BuildflowError, DatastoreError, GraphValidationError, MonitorError, PushClientError,
        SchedulerError,
    };
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::graph::{build_graph, Graph, GraphBuilder};
    pub use crate::monitor::{Condition, MonitorHandle, PollingMonitor};
    pub use crate::ports::{BuildDatastore, BuildPushClient, Scheduler};
    pub use crate::push::{
        InProgressRegistry, PushManager, PushPayload, PushRequest, PushResult, PushStatus,
    };
    pub use crate::rebuild::{RebuildDecision, RebuildDecisionEngine};
    pub use crate::retry::{BackoffStrategy, JitterStrategy, RetryConfig};
}
