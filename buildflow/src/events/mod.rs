//! Event boundary: sinks consuming coordinator and push events.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
