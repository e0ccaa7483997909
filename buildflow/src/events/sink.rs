//! Event sink trait and implementations.

use async_trait::async_trait;
use tracing::{debug, info, Level};

use crate::core::BuildEvent;

/// Trait for sinks receiving status-changed and push-result events.
///
/// Subscribers on the other side of the boundary (notification and messaging
/// layers) are external to this crate.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits an event asynchronously.
    async fn emit(&self, event: BuildEvent);

    /// Emits an event without blocking.
    ///
    /// Must never fail: errors are logged and suppressed.
    fn try_emit(&self, event: BuildEvent);
}

/// A no-op event sink that discards all events.
///
/// Used as the default when no sink is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event: BuildEvent) {
        // Intentionally empty - discards all events
    }

    fn try_emit(&self, _event: BuildEvent) {
        // Intentionally empty - discards all events
    }
}

/// An event sink that logs events using the tracing framework.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a new logging event sink with the specified level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    fn log_event(&self, event: &BuildEvent) {
        match self.level {
            Level::DEBUG => {
                debug!(
                    event_type = %event.event_type,
                    event_data = ?event.data,
                    "Event: {}", event.event_type
                );
            }
            _ => {
                info!(
                    event_type = %event.event_type,
                    event_data = ?event.data,
                    "Event: {}", event.event_type
                );
            }
        }
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event: BuildEvent) {
        self.log_event(&event);
    }

    fn try_emit(&self, event: BuildEvent) {
        self.log_event(&event);
    }
}

/// A collecting event sink for testing purposes.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: parking_lot::RwLock<Vec<BuildEvent>>,
}

impl CollectingEventSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<BuildEvent> {
        self.events.read().clone()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Returns events matching a type prefix.
    #[must_use]
    pub fn events_of_type(&self, type_prefix: &str) -> Vec<BuildEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type.starts_with(type_prefix))
            .cloned()
            .collect()
    }

    /// Clears all collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event: BuildEvent) {
        self.events.write().push(event);
    }

    fn try_emit(&self, event: BuildEvent) {
        self.events.write().push(event);
    }
}
