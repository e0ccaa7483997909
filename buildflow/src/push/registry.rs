//! In-progress push registry with atomic check-and-set insertion.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Marker for one in-flight push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushMarker {
    /// The build record being pushed.
    pub record_id: Uuid,
    /// The tag the downstream import runs under.
    pub tag: String,
    /// When the push was accepted.
    pub started_at: DateTime<Utc>,
}

/// Tracks at most one in-flight push per build record.
///
/// Explicitly constructed and injected so lifetime and test isolation are
/// under the caller's control. Entries are only removed by the matching
/// completion or an explicit cancellation.
#[derive(Debug, Default)]
pub struct InProgressRegistry {
    entries: DashMap<Uuid, PushMarker>,
}

impl InProgressRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically claims the record for a push.
    ///
    /// Returns false when a push for the record is already in flight; the
    /// existing marker is left untouched.
    pub fn try_begin(&self, record_id: Uuid, tag: impl Into<String>) -> bool {
        match self.entries.entry(record_id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => {
                vacant.insert(PushMarker {
                    record_id,
                    tag: tag.into(),
                    started_at: Utc::now(),
                });
                true
            }
        }
    }

    /// Removes and returns the marker for the record, if one exists.
    pub fn complete(&self, record_id: Uuid) -> Option<PushMarker> {
        self.entries.remove(&record_id).map(|(_, marker)| marker)
    }

    /// Returns the marker for the record, if one exists.
    #[must_use]
    pub fn get(&self, record_id: Uuid) -> Option<PushMarker> {
        self.entries.get(&record_id).map(|entry| entry.clone())
    }

    /// Returns true if a push for the record is in flight.
    #[must_use]
    pub fn contains(&self, record_id: Uuid) -> bool {
        self.entries.contains_key(&record_id)
    }

    /// Number of in-flight pushes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no push is in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
