//! Snapshot-based dirty detection.
//!
//! A snapshot is the persistent state an entity had when it entered the cache
//! (on load) or when the store last confirmed a write for it. Comparing the
//! live state against it tells the flush whether an update is needed.

use flowstore_core::PersistentState;
use std::time::Instant;

/// Persistent state of an entity at a point in time.
#[derive(Debug, Clone)]
pub struct ObjectSnapshot {
    state: PersistentState,
    taken_at: Instant,
}

impl ObjectSnapshot {
    /// Capture a snapshot now.
    pub fn new(state: PersistentState) -> Self {
        Self {
            state,
            taken_at: Instant::now(),
        }
    }

    pub fn state(&self) -> &PersistentState {
        &self.state
    }

    /// Get the timestamp when the snapshot was taken.
    pub fn taken_at(&self) -> Instant {
        self.taken_at
    }

    /// Whether `current` differs from the captured state.
    pub fn is_dirty(&self, current: &PersistentState) -> bool {
        let dirty = &self.state != current;
        tracing::trace!(dirty, "Dirty check result");
        dirty
    }

    /// Top-level properties whose value differs between snapshot and `current`.
    ///
    /// Non-object states compare as a whole and report `"$"` when they differ.
    pub fn changed_fields(&self, current: &PersistentState) -> Vec<String> {
        match (self.state.as_object(), current.as_object()) {
            (Some(original), Some(live)) => {
                let mut changed: Vec<String> = original
                    .iter()
                    .filter(|(name, value)| live.get(name.as_str()) != Some(*value))
                    .map(|(name, _)| name.clone())
                    .collect();
                changed.extend(
                    live.keys()
                        .filter(|name| !original.contains_key(name.as_str()))
                        .cloned(),
                );
                changed.sort();
                changed
            }
            _ if self.state != *current => vec!["$".to_string()],
            _ => Vec::new(),
        }
    }
}
