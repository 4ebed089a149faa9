//! Entity lifecycle notifications.

use crate::entity::{EntityType, PersistentState};

/// Notification emitted by a flush.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityEvent {
    /// A variable-like entity was deleted, or its insert was cancelled by a
    /// delete before ever reaching the store.
    VariableDeleted {
        entity_type: EntityType,
        id: String,
        /// Last known persistent state of the entity.
        state: PersistentState,
    },
}

impl EntityEvent {
    pub fn entity_type(&self) -> EntityType {
        match self {
            EntityEvent::VariableDeleted { entity_type, .. } => *entity_type,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            EntityEvent::VariableDeleted { id, .. } => id,
        }
    }
}

/// Receiver of flush notifications.
pub trait EventDispatcher: Send + Sync {
    /// Consulted once per flush; when false no event of that flush is built.
    fn is_enabled(&self) -> bool;

    fn dispatch(&self, event: EntityEvent);
}

/// Dispatcher that is always disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDispatcher;

impl EventDispatcher for NoopDispatcher {
    fn is_enabled(&self) -> bool {
        false
    }

    fn dispatch(&self, _event: EntityEvent) {}
}
