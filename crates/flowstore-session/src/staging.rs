//! Mutation staging for one unit of work.
//!
//! Two explicit staging areas live here:
//!
//! - per-type lists of entities waiting to be inserted, keyed by type tag and
//!   remembering the order in which types were first staged,
//! - the ordered list of [`DeleteOperation`]s.
//!
//! Updates are never registered: any cached entity with a snapshot is a
//! candidate, and the flush decides by comparing states.

use crate::cache::TrackedEntity;
use flowstore_core::{EntityType, Error, Parameter, Result};
use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;

/// An entity staged for insert or delete, with its identity resolved.
#[derive(Clone)]
pub struct StagedEntity {
    entity_type: EntityType,
    id: String,
    entity: Arc<dyn TrackedEntity>,
}

impl StagedEntity {
    /// Stage an entity; it must already carry an id.
    pub fn new(entity: Arc<dyn TrackedEntity>) -> Result<Self> {
        let entity_type = entity.entity_type();
        let id = entity.id().ok_or(Error::MissingIdentifier { entity_type })?;
        Ok(Self {
            entity_type,
            id,
            entity,
        })
    }

    pub fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn entity(&self) -> &Arc<dyn TrackedEntity> {
        &self.entity
    }

    fn is_same_row(&self, entity_type: EntityType, id: &str) -> bool {
        self.entity_type == entity_type && self.id == id
    }
}

impl fmt::Debug for StagedEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[id={}]", self.entity_type, self.id)
    }
}

/// A staged deletion.
#[derive(Debug, Clone)]
pub enum DeleteOperation {
    /// One entity, deleted by its type's delete statement.
    Checked(StagedEntity),
    /// Same-type entities deleted through one batch statement.
    BatchChecked {
        entity_type: EntityType,
        statement: String,
        members: Vec<StagedEntity>,
    },
    /// Opaque statement with no identity and no row-count check.
    Raw {
        statement: String,
        parameter: Parameter,
    },
}

impl DeleteOperation {
    /// Type targeted by this delete, if it has an identifiable target.
    pub fn entity_type(&self) -> Option<EntityType> {
        match self {
            DeleteOperation::Checked(target) => Some(target.entity_type),
            DeleteOperation::BatchChecked { entity_type, .. } => Some(*entity_type),
            DeleteOperation::Raw { .. } => None,
        }
    }

    /// Number of entities this operation targets (0 for raw deletes).
    pub fn target_count(&self) -> usize {
        match self {
            DeleteOperation::Checked(_) => 1,
            DeleteOperation::BatchChecked { members, .. } => members.len(),
            DeleteOperation::Raw { .. } => 0,
        }
    }

    /// Whether this operation already deletes the row `(entity_type, id)`.
    pub fn covers(&self, entity_type: EntityType, id: &str) -> bool {
        match self {
            DeleteOperation::Checked(target) => target.is_same_row(entity_type, id),
            DeleteOperation::BatchChecked { members, .. } => {
                members.iter().any(|m| m.is_same_row(entity_type, id))
            }
            DeleteOperation::Raw { .. } => false,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            DeleteOperation::Checked(_) => "checked",
            DeleteOperation::BatchChecked { .. } => "batch-checked",
            DeleteOperation::Raw { .. } => "raw",
        }
    }
}

/// Counts of pending changes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingCounts {
    /// Entities staged for insert.
    pub new: usize,
    /// Cached entities whose live state differs from their snapshot.
    pub dirty: usize,
    /// Staged delete operations.
    pub deleted: usize,
}

impl PendingCounts {
    /// Total number of pending operations.
    pub fn total(&self) -> usize {
        self.new + self.dirty + self.deleted
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// Staged work drained for a flush.
#[derive(Debug, Default)]
pub struct StagedWork {
    pub inserts: IndexMap<EntityType, Vec<StagedEntity>>,
    pub deletes: Vec<DeleteOperation>,
}

/// Inserts and deletes staged by the current session.
#[derive(Debug, Default)]
pub struct UnitOfWork {
    inserts: IndexMap<EntityType, Vec<StagedEntity>>,
    deletes: Vec<DeleteOperation>,
}

impl UnitOfWork {
    /// Create a new empty Unit of Work.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entity to its type's pending-insert list.
    pub fn register_insert(&mut self, staged: StagedEntity) {
        tracing::debug!(
            entity_type = %staged.entity_type,
            id = %staged.id,
            "Staged insert"
        );
        self.inserts
            .entry(staged.entity_type)
            .or_default()
            .push(staged);
    }

    /// Append a delete unless a pending delete already covers it.
    ///
    /// A row is deleted by at most one staged operation: a checked delete of a
    /// row that is already staged, alone or as a batch member, is skipped, and
    /// a batch loses the members an earlier delete covers. A batch left with no
    /// members is skipped. Raw deletes are redundant only when statement and
    /// parameter both match a pending raw delete.
    ///
    /// Returns `false` when nothing was staged.
    pub fn register_delete(&mut self, mut operation: DeleteOperation) -> bool {
        let redundant = match &mut operation {
            DeleteOperation::Checked(target) => {
                self.is_delete_pending(target.entity_type, &target.id)
            }
            DeleteOperation::BatchChecked { members, .. } => {
                let before = members.len();
                members.retain(|m| !self.is_delete_pending(m.entity_type, &m.id));
                if members.len() < before {
                    tracing::debug!(
                        dropped = before - members.len(),
                        "Dropped batch members already staged for delete"
                    );
                }
                members.is_empty()
            }
            DeleteOperation::Raw {
                statement,
                parameter,
            } => self.deletes.iter().any(|pending| {
                matches!(
                    pending,
                    DeleteOperation::Raw { statement: s, parameter: p }
                        if *s == *statement && *p == *parameter
                )
            }),
        };
        if redundant {
            tracing::warn!(
                kind = operation.kind(),
                entity_type = ?operation.entity_type(),
                "Skipping redundant delete"
            );
            return false;
        }
        tracing::debug!(
            kind = operation.kind(),
            entity_type = ?operation.entity_type(),
            targets = operation.target_count(),
            "Staged delete"
        );
        self.deletes.push(operation);
        true
    }

    /// Whether some pending delete already removes `(entity_type, id)`.
    pub fn is_delete_pending(&self, entity_type: EntityType, id: &str) -> bool {
        self.deletes.iter().any(|pending| pending.covers(entity_type, id))
    }

    pub fn inserts(&self) -> &IndexMap<EntityType, Vec<StagedEntity>> {
        &self.inserts
    }

    pub fn deletes(&self) -> &[DeleteOperation] {
        &self.deletes
    }

    /// Number of entities staged for insert.
    pub fn insert_count(&self) -> usize {
        self.inserts.values().map(Vec::len).sum()
    }

    pub fn delete_count(&self) -> usize {
        self.deletes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insert_count() == 0 && self.deletes.is_empty()
    }

    /// Drain everything staged so far.
    pub fn take(&mut self) -> StagedWork {
        StagedWork {
            inserts: std::mem::take(&mut self.inserts),
            deletes: std::mem::take(&mut self.deletes),
        }
    }

    /// Discard all staged work.
    pub fn clear(&mut self) {
        self.inserts.clear();
        self.deletes.clear();
    }
}
