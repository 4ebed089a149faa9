//! Identity cache: one live object per (entity type, id) within a session.
//!
//! Entities are handed out as [`EntityRef`]s (`Arc<RwLock<E>>`). Looking the
//! same row up twice returns clones of the same `Arc`, so a change made through
//! one handle is visible through every other handle and to the flush.
//!
//! # Example
//!
//! ```ignore
//! let mut cache = EntityCache::new();
//! let first = cache.filter(loaded_task)?;
//! let second = cache.filter(loaded_again)?;
//! assert!(Arc::ptr_eq(&first, &second));
//! ```
//!
//! Handles must not hold a write guard across a call into the session; the
//! flush takes read locks on every cached entity.

use crate::change_tracker::ObjectSnapshot;
use flowstore_core::{Entity, EntityType, Error, Parameter, PersistentState, Result};
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A reference to an object in the identity cache.
pub type EntityRef<E> = Arc<RwLock<E>>;

/// Object-safe view of a cached entity, used where the concrete type is erased.
///
/// Implemented for every `RwLock<E>` with `E: Entity`, so an `EntityRef<E>`
/// coerces into `Arc<dyn TrackedEntity>` without copying the entity.
pub trait TrackedEntity: Send + Sync {
    fn entity_type(&self) -> EntityType;

    fn id(&self) -> Option<String>;

    fn set_id(&self, id: String);

    fn persistent_state(&self) -> Result<PersistentState>;

    /// The full entity as a statement parameter.
    fn parameter(&self) -> Result<Parameter>;

    /// Current revision, if the entity is revisioned.
    fn revision(&self) -> Option<i32>;

    /// Revision after the next successful write, if the entity is revisioned.
    fn revision_next(&self) -> Option<i32>;

    /// Move the revision to its successor. No-op for unrevisioned entities.
    fn advance_revision(&self);

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

fn read<E>(lock: &RwLock<E>) -> RwLockReadGuard<'_, E> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<E>(lock: &RwLock<E>) -> RwLockWriteGuard<'_, E> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

impl<E: Entity> TrackedEntity for RwLock<E> {
    fn entity_type(&self) -> EntityType {
        E::ENTITY_TYPE
    }

    fn id(&self) -> Option<String> {
        read(self).id().map(str::to_string)
    }

    fn set_id(&self, id: String) {
        write(self).set_id(id);
    }

    fn persistent_state(&self) -> Result<PersistentState> {
        read(self).persistent_state()
    }

    fn parameter(&self) -> Result<Parameter> {
        Ok(serde_json::to_value(&*read(self))?)
    }

    fn revision(&self) -> Option<i32> {
        read(self).as_revisioned().map(|r| r.revision())
    }

    fn revision_next(&self) -> Option<i32> {
        read(self).as_revisioned().map(|r| r.revision_next())
    }

    fn advance_revision(&self) {
        let mut guard = write(self);
        if let Some(revisioned) = guard.as_revisioned_mut() {
            let next = revisioned.revision_next();
            revisioned.set_revision(next);
        }
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Downcast an erased entity back to its concrete handle.
pub(crate) fn downcast<E: Entity>(entity: &Arc<dyn TrackedEntity>) -> Option<EntityRef<E>> {
    Arc::clone(entity).into_any().downcast::<RwLock<E>>().ok()
}

/// A cached entity and the snapshot it is diffed against.
#[derive(Clone)]
pub struct CacheEntry {
    entity: Arc<dyn TrackedEntity>,
    snapshot: Option<ObjectSnapshot>,
}

impl CacheEntry {
    pub fn entity(&self) -> &Arc<dyn TrackedEntity> {
        &self.entity
    }

    /// Snapshot, absent for entities staged for insert.
    pub fn snapshot(&self) -> Option<&ObjectSnapshot> {
        self.snapshot.as_ref()
    }
}

impl std::fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEntry")
            .field("entity_type", &self.entity.entity_type())
            .field("id", &self.entity.id())
            .field("has_snapshot", &self.snapshot.is_some())
            .finish()
    }
}

/// Session-scoped identity cache keyed by type, then id.
///
/// Iteration order is deterministic (type name, then id), which keeps the
/// order of update statements stable across runs.
#[derive(Debug, Default)]
pub struct EntityCache {
    entries: BTreeMap<EntityType, BTreeMap<String, CacheEntry>>,
}

impl EntityCache {
    /// Create a new empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Previously cached instance for `(E, id)`, if any.
    pub fn get<E: Entity>(&self, id: &str) -> Option<EntityRef<E>> {
        let entry = self.entries.get(&E::ENTITY_TYPE)?.get(id)?;
        downcast::<E>(&entry.entity)
    }

    /// Insert or overwrite the entry for an entity.
    pub fn put<E: Entity>(&mut self, entity: &EntityRef<E>, capture_snapshot: bool) -> Result<()> {
        let erased: Arc<dyn TrackedEntity> = entity.clone();
        self.put_erased(erased, capture_snapshot)
    }

    /// [`put`](Self::put) for an already type-erased entity.
    pub fn put_erased(
        &mut self,
        entity: Arc<dyn TrackedEntity>,
        capture_snapshot: bool,
    ) -> Result<()> {
        let entity_type = entity.entity_type();
        let id = entity.id().ok_or(Error::MissingIdentifier { entity_type })?;
        let snapshot = if capture_snapshot {
            Some(ObjectSnapshot::new(entity.persistent_state()?))
        } else {
            None
        };
        tracing::trace!(
            entity_type = %entity_type,
            id = %id,
            snapshot = capture_snapshot,
            "Caching entity"
        );
        self.entries
            .entry(entity_type)
            .or_default()
            .insert(id, CacheEntry { entity, snapshot });
        Ok(())
    }

    /// Identity-map a freshly loaded entity.
    ///
    /// Returns the cached instance when one exists, discarding `loaded`.
    /// Otherwise caches `loaded` with a snapshot and returns it.
    pub fn filter<E: Entity>(&mut self, loaded: E) -> Result<EntityRef<E>> {
        let id = loaded
            .id()
            .ok_or(Error::MissingIdentifier {
                entity_type: E::ENTITY_TYPE,
            })?
            .to_string();
        if let Some(existing) = self.get::<E>(&id) {
            tracing::trace!(entity_type = %E::ENTITY_TYPE, id = %id, "Cache hit on load");
            return Ok(existing);
        }
        let entity = Arc::new(RwLock::new(loaded));
        self.put(&entity, true)?;
        Ok(entity)
    }

    /// Drop the entry for `(entity_type, id)`. Returns whether one existed.
    pub fn remove(&mut self, entity_type: EntityType, id: &str) -> bool {
        let Some(by_id) = self.entries.get_mut(&entity_type) else {
            return false;
        };
        let removed = by_id.remove(id).is_some();
        if by_id.is_empty() {
            self.entries.remove(&entity_type);
        }
        removed
    }

    pub fn contains(&self, entity_type: EntityType, id: &str) -> bool {
        self.entries
            .get(&entity_type)
            .is_some_and(|by_id| by_id.contains_key(id))
    }

    /// Entry for `(entity_type, id)`.
    pub fn entry(&self, entity_type: EntityType, id: &str) -> Option<&CacheEntry> {
        self.entries.get(&entity_type)?.get(id)
    }

    /// Re-capture the snapshot of a cached entity from its live state.
    pub fn refresh_snapshot(&mut self, entity_type: EntityType, id: &str) -> Result<()> {
        if let Some(entry) = self
            .entries
            .get_mut(&entity_type)
            .and_then(|by_id| by_id.get_mut(id))
        {
            entry.snapshot = Some(ObjectSnapshot::new(entry.entity.persistent_state()?));
        }
        Ok(())
    }

    /// All entries, in type then id order.
    pub fn iter(&self) -> impl Iterator<Item = &CacheEntry> {
        self.entries.values().flat_map(BTreeMap::values)
    }

    /// Number of cached entities.
    pub fn len(&self) -> usize {
        self.entries.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of cached entities per type.
    pub fn counts_by_type(&self) -> Vec<(EntityType, usize)> {
        self.entries
            .iter()
            .map(|(entity_type, by_id)| (*entity_type, by_id.len()))
            .collect()
    }

    /// Clear all entries from the cache.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
