//! Session and unit of work for Flowstore.
//!
//! `flowstore-session` is the **unit-of-work layer**. One [`Session`] wraps one
//! [`StatementExecutor`] for the duration of a single engine command and
//! coordinates:
//!
//! - **Identity**: one live object per `(entity type, id)`, handed out as an
//!   [`EntityRef`].
//! - **Change tracking**: inserts and deletes are staged explicitly; updates are
//!   detected by comparing live state against the snapshot taken on load.
//! - **Flush**: staged work is turned into statements in a fixed order, with
//!   insert/delete cancellation, batching and revision-checked writes.
//!
//! # Example
//!
//! ```ignore
//! let mut session = Session::new(executor, SessionContext::new(config));
//!
//! // Staged for insert; gets an id immediately.
//! let task = session.insert(Task::new("review"))?;
//!
//! // Loaded rows go through the identity cache.
//! let same = session.select_by_id::<Task>(task.read()?.id().unwrap())?;
//!
//! // Send everything to the store and commit.
//! session.commit()?;
//! session.close()?;
//! ```
//!
//! A session is used from one thread at a time. Nothing is shared between
//! sessions except the immutable [`PersistenceConfig`] and the collaborators in
//! [`SessionContext`].

pub mod cache;
pub mod change_tracker;
pub mod flush;
pub mod query;
pub mod staging;

#[cfg(test)]
mod testing;

pub use cache::{CacheEntry, EntityCache, EntityRef, TrackedEntity};
pub use change_tracker::ObjectSnapshot;
pub use flush::{FlushOrderer, FlushPlan, FlushResult, REVISION_KEY, REVISION_NEXT_KEY};
pub use query::{Direction, EntityQuery, is_valid_order_column};
pub use staging::{DeleteOperation, PendingCounts, StagedEntity, StagedWork, UnitOfWork};

use flowstore_core::{
    Entity, EntityType, EventDispatcher, IdGenerator, NoopDispatcher, Parameter,
    PersistenceConfig, Result, Row, StatementExecutor, StatementKind, UuidIdGenerator,
};
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::{Arc, RwLock};

/// Collaborators shared by every session of an engine.
#[derive(Clone)]
pub struct SessionContext {
    config: Arc<PersistenceConfig>,
    id_generator: Arc<dyn IdGenerator>,
    dispatcher: Arc<dyn EventDispatcher>,
}

impl SessionContext {
    /// Context with random UUID ids and no event dispatch.
    pub fn new(config: Arc<PersistenceConfig>) -> Self {
        Self {
            config,
            id_generator: Arc::new(UuidIdGenerator),
            dispatcher: Arc::new(NoopDispatcher),
        }
    }

    pub fn with_id_generator(mut self, id_generator: Arc<dyn IdGenerator>) -> Self {
        self.id_generator = id_generator;
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn EventDispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn config(&self) -> &Arc<PersistenceConfig> {
        &self.config
    }

    pub fn id_generator(&self) -> &dyn IdGenerator {
        self.id_generator.as_ref()
    }

    pub fn dispatcher(&self) -> &dyn EventDispatcher {
        self.dispatcher.as_ref()
    }
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("dialect", &self.config.dialect())
            .field("max_batch_size", &self.config.max_batch_size())
            .field("dispatcher_enabled", &self.dispatcher.is_enabled())
            .finish_non_exhaustive()
    }
}

/// A unit of work over one statement executor.
///
/// The executor is released exactly once: by [`close`](Self::close), or when
/// the session is dropped without being closed.
pub struct Session<X: StatementExecutor> {
    executor: X,
    context: SessionContext,
    cache: EntityCache,
    unit_of_work: UnitOfWork,
    closed: bool,
}

impl<X: StatementExecutor> Session<X> {
    /// Open a session owning `executor`.
    pub fn new(executor: X, context: SessionContext) -> Self {
        tracing::debug!("Opening session");
        Self {
            executor,
            context,
            cache: EntityCache::new(),
            unit_of_work: UnitOfWork::new(),
            closed: false,
        }
    }

    pub fn executor(&self) -> &X {
        &self.executor
    }

    pub fn executor_mut(&mut self) -> &mut X {
        &mut self.executor
    }

    pub fn config(&self) -> &PersistenceConfig {
        &self.context.config
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    /// Read access to the identity cache.
    pub fn cache(&self) -> &EntityCache {
        &self.cache
    }

    // ========================================================================
    // Staging
    // ========================================================================

    /// Stage `entity` for insert.
    ///
    /// An id is assigned from the id generator when the entity has none. The
    /// entity is cached immediately, without a snapshot, so lookups by id within
    /// this session find it before the flush.
    #[tracing::instrument(level = "debug", skip(self, entity), fields(entity_type = %E::ENTITY_TYPE))]
    pub fn insert<E: Entity>(&mut self, mut entity: E) -> Result<EntityRef<E>> {
        if entity.id().is_none() {
            let id = self.context.id_generator.next_id();
            tracing::trace!(id = %id, "Assigned id");
            entity.set_id(id);
        }
        let entity = Arc::new(RwLock::new(entity));
        let staged = StagedEntity::new(entity.clone())?;
        self.cache.put(&entity, false)?;
        self.unit_of_work.register_insert(staged);
        Ok(entity)
    }

    /// Stage a revision-checked delete of one entity.
    ///
    /// Returns `false` when an identical delete was already pending.
    pub fn delete<E: Entity>(&mut self, entity: &EntityRef<E>) -> Result<bool> {
        let staged = StagedEntity::new(entity.clone())?;
        Ok(self
            .unit_of_work
            .register_delete(DeleteOperation::Checked(staged)))
    }

    /// Stage deletes for several entities of one type.
    ///
    /// Uses the type's batch delete statement when one is configured, otherwise
    /// stages one checked delete per entity. Returns the number of delete
    /// operations actually staged.
    pub fn delete_all<E: Entity>(&mut self, entities: &[EntityRef<E>]) -> Result<usize> {
        if entities.is_empty() {
            return Ok(0);
        }
        let members = entities
            .iter()
            .map(|entity| StagedEntity::new(entity.clone()))
            .collect::<Result<Vec<_>>>()?;

        let batch_statement = self
            .context
            .config
            .bulk_delete_statement(E::ENTITY_TYPE)
            .map(str::to_string);
        match batch_statement {
            Some(statement) => {
                let staged = self.unit_of_work.register_delete(DeleteOperation::BatchChecked {
                    entity_type: E::ENTITY_TYPE,
                    statement,
                    members,
                });
                Ok(usize::from(staged))
            }
            None => {
                let mut staged = 0;
                for member in members {
                    if self
                        .unit_of_work
                        .register_delete(DeleteOperation::Checked(member))
                    {
                        staged += 1;
                    }
                }
                Ok(staged)
            }
        }
    }

    /// Stage an opaque delete statement. Its row count is never checked.
    pub fn delete_raw(&mut self, statement: impl Into<String>, parameter: Parameter) -> bool {
        self.unit_of_work.register_delete(DeleteOperation::Raw {
            statement: statement.into(),
            parameter,
        })
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Cached instance of `(E, id)` without touching the store.
    pub fn get_cached<E: Entity>(&self, id: &str) -> Option<EntityRef<E>> {
        self.cache.get::<E>(id)
    }

    /// Load one entity by id, answering from the cache when possible.
    #[tracing::instrument(level = "debug", skip(self), fields(entity_type = %E::ENTITY_TYPE))]
    pub fn select_by_id<E: Entity>(&mut self, id: &str) -> Result<Option<EntityRef<E>>> {
        if let Some(cached) = self.cache.get::<E>(id) {
            tracing::trace!("Cache hit");
            return Ok(Some(cached));
        }
        let statement = self
            .context
            .config
            .statement(StatementKind::SelectById, E::ENTITY_TYPE)?;
        let parameter = serde_json::json!({ "id": id });
        match self.executor.select_one(statement, &parameter)? {
            Some(row) => self.cache_row::<E>(row).map(Some),
            None => Ok(None),
        }
    }

    /// Run a list statement and identity-map every returned row.
    pub fn select_list<E: Entity>(
        &mut self,
        statement: &str,
        parameter: &Parameter,
    ) -> Result<Vec<EntityRef<E>>> {
        let statement = self.context.config.map_statement(statement);
        let rows = self.executor.select_list(statement, parameter)?;
        tracing::debug!(statement, rows = rows.len(), "Selected entity list");
        rows.into_iter().map(|row| self.cache_row::<E>(row)).collect()
    }

    /// Run a statement returning at most one entity row.
    pub fn select_one<E: Entity>(
        &mut self,
        statement: &str,
        parameter: &Parameter,
    ) -> Result<Option<EntityRef<E>>> {
        let statement = self.context.config.map_statement(statement);
        match self.executor.select_one(statement, parameter)? {
            Some(row) => self.cache_row::<E>(row).map(Some),
            None => Ok(None),
        }
    }

    /// Run a statement returning a plain value (a count, a name, ...).
    ///
    /// A row with a single column yields that column's value; any other row is
    /// deserialized as a whole. Nothing is cached.
    pub fn select_value<T: DeserializeOwned>(
        &mut self,
        statement: &str,
        parameter: &Parameter,
    ) -> Result<Option<T>> {
        let statement = self.context.config.map_statement(statement);
        let Some(row) = self.executor.select_one(statement, parameter)? else {
            return Ok(None);
        };
        let value = match row {
            Row::Object(columns) if columns.len() == 1 => columns
                .into_iter()
                .next()
                .map(|(_, value)| value)
                .unwrap_or_default(),
            other => other,
        };
        Ok(Some(serde_json::from_value(value)?))
    }

    fn cache_row<E: Entity>(&mut self, row: Row) -> Result<EntityRef<E>> {
        let loaded: E = serde_json::from_value(row)?;
        self.cache.filter(loaded)
    }

    /// Start a query object over a list statement.
    pub fn create_query<E: Entity>(&mut self, statement: impl Into<String>) -> EntityQuery<'_, E, X> {
        EntityQuery::new(self, statement)
    }

    /// Run an update statement immediately, bypassing staging.
    ///
    /// Meant for set-based state changes. Cached entities are not refreshed.
    pub fn execute_update(&mut self, statement: &str, parameter: &Parameter) -> Result<u64> {
        let statement = self.context.config.map_statement(statement);
        let affected = self.executor.update(statement, parameter)?;
        tracing::debug!(statement, affected, "Executed bulk update");
        Ok(affected)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Send all staged and detected changes to the store.
    ///
    /// Staging is drained even when the flush fails; the caller is expected to
    /// roll back.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn flush(&mut self) -> Result<FlushResult> {
        let work = self.unit_of_work.take();
        let config = &self.context.config;
        let plan = FlushPlan::prepare(work, &mut self.cache, config)?;
        plan.execute(
            &mut self.executor,
            &mut self.cache,
            config,
            self.context.dispatcher.as_ref(),
        )
    }

    /// Flush, then commit the executor's transaction.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn commit(&mut self) -> Result<FlushResult> {
        let result = self.flush()?;
        self.executor.commit()?;
        tracing::debug!("Session committed");
        Ok(result)
    }

    /// Discard staged work and cached state, then roll the executor back.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn rollback(&mut self) -> Result<()> {
        let dropped = self.unit_of_work.insert_count() + self.unit_of_work.delete_count();
        self.unit_of_work.clear();
        self.cache.clear();
        tracing::debug!(dropped, "Session state discarded");
        self.executor.rollback()
    }

    /// Release the executor.
    pub fn close(mut self) -> Result<()> {
        self.closed = true;
        tracing::debug!("Closing session");
        self.executor.close()
    }

    // ========================================================================
    // Diagnostics
    // ========================================================================

    /// Counts of staged and detected changes.
    ///
    /// An entity whose state cannot be serialized counts as dirty.
    pub fn pending_counts(&self) -> PendingCounts {
        let dirty = self
            .cache
            .iter()
            .filter(|entry| {
                entry.snapshot().is_some_and(|snapshot| {
                    entry
                        .entity()
                        .persistent_state()
                        .map_or(true, |state| snapshot.is_dirty(&state))
                })
            })
            .count();
        PendingCounts {
            new: self.unit_of_work.insert_count(),
            dirty,
            deleted: self.unit_of_work.delete_count(),
        }
    }

    /// Dump session state for debugging.
    pub fn debug_state(&self) -> SessionDebugInfo {
        let pending = self.pending_counts();
        SessionDebugInfo {
            tracked: self.cache.len(),
            tracked_by_type: self.cache.counts_by_type(),
            pending_new: pending.new,
            pending_delete: pending.deleted,
            pending_dirty: pending.dirty,
        }
    }
}

impl<X: StatementExecutor> Drop for Session<X> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        tracing::debug!("Releasing executor of unclosed session");
        if let Err(e) = self.executor.close() {
            tracing::warn!(error = %e, "Failed to release executor");
        }
    }
}

impl<X: StatementExecutor> fmt::Debug for Session<X> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("context", &self.context)
            .field("cache", &self.cache)
            .field("unit_of_work", &self.unit_of_work)
            .finish_non_exhaustive()
    }
}

/// Debug information about session state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDebugInfo {
    /// Total cached entities.
    pub tracked: usize,
    /// Cached entities per type.
    pub tracked_by_type: Vec<(EntityType, usize)>,
    /// Entities pending INSERT.
    pub pending_new: usize,
    /// Delete operations pending.
    pub pending_delete: usize,
    /// Cached entities pending UPDATE.
    pub pending_dirty: usize,
}
