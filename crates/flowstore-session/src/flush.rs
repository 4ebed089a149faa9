//! Flush planning and execution.
//!
//! A flush turns staged work into statement executions in a fixed order:
//!
//! 1. cancel inserts against deletes of the same row,
//! 2. drop cache entries of entities about to be inserted,
//! 3. compute the dirty set from the remaining cache entries,
//! 4. inserts, ordered by the configured dependency order and batched,
//! 5. revision-checked updates, one at a time,
//! 6. deletes, in registration order,
//! 7. deletion notifications for variable-like entities.
//!
//! Steps 1-3 build a [`FlushPlan`]; steps 4-7 run in [`FlushPlan::execute`].
//! The first failing statement aborts the flush. Nothing already executed is
//! undone here: the caller rolls back the surrounding transaction.

use crate::cache::{CacheEntry, EntityCache, TrackedEntity};
use crate::staging::{DeleteOperation, StagedEntity, StagedWork};
use flowstore_core::{
    EntityEvent, EntityType, EventDispatcher, LockTarget, LockedOperation,
    OptimisticLockingError, Parameter, PersistenceConfig, Result, StatementError,
    StatementExecutor, StatementKind,
};
use indexmap::IndexMap;
use std::time::Instant;

/// Parameter key carrying the revision the row is expected to have.
pub const REVISION_KEY: &str = "revision";
/// Parameter key carrying the revision the row will have after the write.
pub const REVISION_NEXT_KEY: &str = "revisionNext";

/// Orders pending inserts by the configured dependency table.
#[derive(Debug, Clone, Copy)]
pub struct FlushOrderer<'a> {
    insert_order: &'a [EntityType],
}

impl<'a> FlushOrderer<'a> {
    pub fn new(insert_order: &'a [EntityType]) -> Self {
        Self { insert_order }
    }

    /// Types listed in the dependency table first, in table order; every other
    /// type afterwards, in the order it was first staged.
    pub fn order(
        &self,
        mut inserts: IndexMap<EntityType, Vec<StagedEntity>>,
    ) -> Vec<(EntityType, Vec<StagedEntity>)> {
        let mut ordered = Vec::with_capacity(inserts.len());
        for entity_type in self.insert_order {
            if let Some(staged) = inserts.shift_remove(entity_type) {
                ordered.push((*entity_type, staged));
            }
        }
        ordered.extend(inserts);
        ordered.retain(|(_, staged)| !staged.is_empty());
        ordered
    }
}

/// Summary of an executed flush.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushResult {
    /// Number of entities inserted.
    pub inserted: usize,
    /// Number of entities updated.
    pub updated: usize,
    /// Number of rows reported deleted by the store.
    pub deleted: u64,
    /// Number of insert/delete pairs cancelled before reaching the store.
    pub cancelled: usize,
    /// Number of statements executed.
    pub statements: usize,
}

impl FlushResult {
    /// Create a new empty result.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the flush sent nothing to the store.
    pub fn is_noop(&self) -> bool {
        self.statements == 0
    }
}

/// Work a flush will perform, after cancellation and dirty checking.
#[derive(Debug, Default)]
pub struct FlushPlan {
    /// Insert groups in execution order.
    pub inserts: Vec<(EntityType, Vec<StagedEntity>)>,
    /// Dirty entities, in cache order.
    pub updates: Vec<StagedEntity>,
    /// Deletes, in registration order.
    pub deletes: Vec<DeleteOperation>,
    /// Entities whose insert and delete cancelled each other.
    pub cancelled: Vec<StagedEntity>,
}

impl FlushPlan {
    /// Run the planning steps (cancel, uncache inserts, dirty check).
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn prepare(
        work: StagedWork,
        cache: &mut EntityCache,
        config: &PersistenceConfig,
    ) -> Result<Self> {
        let StagedWork {
            mut inserts,
            deletes,
        } = work;

        let mut cancelled = Vec::new();
        let mut remaining_deletes = Vec::with_capacity(deletes.len());
        for operation in deletes {
            match operation {
                DeleteOperation::Checked(target) => {
                    cache.remove(target.entity_type(), target.id());
                    if cancel_insert(&mut inserts, &target) {
                        cancelled.push(target);
                    } else {
                        remaining_deletes.push(DeleteOperation::Checked(target));
                    }
                }
                DeleteOperation::BatchChecked {
                    entity_type,
                    statement,
                    members,
                } => {
                    let mut kept = Vec::with_capacity(members.len());
                    for member in members {
                        cache.remove(member.entity_type(), member.id());
                        if cancel_insert(&mut inserts, &member) {
                            cancelled.push(member);
                        } else {
                            kept.push(member);
                        }
                    }
                    remaining_deletes.push(DeleteOperation::BatchChecked {
                        entity_type,
                        statement,
                        members: kept,
                    });
                }
                raw @ DeleteOperation::Raw { .. } => remaining_deletes.push(raw),
            }
        }

        for staged in inserts.values().flatten() {
            cache.remove(staged.entity_type(), staged.id());
        }

        let mut updates = Vec::new();
        for entry in cache.iter() {
            let Some(snapshot) = entry.snapshot() else {
                continue;
            };
            if snapshot.is_dirty(&entry.entity().persistent_state()?) {
                updates.push(StagedEntity::new(entry.entity().clone())?);
            }
        }

        let plan = FlushPlan {
            inserts: FlushOrderer::new(config.insert_order()).order(inserts),
            updates,
            deletes: remaining_deletes,
            cancelled,
        };
        tracing::debug!(
            inserts = plan.insert_count(),
            updates = plan.updates.len(),
            deletes = plan.deletes.len(),
            cancelled = plan.cancelled.len(),
            "Flush plan prepared"
        );
        Ok(plan)
    }

    /// Number of entities to insert.
    pub fn insert_count(&self) -> usize {
        self.inserts.iter().map(|(_, staged)| staged.len()).sum()
    }

    /// Check if the plan has any operations.
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty()
            && self.updates.is_empty()
            && self.deletes.is_empty()
            && self.cancelled.is_empty()
    }

    /// Execute the plan against the store.
    #[tracing::instrument(level = "info", skip_all)]
    pub fn execute<X: StatementExecutor + ?Sized>(
        self,
        executor: &mut X,
        cache: &mut EntityCache,
        config: &PersistenceConfig,
        dispatcher: &dyn EventDispatcher,
    ) -> Result<FlushResult> {
        let start = Instant::now();
        let mut result = FlushResult {
            cancelled: self.cancelled.len(),
            ..FlushResult::default()
        };
        let mut events = dispatcher.is_enabled().then(Vec::new);

        if let Some(events) = events.as_mut() {
            for staged in &self.cancelled {
                record_deletion(events, config, staged)?;
            }
        }

        for (entity_type, staged) in &self.inserts {
            flush_inserts(executor, cache, config, *entity_type, staged, &mut result)?;
        }

        for staged in &self.updates {
            flush_update(executor, cache, config, staged, &mut result)?;
        }

        for operation in &self.deletes {
            flush_delete(executor, config, operation, events.as_mut(), &mut result)?;
        }

        if let Some(events) = events {
            tracing::debug!(count = events.len(), "Dispatching deletion events");
            for event in events {
                dispatcher.dispatch(event);
            }
        }

        tracing::info!(
            elapsed_ms = start.elapsed().as_millis(),
            inserted = result.inserted,
            updated = result.updated,
            deleted = result.deleted,
            cancelled = result.cancelled,
            statements = result.statements,
            "Flush complete"
        );
        Ok(result)
    }
}

/// Remove `target` from the pending inserts. Returns whether it was pending.
fn cancel_insert(
    inserts: &mut IndexMap<EntityType, Vec<StagedEntity>>,
    target: &StagedEntity,
) -> bool {
    let Some(staged) = inserts.get_mut(&target.entity_type()) else {
        return false;
    };
    let Some(position) = staged.iter().position(|s| s.id() == target.id()) else {
        return false;
    };
    staged.remove(position);
    tracing::debug!(
        entity_type = %target.entity_type(),
        id = %target.id(),
        "Insert cancelled by delete"
    );
    true
}

fn record_deletion(
    events: &mut Vec<EntityEvent>,
    config: &PersistenceConfig,
    staged: &StagedEntity,
) -> Result<()> {
    if config.is_variable_like(staged.entity_type()) {
        events.push(EntityEvent::VariableDeleted {
            entity_type: staged.entity_type(),
            id: staged.id().to_string(),
            state: staged.entity().persistent_state()?,
        });
    }
    Ok(())
}

/// Entity parameter with the current and next revision filled in.
///
/// Inserts write `revisionNext`; updates and deletes match on `revision`.
fn revisioned_parameter(entity: &dyn TrackedEntity) -> Result<Parameter> {
    let mut parameter = entity.parameter()?;
    if let (Some(object), Some(revision), Some(next)) = (
        parameter.as_object_mut(),
        entity.revision(),
        entity.revision_next(),
    ) {
        object.insert(REVISION_KEY.to_string(), revision.into());
        object.insert(REVISION_NEXT_KEY.to_string(), next.into());
    }
    Ok(parameter)
}

#[tracing::instrument(level = "debug", skip(executor, cache, config, staged, result))]
fn flush_inserts<X: StatementExecutor + ?Sized>(
    executor: &mut X,
    cache: &mut EntityCache,
    config: &PersistenceConfig,
    entity_type: EntityType,
    staged: &[StagedEntity],
    result: &mut FlushResult,
) -> Result<()> {
    let bulk = staged.len() > 1 && config.is_bulk_insertable(entity_type);
    if bulk {
        let statement = config.statement(StatementKind::BulkInsert, entity_type)?;
        for chunk in staged.chunks(config.max_batch_size()) {
            let parameters = chunk
                .iter()
                .map(|s| revisioned_parameter(s.entity().as_ref()))
                .collect::<Result<Vec<_>>>()?;
            tracing::debug!(statement, count = chunk.len(), "Executing bulk insert");
            let written = executor.insert(statement, &Parameter::Array(parameters))?;
            result.statements += 1;
            confirm_insert(statement, chunk.len(), written)?;
            for s in chunk {
                finish_insert(cache, s)?;
            }
            result.inserted += chunk.len();
        }
    } else {
        let statement = config.statement(StatementKind::Insert, entity_type)?;
        for s in staged {
            tracing::trace!(statement, id = %s.id(), "Executing insert");
            let written = executor.insert(statement, &revisioned_parameter(s.entity().as_ref())?)?;
            result.statements += 1;
            confirm_insert(statement, 1, written)?;
            finish_insert(cache, s)?;
            result.inserted += 1;
        }
    }
    Ok(())
}

/// An insert has no revision to conflict on, but its rows must all be
/// written before any entity of the chunk is treated as persisted.
fn confirm_insert(statement: &str, expected: usize, written: u64) -> Result<()> {
    if written < expected as u64 {
        return Err(StatementError::new(
            statement,
            format!("insert wrote {written} of {expected} rows"),
        )
        .into());
    }
    Ok(())
}

/// Advance the revision of an inserted entity and re-cache it as persisted.
fn finish_insert(cache: &mut EntityCache, staged: &StagedEntity) -> Result<()> {
    staged.entity().advance_revision();
    cache.put_erased(staged.entity().clone(), true)
}

fn flush_update<X: StatementExecutor + ?Sized>(
    executor: &mut X,
    cache: &mut EntityCache,
    config: &PersistenceConfig,
    staged: &StagedEntity,
    result: &mut FlushResult,
) -> Result<()> {
    let entity_type = staged.entity_type();
    let statement = config.statement(StatementKind::Update, entity_type)?;
    let parameter = revisioned_parameter(staged.entity().as_ref())?;
    let state = staged.entity().persistent_state()?;
    let snapshot = cache
        .entry(entity_type, staged.id())
        .and_then(CacheEntry::snapshot);
    tracing::debug!(
        statement,
        entity_type = %entity_type,
        id = %staged.id(),
        revision = ?staged.entity().revision(),
        changed = ?snapshot.map(|s| s.changed_fields(&state)),
        snapshot_age_ms = ?snapshot.map(|s| s.taken_at().elapsed().as_millis()),
        "Executing update"
    );
    let affected = executor.update(statement, &parameter)?;
    result.statements += 1;
    if affected != 1 {
        return Err(OptimisticLockingError {
            operation: LockedOperation::Update,
            target: LockTarget::Entity {
                entity_type,
                id: staged.id().to_string(),
            },
            statement: statement.to_string(),
            expected_rows: 1,
            affected_rows: affected,
        }
        .into());
    }
    staged.entity().advance_revision();
    cache.refresh_snapshot(entity_type, staged.id())?;
    result.updated += 1;
    Ok(())
}

fn flush_delete<X: StatementExecutor + ?Sized>(
    executor: &mut X,
    config: &PersistenceConfig,
    operation: &DeleteOperation,
    mut events: Option<&mut Vec<EntityEvent>>,
    result: &mut FlushResult,
) -> Result<()> {
    match operation {
        DeleteOperation::Checked(target) => {
            let entity_type = target.entity_type();
            let statement = config.statement(StatementKind::Delete, entity_type)?;
            let entity = target.entity();
            let parameter = revisioned_parameter(entity.as_ref())?;
            tracing::debug!(statement, id = %target.id(), "Executing delete");
            let affected = executor.delete(statement, &parameter)?;
            result.statements += 1;
            if entity.revision().is_some() && affected != 1 {
                return Err(OptimisticLockingError {
                    operation: LockedOperation::Delete,
                    target: LockTarget::Entity {
                        entity_type,
                        id: target.id().to_string(),
                    },
                    statement: statement.to_string(),
                    expected_rows: 1,
                    affected_rows: affected,
                }
                .into());
            }
            result.deleted += affected;
            if let Some(events) = events.as_deref_mut() {
                record_deletion(events, config, target)?;
            }
        }
        DeleteOperation::BatchChecked {
            entity_type,
            statement,
            members,
        } => {
            if members.is_empty() {
                tracing::trace!(statement = %statement, "Skipping empty batch delete");
                return Ok(());
            }
            let statement = config.map_statement(statement);
            for chunk in members.chunks(config.max_batch_size()) {
                let parameters = chunk
                    .iter()
                    .map(|m| revisioned_parameter(m.entity().as_ref()))
                    .collect::<Result<Vec<_>>>()?;
                tracing::debug!(statement, count = chunk.len(), "Executing batch delete");
                let affected = executor.delete(statement, &Parameter::Array(parameters))?;
                result.statements += 1;
                let revisioned = chunk.iter().any(|m| m.entity().revision().is_some());
                let expected = chunk.len() as u64;
                if revisioned && affected < expected {
                    return Err(OptimisticLockingError {
                        operation: LockedOperation::BatchDelete,
                        target: LockTarget::Batch {
                            entity_type: *entity_type,
                            size: chunk.len(),
                        },
                        statement: statement.to_string(),
                        expected_rows: expected,
                        affected_rows: affected,
                    }
                    .into());
                }
                result.deleted += affected;
                if let Some(events) = events.as_deref_mut() {
                    for member in chunk {
                        record_deletion(events, config, member)?;
                    }
                }
            }
        }
        DeleteOperation::Raw {
            statement,
            parameter,
        } => {
            let statement = config.map_statement(statement);
            tracing::debug!(statement, "Executing raw delete");
            result.deleted += executor.delete(statement, parameter)?;
            result.statements += 1;
        }
    }
    Ok(())
}
