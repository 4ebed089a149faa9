//! Shared fixtures for the integration tests: a few engine entities, an
//! in-memory store that honours revision checks, and an event collector.

#![allow(dead_code)]

use flowstore::prelude::*;
use flowstore::{EntityEvent, PersistentState, SessionFactory as Factory};
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

pub const EXECUTION: EntityType = EntityType::new("execution");
pub const TASK: EntityType = EntityType::new("task");
pub const VARIABLE: EntityType = EntityType::new("variable");
pub const ACTIVITY: EntityType = EntityType::new("activity");

pub const DELETE_VARIABLES: &str = "delete-variables-for-execution";
pub const DELETE_ACTIVITIES: &str = "delete-activities-for-execution";
pub const TASKS_BY_EXECUTION: &str = "select-tasks-by-execution";

macro_rules! revisioned_entity {
    ($ty:ty, $tag:expr) => {
        impl Entity for $ty {
            const ENTITY_TYPE: EntityType = $tag;

            fn id(&self) -> Option<&str> {
                self.id.as_deref()
            }

            fn set_id(&mut self, id: String) {
                self.id = Some(id);
            }

            fn as_revisioned(&self) -> Option<&dyn Revisioned> {
                Some(self)
            }

            fn as_revisioned_mut(&mut self) -> Option<&mut dyn Revisioned> {
                Some(self)
            }
        }

        impl Revisioned for $ty {
            fn revision(&self) -> i32 {
                self.revision
            }

            fn set_revision(&mut self, revision: i32) {
                self.revision = revision;
            }
        }
    };
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    pub id: Option<String>,
    pub process_definition: String,
    pub active: bool,
    pub revision: i32,
}

impl Execution {
    pub fn new(process_definition: &str) -> Self {
        Self {
            id: None,
            process_definition: process_definition.to_string(),
            active: true,
            revision: 0,
        }
    }
}

revisioned_entity!(Execution, EXECUTION);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: Option<String>,
    pub execution_id: Option<String>,
    pub name: String,
    pub assignee: Option<String>,
    pub revision: i32,
}

impl Task {
    pub fn new(execution_id: &str, name: &str) -> Self {
        Self {
            id: None,
            execution_id: Some(execution_id.to_string()),
            name: name.to_string(),
            assignee: None,
            revision: 0,
        }
    }
}

revisioned_entity!(Task, TASK);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
    pub id: Option<String>,
    pub execution_id: String,
    pub name: String,
    pub value: Value,
    pub revision: i32,
}

impl Variable {
    pub fn new(execution_id: &str, name: &str, value: Value) -> Self {
        Self {
            id: None,
            execution_id: execution_id.to_string(),
            name: name.to_string(),
            value,
            revision: 0,
        }
    }
}

revisioned_entity!(Variable, VARIABLE);

/// Append-only history record: no revision, never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub id: Option<String>,
    pub execution_id: String,
    pub activity_id: String,
}

impl Entity for Activity {
    const ENTITY_TYPE: EntityType = ACTIVITY;

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn set_id(&mut self, id: String) {
        self.id = Some(id);
    }
}

/// Executions before tasks before variables; activities unlisted.
pub fn config(max_batch_size: usize) -> PersistenceConfig {
    PersistenceConfig::builder()
        .max_batch_size(max_batch_size)
        .insert_order([EXECUTION, TASK, VARIABLE])
        .entity(EntityTypeConfig::new(EXECUTION))
        .entity(EntityTypeConfig::new(TASK))
        .entity(
            EntityTypeConfig::new(VARIABLE)
                .variable_like()
                .bulk_delete(DELETE_VARIABLES),
        )
        .entity(EntityTypeConfig::new(ACTIVITY).immutable())
        .build()
        .expect("valid config")
}

/// Collects every dispatched event.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Mutex<Vec<EntityEvent>>,
}

impl EventLog {
    pub fn events(&self) -> Vec<EntityEvent> {
        self.events.lock().expect("lock poisoned").clone()
    }

    pub fn deleted_ids(&self) -> Vec<String> {
        self.events().iter().map(|e| e.id().to_string()).collect()
    }
}

impl EventDispatcher for EventLog {
    fn is_enabled(&self) -> bool {
        true
    }

    fn dispatch(&self, event: EntityEvent) {
        self.events.lock().expect("lock poisoned").push(event);
    }
}

pub fn factory(max_batch_size: usize, events: Arc<EventLog>) -> Factory {
    Factory::builder(config(max_batch_size))
        .with_dispatcher(events)
        .build()
}

/// One executed write: statement name, number of rows and the parameter sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub statement: String,
    pub rows: usize,
    pub parameter: Value,
}

#[derive(Debug, Default)]
struct StoreState {
    tables: BTreeMap<String, BTreeMap<String, Value>>,
    writes: Vec<Call>,
    selects: usize,
    commits: usize,
    rollbacks: usize,
    closes: usize,
}

/// A shared in-memory store. Every [`StoreExecutor`] opened on it sees the
/// same rows, the way two sessions see the same database.
///
/// Statements follow the naming convention of [`EntityTypeConfig::new`]; the
/// store interprets `revision`/`revisionNext` like the real mapped statements.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().expect("lock poisoned")
    }

    pub fn executor(&self) -> StoreExecutor {
        StoreExecutor {
            store: self.clone(),
        }
    }

    pub fn row(&self, table: EntityType, id: &str) -> Option<Value> {
        self.state().tables.get(table.name())?.get(id).cloned()
    }

    pub fn row_count(&self, table: EntityType) -> usize {
        self.state().tables.get(table.name()).map_or(0, BTreeMap::len)
    }

    /// Seed a row directly, bypassing any session.
    pub fn seed(&self, table: EntityType, row: Value) {
        let id = row["id"].as_str().expect("seeded row has an id").to_string();
        self.state()
            .tables
            .entry(table.name().to_string())
            .or_default()
            .insert(id, row);
    }

    pub fn writes(&self) -> Vec<Call> {
        self.state().writes.clone()
    }

    pub fn write_statements(&self) -> Vec<String> {
        self.writes().into_iter().map(|c| c.statement).collect()
    }

    pub fn clear_log(&self) {
        let mut state = self.state();
        state.writes.clear();
        state.selects = 0;
    }

    pub fn selects(&self) -> usize {
        self.state().selects
    }

    pub fn commits(&self) -> usize {
        self.state().commits
    }

    pub fn closes(&self) -> usize {
        self.state().closes
    }
}

/// Executor handle over an [`InMemoryStore`].
#[derive(Debug)]
pub struct StoreExecutor {
    store: InMemoryStore,
}

fn rows_in(parameter: &Parameter) -> usize {
    parameter.as_array().map_or(1, Vec::len)
}

fn each(parameter: &Parameter) -> Vec<&Map<String, Value>> {
    match parameter {
        Value::Array(items) => items.iter().filter_map(Value::as_object).collect(),
        Value::Object(object) => vec![object],
        _ => Vec::new(),
    }
}

fn stored(object: &Map<String, Value>) -> Value {
    let mut row = object.clone();
    if let Some(next) = row.remove("revisionNext") {
        row.insert("revision".to_string(), next);
    }
    Value::Object(row)
}

fn id_of(object: &Map<String, Value>) -> String {
    object["id"].as_str().unwrap_or_default().to_string()
}

/// Remove the row matching `object` by id, and by revision when it has one.
fn remove_checked(table: &mut BTreeMap<String, Value>, object: &Map<String, Value>) -> u64 {
    let id = id_of(object);
    let matches = table.get(&id).is_some_and(|row| {
        object
            .get("revision")
            .is_none_or(|expected| row.get("revision") == Some(expected))
    });
    if matches {
        table.remove(&id);
        1
    } else {
        0
    }
}

impl StatementExecutor for StoreExecutor {
    fn select_list(&mut self, statement: &str, parameter: &Parameter) -> Result<Vec<Row>> {
        let mut state = self.store.state();
        state.selects += 1;
        if statement == TASKS_BY_EXECUTION {
            let execution = &parameter["executionId"];
            return Ok(state
                .tables
                .get(TASK.name())
                .map(|rows| {
                    rows.values()
                        .filter(|row| &row["executionId"] == execution)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default());
        }
        if let Some(table) = statement
            .strip_prefix("select-")
            .and_then(|rest| rest.strip_suffix("-by-id"))
        {
            let id = parameter["id"].as_str().unwrap_or_default();
            return Ok(state
                .tables
                .get(table)
                .and_then(|rows| rows.get(id))
                .cloned()
                .into_iter()
                .collect());
        }
        if let Some(table) = statement.strip_suffix("-count").and_then(|s| s.strip_prefix("select-")) {
            let count = state.tables.get(table).map_or(0, BTreeMap::len);
            return Ok(vec![json!({ "count": count })]);
        }
        Err(Error::Custom(format!("unknown select '{statement}'")))
    }

    fn insert(&mut self, statement: &str, parameter: &Parameter) -> Result<u64> {
        let table = statement
            .strip_prefix("bulk-insert-")
            .or_else(|| statement.strip_prefix("insert-"))
            .ok_or_else(|| Error::Custom(format!("unknown insert '{statement}'")))?
            .to_string();
        let mut state = self.store.state();
        state.writes.push(Call {
            statement: statement.to_string(),
            rows: rows_in(parameter),
            parameter: parameter.clone(),
        });
        let rows = state.tables.entry(table).or_default();
        let mut inserted = 0;
        for object in each(parameter) {
            rows.insert(id_of(object), stored(object));
            inserted += 1;
        }
        Ok(inserted)
    }

    fn update(&mut self, statement: &str, parameter: &Parameter) -> Result<u64> {
        let table = statement
            .strip_prefix("update-")
            .ok_or_else(|| Error::Custom(format!("unknown update '{statement}'")))?
            .to_string();
        let mut state = self.store.state();
        state.writes.push(Call {
            statement: statement.to_string(),
            rows: 1,
            parameter: parameter.clone(),
        });
        let Some(object) = parameter.as_object() else {
            return Ok(0);
        };
        let rows = state.tables.entry(table).or_default();
        let id = id_of(object);
        match rows.get(&id) {
            Some(row) if row.get("revision") == object.get("revision") => {
                rows.insert(id, stored(object));
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    fn delete(&mut self, statement: &str, parameter: &Parameter) -> Result<u64> {
        let mut state = self.store.state();
        state.writes.push(Call {
            statement: statement.to_string(),
            rows: rows_in(parameter),
            parameter: parameter.clone(),
        });
        if statement == DELETE_ACTIVITIES {
            let execution = parameter["executionId"].clone();
            let rows = state.tables.entry(ACTIVITY.name().to_string()).or_default();
            let before = rows.len();
            rows.retain(|_, row| row["executionId"] != execution);
            return Ok((before - rows.len()) as u64);
        }
        let table = if statement == DELETE_VARIABLES {
            VARIABLE.name()
        } else {
            statement
                .strip_prefix("delete-")
                .ok_or_else(|| Error::Custom(format!("unknown delete '{statement}'")))?
        };
        let rows = state.tables.entry(table.to_string()).or_default();
        Ok(each(parameter)
            .into_iter()
            .map(|object| remove_checked(rows, object))
            .sum())
    }

    fn commit(&mut self) -> Result<()> {
        self.store.state().commits += 1;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.store.state().rollbacks += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.store.state().closes += 1;
        Ok(())
    }
}

/// Live state of an entity handle as a JSON value.
pub fn state_of<E: Entity>(entity: &EntityRef<E>) -> PersistentState {
    entity.read().expect("lock poisoned").persistent_state().expect("serializable")
}

pub type Events = Arc<EventLog>;

pub fn events() -> Events {
    Arc::new(EventLog::default())
}

/// Count of writes per statement name.
pub fn write_histogram(store: &InMemoryStore) -> HashMap<String, usize> {
    let mut histogram = HashMap::new();
    for call in store.writes() {
        *histogram.entry(call.statement).or_insert(0) += 1;
    }
    histogram
}
