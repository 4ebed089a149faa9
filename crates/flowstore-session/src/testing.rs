//! Shared fixtures for the unit tests of this crate.

use crate::cache::TrackedEntity;
use flowstore_core::{
    Entity, EntityEvent, EntityType, EntityTypeConfig, EventDispatcher, Parameter,
    PersistenceConfig, Result, Revisioned, Row, StatementExecutor,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

pub const TASK: EntityType = EntityType::new("task");
pub const VARIABLE: EntityType = EntityType::new("variable");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Option<String>,
    pub name: String,
    pub revision: i32,
}

impl Task {
    pub fn new(name: &str) -> Self {
        Self {
            id: None,
            name: name.to_string(),
            revision: 0,
        }
    }

    pub fn persisted(id: &str, name: &str, revision: i32) -> Self {
        Self {
            id: Some(id.to_string()),
            name: name.to_string(),
            revision,
        }
    }
}

impl Entity for Task {
    const ENTITY_TYPE: EntityType = TASK;

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

impl Revisioned for Task {
    fn revision(&self) -> i32 {
        self.revision
    }

    fn set_revision(&mut self, revision: i32) {
        self.revision = revision;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub id: Option<String>,
    pub name: String,
    pub text: Option<String>,
    pub revision: i32,
}

impl Variable {
    pub fn persisted(id: &str, name: &str, revision: i32) -> Self {
        Self {
            id: Some(id.to_string()),
            name: name.to_string(),
            text: None,
            revision,
        }
    }
}

impl Entity for Variable {
    const ENTITY_TYPE: EntityType = VARIABLE;

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

impl Revisioned for Variable {
    fn revision(&self) -> i32 {
        self.revision
    }

    fn set_revision(&mut self, revision: i32) {
        self.revision = revision;
    }
}

/// Wrap an entity as a type-erased cache handle.
pub fn erased<E: Entity>(entity: E) -> Arc<dyn TrackedEntity> {
    Arc::new(RwLock::new(entity))
}

/// Tasks bulk-insertable; variables variable-like, inserted one by one, with a
/// batch delete statement.
pub fn test_config() -> PersistenceConfig {
    PersistenceConfig::builder()
        .insert_order([TASK, VARIABLE])
        .entity(EntityTypeConfig::new(TASK))
        .entity(
            EntityTypeConfig::new(VARIABLE)
                .without_bulk_insert()
                .variable_like()
                .bulk_delete("delete-variables-for-execution"),
        )
        .build()
        .expect("valid test config")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    Select,
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone)]
pub struct RecordedStatement {
    pub call: Call,
    pub name: String,
    pub parameter: Parameter,
}

#[derive(Debug, Default)]
struct MockState {
    statements: Vec<RecordedStatement>,
    rows: HashMap<String, Vec<Row>>,
    insert_rows: Option<u64>,
    update_rows: Option<u64>,
    delete_rows: Option<u64>,
    commits: usize,
    rollbacks: usize,
    closes: usize,
}

/// Executor that records every call and answers from canned data.
///
/// Writes report one affected row per targeted entity unless overridden.
#[derive(Debug, Clone, Default)]
pub struct MockExecutor {
    state: Arc<Mutex<MockState>>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().expect("lock poisoned")
    }

    pub fn with_rows(self, statement: &str, rows: Vec<Row>) -> Self {
        self.state().rows.insert(statement.to_string(), rows);
        self
    }

    pub fn set_insert_rows(&mut self, rows: u64) {
        self.state().insert_rows = Some(rows);
    }

    pub fn set_update_rows(&mut self, rows: u64) {
        self.state().update_rows = Some(rows);
    }

    pub fn set_delete_rows(&mut self, rows: u64) {
        self.state().delete_rows = Some(rows);
    }

    pub fn statements(&self) -> Vec<RecordedStatement> {
        self.state().statements.clone()
    }

    pub fn statement_names(&self) -> Vec<String> {
        self.state()
            .statements
            .iter()
            .filter(|s| s.call != Call::Select)
            .map(|s| s.name.clone())
            .collect()
    }

    pub fn commits(&self) -> usize {
        self.state().commits
    }

    pub fn rollbacks(&self) -> usize {
        self.state().rollbacks
    }

    pub fn closes(&self) -> usize {
        self.state().closes
    }

    fn record(&self, call: Call, statement: &str, parameter: &Parameter) {
        self.state().statements.push(RecordedStatement {
            call,
            name: statement.to_string(),
            parameter: parameter.clone(),
        });
    }
}

fn targeted(parameter: &Parameter) -> u64 {
    parameter.as_array().map_or(1, |items| items.len() as u64)
}

impl StatementExecutor for MockExecutor {
    fn select_list(&mut self, statement: &str, parameter: &Parameter) -> Result<Vec<Row>> {
        self.record(Call::Select, statement, parameter);
        Ok(self.state().rows.get(statement).cloned().unwrap_or_default())
    }

    fn insert(&mut self, statement: &str, parameter: &Parameter) -> Result<u64> {
        self.record(Call::Insert, statement, parameter);
        let canned = self.state().insert_rows;
        Ok(canned.unwrap_or_else(|| targeted(parameter)))
    }

    fn update(&mut self, statement: &str, parameter: &Parameter) -> Result<u64> {
        self.record(Call::Update, statement, parameter);
        Ok(self.state().update_rows.unwrap_or(1))
    }

    fn delete(&mut self, statement: &str, parameter: &Parameter) -> Result<u64> {
        self.record(Call::Delete, statement, parameter);
        let canned = self.state().delete_rows;
        Ok(canned.unwrap_or_else(|| targeted(parameter)))
    }

    fn commit(&mut self) -> Result<()> {
        self.state().commits += 1;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.state().rollbacks += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.state().closes += 1;
        Ok(())
    }
}

/// Dispatcher that keeps every event it receives.
#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    enabled: bool,
    checks: AtomicUsize,
    events: Mutex<Vec<EntityEvent>>,
}

impl RecordingDispatcher {
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<EntityEvent> {
        self.events.lock().expect("lock poisoned").clone()
    }

    pub fn enabled_checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }
}

impl EventDispatcher for RecordingDispatcher {
    fn is_enabled(&self) -> bool {
        self.checks.fetch_add(1, Ordering::SeqCst);
        self.enabled
    }

    fn dispatch(&self, event: EntityEvent) {
        self.events.lock().expect("lock poisoned").push(event);
    }
}
