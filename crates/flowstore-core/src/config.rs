//! Immutable engine configuration.
//!
//! Built once at start-up and shared by `Arc` into every session:
//!
//! - the insert dependency order across entity types,
//! - per-type batch capability and statement mapping,
//! - the global batch size and bulk-insert switch,
//! - database-specific statement overrides for the active [`Dialect`].

use crate::entity::EntityType;
use crate::error::{Error, MissingMappingError, Result};
use crate::executor::StatementKind;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

/// Default maximum number of entities per batch statement.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 100;

/// Database product the statements are mapped for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Dialect {
    #[default]
    Postgres,
    Mysql,
    Oracle,
    Mssql,
    Db2,
    H2,
    Sqlite,
}

impl Dialect {
    /// Short lowercase name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Dialect::Postgres => "postgres",
            Dialect::Mysql => "mysql",
            Dialect::Oracle => "oracle",
            Dialect::Mssql => "mssql",
            Dialect::Db2 => "db2",
            Dialect::H2 => "h2",
            Dialect::Sqlite => "sqlite",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Dialect {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Dialect::Postgres),
            "mysql" | "mariadb" => Ok(Dialect::Mysql),
            "oracle" => Ok(Dialect::Oracle),
            "mssql" | "sqlserver" => Ok(Dialect::Mssql),
            "db2" => Ok(Dialect::Db2),
            "h2" => Ok(Dialect::H2),
            "sqlite" => Ok(Dialect::Sqlite),
            other => Err(Error::Config(format!("unknown database dialect '{other}'"))),
        }
    }
}

/// Per-type statement mapping and batch capability.
#[derive(Debug, Clone)]
pub struct EntityTypeConfig {
    entity_type: EntityType,
    statements: BTreeMap<StatementKind, String>,
    variable_like: bool,
}

impl EntityTypeConfig {
    /// Mapping with conventional statement names for insert, bulk insert,
    /// update, delete and select-by-id. No batch delete is mapped.
    #[must_use]
    pub fn new(entity_type: EntityType) -> Self {
        let statements = [
            StatementKind::Insert,
            StatementKind::BulkInsert,
            StatementKind::Update,
            StatementKind::Delete,
            StatementKind::SelectById,
        ]
        .into_iter()
        .map(|kind| (kind, kind.conventional_name(entity_type.name())))
        .collect();
        Self {
            entity_type,
            statements,
            variable_like: false,
        }
    }

    /// Rows of this type are never updated (history, logs).
    #[must_use]
    pub fn immutable(self) -> Self {
        self.without(StatementKind::Update)
    }

    /// Insert rows of this type one at a time even when several are pending.
    #[must_use]
    pub fn without_bulk_insert(self) -> Self {
        self.without(StatementKind::BulkInsert)
    }

    /// Map a batch-checked delete statement.
    #[must_use]
    pub fn bulk_delete(self, statement: impl Into<String>) -> Self {
        self.statement(StatementKind::BulkDelete, statement)
    }

    /// Deletions of this type notify the event dispatcher.
    #[must_use]
    pub fn variable_like(mut self) -> Self {
        self.variable_like = true;
        self
    }

    /// Override the statement for one operation.
    #[must_use]
    pub fn statement(mut self, kind: StatementKind, statement: impl Into<String>) -> Self {
        self.statements.insert(kind, statement.into());
        self
    }

    /// Remove the mapping for one operation.
    #[must_use]
    pub fn without(mut self, kind: StatementKind) -> Self {
        self.statements.remove(&kind);
        self
    }

    pub fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    /// Mapped statement for an operation, if any.
    pub fn statement_for(&self, kind: StatementKind) -> Option<&str> {
        self.statements.get(&kind).map(String::as_str)
    }

    pub fn is_variable_like(&self) -> bool {
        self.variable_like
    }
}

/// Immutable engine configuration shared by all sessions.
#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    dialect: Dialect,
    max_batch_size: usize,
    bulk_insert_enabled: bool,
    insert_order: Vec<EntityType>,
    entity_types: HashMap<EntityType, EntityTypeConfig>,
    dialect_statements: HashMap<Dialect, HashMap<String, String>>,
}

impl PersistenceConfig {
    /// Start building a configuration.
    #[must_use]
    pub fn builder() -> PersistenceConfigBuilder {
        PersistenceConfigBuilder::default()
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Maximum number of entities per bulk insert or batch delete call.
    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    pub fn bulk_insert_enabled(&self) -> bool {
        self.bulk_insert_enabled
    }

    /// Foreign-key safe insert order. Types not listed flush afterwards.
    pub fn insert_order(&self) -> &[EntityType] {
        &self.insert_order
    }

    pub fn entity_config(&self, entity_type: EntityType) -> Option<&EntityTypeConfig> {
        self.entity_types.get(&entity_type)
    }

    /// Resolve the statement for an operation on an entity type, applying the
    /// dialect override if one exists.
    pub fn statement(&self, kind: StatementKind, entity_type: EntityType) -> Result<&str> {
        let name = self
            .entity_types
            .get(&entity_type)
            .and_then(|cfg| cfg.statement_for(kind))
            .ok_or(MissingMappingError {
                operation: kind,
                entity_type,
            })?;
        Ok(self.map_statement(name))
    }

    /// Apply the dialect-specific replacement for a statement name, if any.
    pub fn map_statement<'a>(&'a self, statement: &'a str) -> &'a str {
        self.dialect_statements
            .get(&self.dialect)
            .and_then(|overrides| overrides.get(statement))
            .map_or(statement, String::as_str)
    }

    /// Whether several pending inserts of this type go through the bulk statement.
    pub fn is_bulk_insertable(&self, entity_type: EntityType) -> bool {
        self.bulk_insert_enabled
            && self
                .entity_types
                .get(&entity_type)
                .is_some_and(|cfg| cfg.statement_for(StatementKind::BulkInsert).is_some())
    }

    /// Configured batch-checked delete statement for this type.
    ///
    /// Returned unmapped; the dialect override applies when it executes.
    pub fn bulk_delete_statement(&self, entity_type: EntityType) -> Option<&str> {
        self.entity_types
            .get(&entity_type)
            .and_then(|cfg| cfg.statement_for(StatementKind::BulkDelete))
    }

    pub fn is_variable_like(&self, entity_type: EntityType) -> bool {
        self.entity_types
            .get(&entity_type)
            .is_some_and(EntityTypeConfig::is_variable_like)
    }
}

/// Builder for [`PersistenceConfig`].
#[derive(Debug, Clone)]
pub struct PersistenceConfigBuilder {
    dialect: Dialect,
    max_batch_size: usize,
    bulk_insert_enabled: bool,
    insert_order: Vec<EntityType>,
    entity_types: Vec<EntityTypeConfig>,
    dialect_statements: Vec<(Dialect, String, String)>,
}

impl Default for PersistenceConfigBuilder {
    fn default() -> Self {
        Self {
            dialect: Dialect::default(),
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            bulk_insert_enabled: true,
            insert_order: Vec::new(),
            entity_types: Vec::new(),
            dialect_statements: Vec::new(),
        }
    }
}

impl PersistenceConfigBuilder {
    #[must_use]
    pub fn dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    #[must_use]
    pub fn max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    /// Globally enable or disable bulk inserts.
    #[must_use]
    pub fn bulk_insert_enabled(mut self, enabled: bool) -> Self {
        self.bulk_insert_enabled = enabled;
        self
    }

    /// Set the insert dependency order (parents before children).
    #[must_use]
    pub fn insert_order(mut self, order: impl IntoIterator<Item = EntityType>) -> Self {
        self.insert_order = order.into_iter().collect();
        self
    }

    /// Register an entity type.
    #[must_use]
    pub fn entity(mut self, config: EntityTypeConfig) -> Self {
        self.entity_types.push(config);
        self
    }

    /// Replace `statement` with `replacement` when running on `dialect`.
    #[must_use]
    pub fn dialect_statement(
        mut self,
        dialect: Dialect,
        statement: impl Into<String>,
        replacement: impl Into<String>,
    ) -> Self {
        self.dialect_statements
            .push((dialect, statement.into(), replacement.into()));
        self
    }

    /// Validate and freeze the configuration.
    pub fn build(self) -> Result<PersistenceConfig> {
        if self.max_batch_size == 0 {
            return Err(Error::Config("max_batch_size must be greater than 0".into()));
        }

        let mut seen = HashSet::new();
        for entity_type in &self.insert_order {
            if !seen.insert(*entity_type) {
                return Err(Error::Config(format!(
                    "entity type '{entity_type}' appears twice in the insert order"
                )));
            }
        }

        let mut entity_types = HashMap::with_capacity(self.entity_types.len());
        for config in self.entity_types {
            let entity_type = config.entity_type();
            if entity_types.insert(entity_type, config).is_some() {
                return Err(Error::Config(format!(
                    "entity type '{entity_type}' registered twice"
                )));
            }
        }

        let mut dialect_statements: HashMap<Dialect, HashMap<String, String>> = HashMap::new();
        for (dialect, statement, replacement) in self.dialect_statements {
            dialect_statements
                .entry(dialect)
                .or_default()
                .insert(statement, replacement);
        }

        tracing::debug!(
            dialect = %self.dialect,
            max_batch_size = self.max_batch_size,
            entity_types = entity_types.len(),
            "Persistence configuration built"
        );

        Ok(PersistenceConfig {
            dialect: self.dialect,
            max_batch_size: self.max_batch_size,
            bulk_insert_enabled: self.bulk_insert_enabled,
            insert_order: self.insert_order,
            entity_types,
            dialect_statements,
        })
    }
}
