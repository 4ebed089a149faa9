//! Error types for flowstore operations.

use crate::entity::EntityType;
use crate::executor::StatementKind;
use std::fmt;
use thiserror::Error as ThisError;

/// The primary error type for all flowstore operations.
#[derive(Debug, ThisError)]
pub enum Error {
    /// A write affected fewer rows than its revision check requires
    #[error(transparent)]
    OptimisticLocking(#[from] OptimisticLockingError),
    /// No statement is mapped for an entity type and operation
    #[error(transparent)]
    MissingMapping(#[from] MissingMappingError),
    /// The store schema is absent, incomplete or at the wrong version
    #[error(transparent)]
    SchemaMismatch(#[from] SchemaMismatchError),
    /// The statement executor reported a failure
    #[error(transparent)]
    Statement(#[from] StatementError),
    /// An entity reached the cache without an identifier
    #[error("entity of type '{entity_type}' has no identifier")]
    MissingIdentifier { entity_type: EntityType },
    /// A query returned more rows than the caller accepts
    #[error("statement '{statement}' returned {actual} rows, expected at most {expected}")]
    UnexpectedRows {
        statement: String,
        expected: usize,
        actual: usize,
    },
    /// Serialization/deserialization errors
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    /// Invalid engine configuration
    #[error("configuration error: {0}")]
    Config(String),
    /// Custom error with message
    #[error("{0}")]
    Custom(String),
}

/// Which write tripped the optimistic-locking check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockedOperation {
    Update,
    Delete,
    BatchDelete,
}

impl fmt::Display for LockedOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Update => "update",
            Self::Delete => "delete",
            Self::BatchDelete => "batch delete",
        })
    }
}

/// The row(s) an optimistic-locking failure refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockTarget {
    /// A single entity, named by type and id.
    Entity { entity_type: EntityType, id: String },
    /// A batch of same-type entities.
    Batch { entity_type: EntityType, size: usize },
}

impl fmt::Display for LockTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entity { entity_type, id } => write!(f, "{entity_type}[id={id}]"),
            Self::Batch { entity_type, size } => write!(f, "batch of {size} {entity_type}"),
        }
    }
}

/// Another writer changed or removed the row(s) first.
#[derive(Debug, Clone, ThisError)]
#[error(
    "{operation} of {target} via '{statement}' affected {affected_rows} rows, expected {expected_rows}: \
     the row was modified by another transaction"
)]
pub struct OptimisticLockingError {
    pub operation: LockedOperation,
    pub target: LockTarget,
    pub statement: String,
    pub expected_rows: u64,
    pub affected_rows: u64,
}

/// A statement the flush needs is not mapped.
#[derive(Debug, Clone, ThisError)]
#[error("no {operation} statement mapped for entity type '{entity_type}'")]
pub struct MissingMappingError {
    pub operation: StatementKind,
    pub entity_type: EntityType,
}

/// Engine sub-component that owns a group of tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SchemaComponent {
    Engine,
    History,
    Identity,
}

impl fmt::Display for SchemaComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Engine => "engine",
            Self::History => "history",
            Self::Identity => "identity",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaMismatchKind {
    /// None of the required tables exist; the schema must be created.
    NoTables,
    /// Tables exist but the recorded version differs; an upgrade must run.
    WrongVersion {
        expected: String,
        found: Option<String>,
    },
    /// Some components' tables are missing.
    MissingComponents {
        components: Vec<SchemaComponent>,
        tables: Vec<String>,
    },
}

/// Startup schema check failure.
#[derive(Debug, Clone, ThisError)]
#[error("{}", describe_mismatch(.kind))]
pub struct SchemaMismatchError {
    pub kind: SchemaMismatchKind,
}

fn describe_mismatch(kind: &SchemaMismatchKind) -> String {
    match kind {
        SchemaMismatchKind::NoTables => {
            "no flowstore tables present in the database; create the schema first".to_string()
        }
        SchemaMismatchKind::WrongVersion { expected, found } => format!(
            "schema version mismatch: library expects {expected}, database has {}",
            found.as_deref().unwrap_or("no version")
        ),
        SchemaMismatchKind::MissingComponents { components, tables } => {
            let names: Vec<String> = components.iter().map(ToString::to_string).collect();
            format!(
                "missing tables for component(s) {}: {}",
                names.join(", "),
                tables.join(", ")
            )
        }
    }
}

impl SchemaMismatchError {
    /// Whether creating the schema from scratch resolves this mismatch.
    pub fn is_missing_schema(&self) -> bool {
        matches!(self.kind, SchemaMismatchKind::NoTables)
    }

    /// Whether running an upgrade resolves this mismatch.
    pub fn is_wrong_version(&self) -> bool {
        matches!(self.kind, SchemaMismatchKind::WrongVersion { .. })
    }
}

/// Failure reported by the statement executor.
#[derive(Debug, ThisError)]
#[error("statement '{statement}' failed: {message}")]
pub struct StatementError {
    pub statement: String,
    pub message: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl StatementError {
    pub fn new(statement: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            statement: statement.into(),
            message: message.into(),
            source: None,
        }
    }

    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

impl Error {
    /// Is this an optimistic-locking failure?
    pub fn is_optimistic_locking_failure(&self) -> bool {
        matches!(self, Error::OptimisticLocking(_))
    }

    /// Is this a configuration/programming error that retrying cannot fix?
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Error::MissingMapping(_) | Error::Config(_) | Error::MissingIdentifier { .. }
        )
    }

    /// Get the statement name if this error carries one.
    pub fn statement(&self) -> Option<&str> {
        match self {
            Error::OptimisticLocking(e) => Some(&e.statement),
            Error::Statement(e) => Some(&e.statement),
            Error::UnexpectedRows { statement, .. } => Some(statement),
            _ => None,
        }
    }
}

/// Result type alias for flowstore operations.
pub type Result<T> = std::result::Result<T, Error>;
