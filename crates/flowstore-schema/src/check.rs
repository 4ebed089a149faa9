//! Start-up schema presence and version check.
//!
//! The engine refuses to run against a store that is empty, at another
//! version, or missing the tables of an enabled component. No schema is ever
//! created or altered here; the result only says which action is needed.

use crate::version::SchemaVersion;
use flowstore_core::{Result, SchemaComponent, SchemaMismatchError, SchemaMismatchKind};
use std::collections::{BTreeMap, HashSet};

/// Tables of the process engine itself.
pub const ENGINE_TABLES: &[&str] = &[
    "RU_EXECUTION",
    "RU_TASK",
    "RU_VARIABLE",
    "RU_JOB",
    "GE_PROPERTY",
    "GE_BYTEARRAY",
];

/// Tables of the history component.
pub const HISTORY_TABLES: &[&str] = &["HI_PROCINST", "HI_ACTINST", "HI_TASKINST", "HI_VARINST"];

/// Tables of the identity component.
pub const IDENTITY_TABLES: &[&str] = &["ID_USER", "ID_GROUP", "ID_MEMBERSHIP"];

/// Default table name prefix.
pub const DEFAULT_TABLE_PREFIX: &str = "FLW_";

/// Read-only view of the store's catalog.
pub trait SchemaIntrospector {
    /// Names of all tables visible to the engine.
    fn table_names(&mut self) -> Result<Vec<String>>;

    /// Version recorded in the store, if any.
    fn schema_version(&mut self) -> Result<Option<String>>;
}

/// What the store must contain.
#[derive(Debug, Clone)]
pub struct SchemaRequirements {
    expected_version: String,
    table_prefix: String,
    components: BTreeMap<SchemaComponent, Vec<String>>,
}

impl SchemaRequirements {
    /// Engine, history and identity tables with the default prefix.
    pub fn new(expected_version: impl Into<String>) -> Self {
        let components = [
            (SchemaComponent::Engine, ENGINE_TABLES),
            (SchemaComponent::History, HISTORY_TABLES),
            (SchemaComponent::Identity, IDENTITY_TABLES),
        ]
        .into_iter()
        .map(|(component, tables)| {
            (
                component,
                tables.iter().map(|t| (*t).to_string()).collect(),
            )
        })
        .collect();
        Self {
            expected_version: expected_version.into(),
            table_prefix: DEFAULT_TABLE_PREFIX.to_string(),
            components,
        }
    }

    #[must_use]
    pub fn table_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.table_prefix = prefix.into();
        self
    }

    /// Stop requiring the tables of `component`.
    #[must_use]
    pub fn without(mut self, component: SchemaComponent) -> Self {
        self.components.remove(&component);
        self
    }

    /// Replace the unprefixed table list of `component`, enabling it.
    #[must_use]
    pub fn component_tables(
        mut self,
        component: SchemaComponent,
        tables: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.components
            .insert(component, tables.into_iter().map(Into::into).collect());
        self
    }

    pub fn expected_version(&self) -> &str {
        &self.expected_version
    }

    pub fn is_enabled(&self, component: SchemaComponent) -> bool {
        self.components.contains_key(&component)
    }

    /// Prefixed, upper-cased table names required for `component`.
    pub fn required_tables(&self, component: SchemaComponent) -> Vec<String> {
        self.components
            .get(&component)
            .map(|tables| {
                tables
                    .iter()
                    .map(|t| format!("{}{t}", self.table_prefix).to_ascii_uppercase())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Outcome of a successful check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaReport {
    /// Version recorded in the store.
    pub version: String,
    /// Components whose tables are all present.
    pub components: Vec<SchemaComponent>,
    /// Number of required tables found.
    pub tables_found: usize,
}

/// Compare the store against `requirements`.
///
/// Checks run in this order: tables present at all, version, then
/// per-component completeness. Table names compare case-insensitively. With
/// every component disabled only the version is checked.
#[tracing::instrument(level = "debug", skip_all, fields(expected = %requirements.expected_version))]
pub fn check_schema<I: SchemaIntrospector + ?Sized>(
    introspector: &mut I,
    requirements: &SchemaRequirements,
) -> Result<SchemaReport> {
    let present: HashSet<String> = introspector
        .table_names()?
        .into_iter()
        .map(|name| name.to_ascii_uppercase())
        .collect();

    let mut required_count = 0;
    let mut found = 0;
    let mut complete = Vec::new();
    let mut incomplete = Vec::new();
    let mut missing_tables = Vec::new();
    for &component in requirements.components.keys() {
        let required = requirements.required_tables(component);
        let missing: Vec<String> = required
            .iter()
            .filter(|table| !present.contains(table.as_str()))
            .cloned()
            .collect();
        required_count += required.len();
        found += required.len() - missing.len();
        if missing.is_empty() {
            complete.push(component);
        } else {
            incomplete.push(component);
            missing_tables.extend(missing);
        }
    }

    if required_count > 0 && found == 0 {
        tracing::warn!("No engine tables present");
        return Err(SchemaMismatchError {
            kind: SchemaMismatchKind::NoTables,
        }
        .into());
    }

    let found_version = introspector.schema_version()?;
    if !versions_match(found_version.as_deref(), &requirements.expected_version) {
        tracing::warn!(found = ?found_version, "Schema version mismatch");
        return Err(SchemaMismatchError {
            kind: SchemaMismatchKind::WrongVersion {
                expected: requirements.expected_version.clone(),
                found: found_version,
            },
        }
        .into());
    }

    if !incomplete.is_empty() {
        tracing::warn!(components = ?incomplete, tables = ?missing_tables, "Schema incomplete");
        return Err(SchemaMismatchError {
            kind: SchemaMismatchKind::MissingComponents {
                components: incomplete,
                tables: missing_tables,
            },
        }
        .into());
    }

    Ok(SchemaReport {
        version: found_version.unwrap_or_default(),
        components: complete,
        tables_found: found,
    })
}

fn versions_match(found: Option<&str>, expected: &str) -> bool {
    let Some(found) = found else {
        return false;
    };
    match (
        found.parse::<SchemaVersion>(),
        expected.parse::<SchemaVersion>(),
    ) {
        (Ok(found), Ok(expected)) => found == expected,
        _ => found.trim() == expected.trim(),
    }
}

/// Whether a mismatch is resolved by upgrading rather than creating the schema.
///
/// True for a wrong version whose recorded version is older than the expected
/// one; false when the store is newer or the versions cannot be parsed.
pub fn requires_upgrade(error: &SchemaMismatchError) -> bool {
    let SchemaMismatchKind::WrongVersion {
        expected,
        found: Some(found),
    } = &error.kind
    else {
        return false;
    };
    match (
        found.parse::<SchemaVersion>(),
        expected.parse::<SchemaVersion>(),
    ) {
        (Ok(found), Ok(expected)) => found.requires_upgrade(&expected),
        _ => false,
    }
}
