//! Start-up schema checks for Flowstore.
//!
//! This crate provides:
//! - the [`SchemaIntrospector`] boundary over the store's catalog
//! - [`SchemaRequirements`]: required tables per component and the expected version
//! - [`check_schema`], mapping what it finds onto a
//!   [`SchemaMismatchError`](flowstore_core::SchemaMismatchError)
//! - [`SchemaVersion`] parsing and ordering
//!
//! Creating or upgrading a schema is left to external scripts.

pub mod check;
pub mod version;

pub use check::{
    DEFAULT_TABLE_PREFIX, ENGINE_TABLES, HISTORY_TABLES, IDENTITY_TABLES, SchemaIntrospector,
    SchemaReport, SchemaRequirements, check_schema, requires_upgrade,
};
pub use version::SchemaVersion;
