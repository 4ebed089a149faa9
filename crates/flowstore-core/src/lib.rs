//! Core types and traits for flowstore.
//!
//! This crate provides the foundational abstractions shared by the session
//! engine and the start-up checks:
//!
//! - `Entity` / `Revisioned` capabilities for tracked records
//! - `StatementExecutor` trait for the store connection
//! - `PersistenceConfig` for insert order, batch capability and statement mapping
//! - `IdGenerator` and `EventDispatcher` collaborators
//! - the `Error` taxonomy

pub mod config;
pub mod entity;
pub mod error;
pub mod events;
pub mod executor;
pub mod id;

pub use config::{
    DEFAULT_MAX_BATCH_SIZE, Dialect, EntityTypeConfig, PersistenceConfig, PersistenceConfigBuilder,
};
pub use entity::{Entity, EntityType, PersistentState, Revisioned};
pub use error::{
    Error, LockTarget, LockedOperation, MissingMappingError, OptimisticLockingError, Result,
    SchemaComponent, SchemaMismatchError, SchemaMismatchKind, StatementError,
};
pub use events::{EntityEvent, EventDispatcher, NoopDispatcher};
pub use executor::{Parameter, Row, StatementExecutor, StatementKind};
pub use id::{IdGenerator, SequenceIdGenerator, UuidIdGenerator};
