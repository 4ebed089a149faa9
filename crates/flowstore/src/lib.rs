//! Flowstore - a unit-of-work persistence layer for process orchestration engines.
//!
//! Flowstore sits between an engine's command layer and a relational store:
//!
//! - Identity-mapped entity handles, one live object per row per session
//! - Staged inserts and deletes, snapshot-based update detection
//! - Dependency-ordered, batched flushes with revision-based optimistic locking
//! - Deletion notifications for variable-like entities
//! - Start-up schema presence and version checks
//!
//! SQL never appears here. Every statement is a logical name resolved through
//! [`PersistenceConfig`] and run by a [`StatementExecutor`] supplied by the
//! caller.
//!
//! # Quick Start
//!
//! ```ignore
//! use flowstore::prelude::*;
//!
//! const TASK: EntityType = EntityType::new("task");
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct Task {
//!     id: Option<String>,
//!     name: String,
//!     revision: i32,
//! }
//!
//! impl Entity for Task {
//!     const ENTITY_TYPE: EntityType = TASK;
//!     fn id(&self) -> Option<&str> { self.id.as_deref() }
//!     fn set_id(&mut self, id: String) { self.id = Some(id); }
//! }
//!
//! let config = PersistenceConfig::builder()
//!     .insert_order([TASK])
//!     .entity(EntityTypeConfig::new(TASK))
//!     .build()?;
//! let factory = SessionFactory::new(config);
//!
//! let mut session = factory.open_session(executor);
//! let task = session.insert(Task { id: None, name: "review".into(), revision: 0 })?;
//! session.commit()?;
//! session.close()?;
//! ```

pub mod factory;

pub use factory::{SessionFactory, SessionFactoryBuilder};

pub use flowstore_core::{
    DEFAULT_MAX_BATCH_SIZE, Dialect, Entity, EntityEvent, EntityType, EntityTypeConfig, Error,
    EventDispatcher, IdGenerator, LockTarget, LockedOperation, MissingMappingError,
    NoopDispatcher, OptimisticLockingError, Parameter, PersistenceConfig,
    PersistenceConfigBuilder, PersistentState, Result, Revisioned, Row, SchemaComponent,
    SchemaMismatchError, SchemaMismatchKind, SequenceIdGenerator, StatementError,
    StatementExecutor, StatementKind, UuidIdGenerator,
};
pub use flowstore_schema::{
    SchemaIntrospector, SchemaReport, SchemaRequirements, SchemaVersion, check_schema,
    requires_upgrade,
};
pub use flowstore_session::{
    DeleteOperation, Direction, EntityCache, EntityQuery, EntityRef, FlushResult, PendingCounts,
    Session, SessionContext, SessionDebugInfo,
};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::{
        Direction, Entity, EntityQuery, EntityRef, EntityType, EntityTypeConfig, Error,
        EventDispatcher, FlushResult, IdGenerator, Parameter, PersistenceConfig, Result,
        Revisioned, Row, SchemaIntrospector, SchemaRequirements, Session, SessionFactory,
        StatementExecutor,
    };
    pub use serde::{Deserialize, Serialize};
}
