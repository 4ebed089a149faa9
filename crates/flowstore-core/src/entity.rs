//! Entity capabilities for session-managed records.
//!
//! Every record the session tracks implements [`Entity`]: a stable identifier
//! plus a comparable persistent state used for dirty checking. Records that
//! take part in optimistic locking additionally expose [`Revisioned`] through
//! [`Entity::as_revisioned`].
//!
//! # Example
//!
//! ```
//! use flowstore_core::{Entity, EntityType, Revisioned};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct Task {
//!     id: Option<String>,
//!     name: String,
//!     revision: i32,
//! }
//!
//! impl Entity for Task {
//!     const ENTITY_TYPE: EntityType = EntityType::new("task");
//!
//!     fn id(&self) -> Option<&str> {
//!         self.id.as_deref()
//!     }
//!
//!     fn set_id(&mut self, id: String) {
//!         self.id = Some(id);
//!     }
//!
//!     fn as_revisioned(&self) -> Option<&dyn Revisioned> {
//!         Some(self)
//!     }
//!
//!     fn as_revisioned_mut(&mut self) -> Option<&mut dyn Revisioned> {
//!         Some(self)
//!     }
//! }
//!
//! impl Revisioned for Task {
//!     fn revision(&self) -> i32 {
//!         self.revision
//!     }
//!
//!     fn set_revision(&mut self, revision: i32) {
//!         self.revision = revision;
//!     }
//! }
//! ```

use crate::Result;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;

/// Comparable snapshot of an entity's persistent columns.
pub type PersistentState = serde_json::Value;

/// Type tag identifying an entity kind (task, execution, variable, ...).
///
/// Staging areas, the identity cache and the configuration tables are all
/// keyed by this tag rather than by runtime type inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityType(&'static str);

impl EntityType {
    /// Create a type tag from its logical name.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    /// The logical name, as used in statement names.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// A record tracked by the session.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Type tag shared by every instance.
    const ENTITY_TYPE: EntityType;

    /// The identifier, if one has been assigned.
    fn id(&self) -> Option<&str>;

    /// Assign an identifier (used at insert time for id-less entities).
    fn set_id(&mut self, id: String);

    /// State compared against the snapshot to decide whether an update is needed.
    ///
    /// Defaults to the full serialized entity.
    fn persistent_state(&self) -> Result<PersistentState> {
        Ok(serde_json::to_value(self)?)
    }

    /// Optimistic-locking capability, if this entity carries a revision.
    fn as_revisioned(&self) -> Option<&dyn Revisioned> {
        None
    }

    /// Mutable access to the optimistic-locking capability.
    fn as_revisioned_mut(&mut self) -> Option<&mut dyn Revisioned> {
        None
    }
}

/// Revision counter used for optimistic concurrency control.
pub trait Revisioned {
    /// The revision currently stored for this row.
    fn revision(&self) -> i32;

    /// Overwrite the revision.
    fn set_revision(&mut self, revision: i32);

    /// The revision the row will carry after the next successful write.
    fn revision_next(&self) -> i32 {
        self.revision().saturating_add(1)
    }
}
