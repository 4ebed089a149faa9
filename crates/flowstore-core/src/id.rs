//! Identifier generation for entities inserted without an id.

use std::sync::atomic::{AtomicU64, Ordering};

/// Supplies fresh unique identifiers.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> String;
}

/// Random UUID v4 identifiers.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidIdGenerator;

impl IdGenerator for UuidIdGenerator {
    fn next_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// Deterministic `<prefix><n>` identifiers, counting up from 1.
#[derive(Debug, Default)]
pub struct SequenceIdGenerator {
    prefix: String,
    next: AtomicU64,
}

impl SequenceIdGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(1),
        }
    }
}

impl IdGenerator for SequenceIdGenerator {
    fn next_id(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        format!("{}{n}", self.prefix)
    }
}
