//! Statement execution boundary.
//!
//! The session never builds SQL. It resolves a logical statement name through
//! [`PersistenceConfig`](crate::PersistenceConfig) and hands that name plus a
//! parameter object to a [`StatementExecutor`], which owns the connection and
//! the transaction for the lifetime of one session.
//!
//! Every call is synchronous: the session waits for the store to answer before
//! it moves on to the next queued operation.

use crate::error::{Error, Result};
use std::fmt;

/// Parameter object passed to a statement.
pub type Parameter = serde_json::Value;

/// One result row, keyed by column/property name.
pub type Row = serde_json::Value;

/// Logical operation a statement performs for an entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StatementKind {
    /// Insert a single entity.
    Insert,
    /// Insert a list of same-type entities in one call.
    BulkInsert,
    /// Revision-checked update of one entity.
    Update,
    /// Delete one entity.
    Delete,
    /// Delete a list of same-type entities in one call.
    BulkDelete,
    /// Load one entity by id.
    SelectById,
}

impl StatementKind {
    /// Build the conventional statement name for an entity type.
    ///
    /// `insert-task`, `bulk-insert-task`, `update-task`, `delete-task`,
    /// `bulk-delete-task`, `select-task-by-id`.
    #[must_use]
    pub fn conventional_name(self, entity_type: &str) -> String {
        match self {
            Self::Insert => format!("insert-{entity_type}"),
            Self::BulkInsert => format!("bulk-insert-{entity_type}"),
            Self::Update => format!("update-{entity_type}"),
            Self::Delete => format!("delete-{entity_type}"),
            Self::BulkDelete => format!("bulk-delete-{entity_type}"),
            Self::SelectById => format!("select-{entity_type}-by-id"),
        }
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Insert => "insert",
            Self::BulkInsert => "bulk insert",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::BulkDelete => "bulk delete",
            Self::SelectById => "select by id",
        })
    }
}

/// Runs mapped statements against the store.
///
/// Implementations wrap exactly one connection/transaction context. Write
/// methods return the number of affected rows as reported by the store; the
/// session relies on that count for optimistic locking, so drivers must not
/// fabricate it.
pub trait StatementExecutor {
    /// Run a query returning any number of rows.
    fn select_list(&mut self, statement: &str, parameter: &Parameter) -> Result<Vec<Row>>;

    /// Run a query returning at most one row.
    fn select_one(&mut self, statement: &str, parameter: &Parameter) -> Result<Option<Row>> {
        let mut rows = self.select_list(statement, parameter)?;
        match rows.len() {
            0 => Ok(None),
            1 => Ok(rows.pop()),
            actual => Err(Error::UnexpectedRows {
                statement: statement.to_string(),
                expected: 1,
                actual,
            }),
        }
    }

    /// Run an insert statement.
    fn insert(&mut self, statement: &str, parameter: &Parameter) -> Result<u64>;

    /// Run an update statement.
    fn update(&mut self, statement: &str, parameter: &Parameter) -> Result<u64>;

    /// Run a delete statement.
    fn delete(&mut self, statement: &str, parameter: &Parameter) -> Result<u64>;

    /// Commit the underlying transaction.
    fn commit(&mut self) -> Result<()>;

    /// Roll back the underlying transaction.
    fn rollback(&mut self) -> Result<()>;

    /// Release the underlying connection. Called exactly once per session.
    fn close(&mut self) -> Result<()>;
}

impl<X: StatementExecutor + ?Sized> StatementExecutor for Box<X> {
    fn select_list(&mut self, statement: &str, parameter: &Parameter) -> Result<Vec<Row>> {
        (**self).select_list(statement, parameter)
    }

    fn select_one(&mut self, statement: &str, parameter: &Parameter) -> Result<Option<Row>> {
        (**self).select_one(statement, parameter)
    }

    fn insert(&mut self, statement: &str, parameter: &Parameter) -> Result<u64> {
        (**self).insert(statement, parameter)
    }

    fn update(&mut self, statement: &str, parameter: &Parameter) -> Result<u64> {
        (**self).update(statement, parameter)
    }

    fn delete(&mut self, statement: &str, parameter: &Parameter) -> Result<u64> {
        (**self).delete(statement, parameter)
    }

    fn commit(&mut self) -> Result<()> {
        (**self).commit()
    }

    fn rollback(&mut self) -> Result<()> {
        (**self).rollback()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct FixedRows(Vec<Row>);

    impl StatementExecutor for FixedRows {
        fn select_list(&mut self, _statement: &str, _parameter: &Parameter) -> Result<Vec<Row>> {
            Ok(self.0.clone())
        }

        fn insert(&mut self, _statement: &str, _parameter: &Parameter) -> Result<u64> {
            Ok(1)
        }

        fn update(&mut self, _statement: &str, _parameter: &Parameter) -> Result<u64> {
            Ok(1)
        }

        fn delete(&mut self, _statement: &str, _parameter: &Parameter) -> Result<u64> {
            Ok(1)
        }

        fn commit(&mut self) -> Result<()> {
            Ok(())
        }

        fn rollback(&mut self) -> Result<()> {
            Ok(())
        }

        fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn conventional_names() {
        assert_eq!(StatementKind::Insert.conventional_name("task"), "insert-task");
        assert_eq!(
            StatementKind::BulkInsert.conventional_name("task"),
            "bulk-insert-task"
        );
        assert_eq!(
            StatementKind::SelectById.conventional_name("variable"),
            "select-variable-by-id"
        );
    }

    #[test]
    fn select_one_defaults() {
        let mut empty = FixedRows(vec![]);
        assert!(empty.select_one("q", &json!({})).unwrap().is_none());

        let mut single = FixedRows(vec![json!({"id": "1"})]);
        assert_eq!(
            single.select_one("q", &json!({})).unwrap(),
            Some(json!({"id": "1"}))
        );

        let mut boxed: Box<dyn StatementExecutor> =
            Box::new(FixedRows(vec![json!({"id": "1"}), json!({"id": "2"})]));
        let err = boxed.select_one("select-task-by-id", &json!({})).unwrap_err();
        assert!(matches!(
            err,
            Error::UnexpectedRows {
                expected: 1,
                actual: 2,
                ..
            }
        ));
    }
}
