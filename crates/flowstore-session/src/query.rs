//! Query objects for entity lists.
//!
//! An [`EntityQuery`] collects named criteria, paging and ordering for a mapped
//! select statement, then runs it through the session so every returned row is
//! identity-mapped.
//!
//! ```ignore
//! let open = session
//!     .create_query::<Task>("select-tasks-by-assignee")
//!     .parameter("assignee", "kermit")
//!     .order_by("createTime", Direction::Desc)
//!     .max_results(20)
//!     .list()?;
//! ```
//!
//! The parameter object handed to the executor is a JSON object holding the
//! criteria plus `firstResult`, `maxResults` and `orderBy` when set.

use crate::cache::EntityRef;
use crate::Session;
use flowstore_core::{Entity, Error, Parameter, Result, StatementExecutor};
use regex::Regex;
use serde::Serialize;
use serde_json::Map;
use std::fmt;
use std::marker::PhantomData;
use std::sync::OnceLock;

/// Parameter key for the offset of the first row.
pub const FIRST_RESULT_KEY: &str = "firstResult";
/// Parameter key for the page size.
pub const MAX_RESULTS_KEY: &str = "maxResults";
/// Parameter key for the rendered order-by clause.
pub const ORDER_BY_KEY: &str = "orderBy";

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Asc => "asc",
            Direction::Desc => "desc",
        })
    }
}

fn column_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$").ok())
        .as_ref()
}

/// Whether `column` is safe to render into an order-by clause.
///
/// Accepts a plain identifier or one qualified identifier (`RES.NAME_`).
pub fn is_valid_order_column(column: &str) -> bool {
    column_pattern().is_some_and(|pattern| pattern.is_match(column))
}

/// A pending query for entities of type `E`.
#[must_use = "queries do nothing until list, single_result or count is called"]
pub struct EntityQuery<'s, E, X: StatementExecutor> {
    session: &'s mut Session<X>,
    statement: String,
    count_statement: String,
    criteria: Map<String, Parameter>,
    first_result: Option<u64>,
    max_results: Option<u64>,
    order_by: Vec<(String, Direction)>,
    invalid: Option<Error>,
    _entity: PhantomData<fn() -> E>,
}

impl<'s, E: Entity, X: StatementExecutor> EntityQuery<'s, E, X> {
    pub(crate) fn new(session: &'s mut Session<X>, statement: impl Into<String>) -> Self {
        let statement = statement.into();
        Self {
            session,
            count_statement: format!("{statement}-count"),
            statement,
            criteria: Map::new(),
            first_result: None,
            max_results: None,
            order_by: Vec::new(),
            invalid: None,
            _entity: PhantomData,
        }
    }

    /// Add a named criterion.
    pub fn parameter(mut self, name: &str, value: impl Serialize) -> Self {
        match serde_json::to_value(value) {
            Ok(value) => {
                self.criteria.insert(name.to_string(), value);
            }
            Err(e) => self.remember(e.into()),
        }
        self
    }

    /// Skip the first `offset` rows.
    pub fn first_result(mut self, offset: u64) -> Self {
        self.first_result = Some(offset);
        self
    }

    /// Return at most `limit` rows.
    pub fn max_results(mut self, limit: u64) -> Self {
        self.max_results = Some(limit);
        self
    }

    /// Append an ordering column. Invalid column names fail the terminal call.
    pub fn order_by(mut self, column: &str, direction: Direction) -> Self {
        if is_valid_order_column(column) {
            self.order_by.push((column.to_string(), direction));
        } else {
            self.remember(Error::Custom(format!(
                "invalid order-by column '{column}' for query '{}'",
                self.statement
            )));
        }
        self
    }

    /// Statement used by [`count`](Self::count). Defaults to `<statement>-count`.
    pub fn count_statement(mut self, statement: impl Into<String>) -> Self {
        self.count_statement = statement.into();
        self
    }

    fn remember(&mut self, error: Error) {
        if self.invalid.is_none() {
            self.invalid = Some(error);
        }
    }

    fn check(&mut self) -> Result<()> {
        match self.invalid.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// The parameter object sent with the list statement.
    pub fn to_parameter(&self) -> Parameter {
        let mut parameter = self.criteria.clone();
        if let Some(offset) = self.first_result {
            parameter.insert(FIRST_RESULT_KEY.to_string(), offset.into());
        }
        if let Some(limit) = self.max_results {
            parameter.insert(MAX_RESULTS_KEY.to_string(), limit.into());
        }
        if !self.order_by.is_empty() {
            let clause = self
                .order_by
                .iter()
                .map(|(column, direction)| format!("{column} {direction}"))
                .collect::<Vec<_>>()
                .join(", ");
            parameter.insert(ORDER_BY_KEY.to_string(), clause.into());
        }
        Parameter::Object(parameter)
    }

    /// Run the query and identity-map every row.
    #[tracing::instrument(level = "debug", skip(self), fields(statement = %self.statement))]
    pub fn list(mut self) -> Result<Vec<EntityRef<E>>> {
        self.check()?;
        let parameter = self.to_parameter();
        self.session.select_list::<E>(&self.statement, &parameter)
    }

    /// Run the query expecting at most one row.
    pub fn single_result(mut self) -> Result<Option<EntityRef<E>>> {
        self.check()?;
        let parameter = self.to_parameter();
        let mut found = self.session.select_list::<E>(&self.statement, &parameter)?;
        if found.len() > 1 {
            return Err(Error::UnexpectedRows {
                statement: self.statement,
                expected: 1,
                actual: found.len(),
            });
        }
        Ok(found.pop())
    }

    /// Count matching rows with the count statement, ignoring paging and order.
    pub fn count(mut self) -> Result<u64> {
        self.check()?;
        let parameter = Parameter::Object(self.criteria.clone());
        Ok(self
            .session
            .select_value::<u64>(&self.count_statement, &parameter)?
            .unwrap_or(0))
    }
}
