//! Storage Layer - the row store behind the mapper
//!
//! The mapper only needs three things from a store:
//! - upsert a flat row into a table (`INSERT OR REPLACE`)
//! - select rows with a predicate
//! - delete a row by key
//!
//! [`SqliteStore`] is the rusqlite-backed implementation.

pub mod schema;
pub mod sqlite;

pub use sqlite::{SqliteStore, DbStats, TableSummary};

use crate::Result;
use crate::value::Value;
use std::fmt;

/// A flat column -> value mapping, in column order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<(String, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `column`, replacing an earlier value in place.
    pub fn put(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        let column = column.into();
        let value = value.into();
        match self.columns.iter_mut().find(|(c, _)| c.eq_ignore_ascii_case(&column)) {
            Some(slot) => slot.1 = value,
            None => self.columns.push((column, value)),
        }
    }

    pub fn put_null(&mut self, column: impl Into<String>) {
        self.put(column, Value::Null);
    }

    /// Value stored under `column` (case-insensitive, like SQLite).
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(c, _)| c.eq_ignore_ascii_case(column))
            .map(|(_, v)| v)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.get(column).is_some()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(c, _)| c.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(|(c, v)| (c.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl<C: Into<String>, V: Into<Value>> FromIterator<(C, V)> for Row {
    fn from_iter<I: IntoIterator<Item = (C, V)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (column, value) in iter {
            row.put(column, value);
        }
        row
    }
}

/// A SELECT against one table.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub table: String,
    /// Columns to return; `None` selects `*`
    pub columns: Option<Vec<String>>,
    /// SQL predicate with `?` placeholders
    pub predicate: Option<String>,
    pub params: Vec<Value>,
    pub order_by: Option<String>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn from(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: None,
            predicate: None,
            params: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn filter<I>(mut self, predicate: impl Into<String>, params: I) -> Self
    where
        I: IntoIterator<Item = Value>,
    {
        self.predicate = Some(predicate.into());
        self.params = params.into_iter().collect();
        self
    }

    pub fn order_by(mut self, order: impl Into<String>) -> Self {
        self.order_by = Some(order.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Render the statement; placeholders stay in the predicate.
    pub fn to_sql(&self) -> String {
        let columns = match &self.columns {
            Some(cols) => cols.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", "),
            None => "*".to_string(),
        };
        let mut sql = format!("SELECT {} FROM {}", columns, quote_ident(&self.table));
        if let Some(predicate) = &self.predicate {
            sql.push_str(" WHERE ");
            sql.push_str(predicate);
        }
        if let Some(order) = &self.order_by {
            sql.push_str(" ORDER BY ");
            sql.push_str(order);
        }
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        sql
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_sql())
    }
}

/// Quote an identifier for SQLite.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// The row store the mapper writes through.
///
/// Implementations report failures unchanged; the mapper adds no retries.
pub trait RowStore: Send {
    /// Insert `row`, overwriting any row with the same key. Returns the rowid
    /// of the written row.
    fn replace(&self, table: &str, row: &Row) -> Result<i64>;

    fn select(&self, query: &Query) -> Result<Vec<Row>>;

    /// Delete rows whose `key_column` equals `key`; returns how many went.
    fn delete(&self, table: &str, key_column: &str, key: i64) -> Result<usize>;

    /// Run a schema statement.
    fn execute_batch(&self, sql: &str) -> Result<()>;

    fn count(&self, table: &str) -> Result<usize>;
}
