//! SQLite storage implementation

use super::schema::{FTS_SHADOW_SUFFIXES, LIST_TABLES};
use super::{Query, Row, RowStore, quote_ident};
use crate::Result;
use crate::notify::ResourceKind;
use crate::value::Value;
use rusqlite::{Connection, params_from_iter};
use serde::Serialize;
use std::path::Path;

/// SQLite-backed row store
pub struct SqliteStore {
    conn: Connection,
    log_sql: bool,
}

impl SqliteStore {
    /// Open a database file (creates if doesn't exist)
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Ok(Self { conn, log_sql: false })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self { conn, log_sql: false })
    }

    /// Log every statement at debug level
    pub fn with_sql_logging(mut self, enabled: bool) -> Self {
        self.log_sql = enabled;
        self
    }

    fn trace(&self, sql: &str, params: &[Value]) {
        if self.log_sql {
            tracing::debug!("SQL: {} {:?}", sql, params);
        }
    }

    /// User tables with their kind and row counts, fts bookkeeping excluded
    pub fn tables(&self) -> Result<Vec<TableSummary>> {
        let mut stmt = self.conn.prepare(LIST_TABLES)?;
        let listed = stmt
            .query_map([], |row| {
                let name: String = row.get(0)?;
                let sql: Option<String> = row.get(1)?;
                Ok((name, sql.unwrap_or_default()))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let virtual_tables: Vec<&str> = listed
            .iter()
            .filter(|(_, sql)| sql.to_ascii_uppercase().starts_with("CREATE VIRTUAL TABLE"))
            .map(|(name, _)| name.as_str())
            .collect();

        let is_bookkeeping = |name: &str| {
            virtual_tables.iter().any(|vt| {
                FTS_SHADOW_SUFFIXES
                    .iter()
                    .any(|suffix| name.eq_ignore_ascii_case(&format!("{}{}", vt, suffix)))
            })
        };

        let mut summaries = Vec::new();
        for (name, _) in listed.iter().filter(|(name, _)| !is_bookkeeping(name)) {
            let resource = if virtual_tables.contains(&name.as_str()) {
                ResourceKind::FullText
            } else {
                ResourceKind::Standard
            };
            summaries.push(TableSummary {
                name: name.clone(),
                resource,
                rows: self.count(name)?,
            });
        }
        Ok(summaries)
    }

    /// Declared column names of `table`, in order
    pub fn columns(&self, table: &str) -> Result<Vec<String>> {
        let sql = format!("PRAGMA table_info({})", quote_ident(table));
        let mut stmt = self.conn.prepare(&sql)?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(names)
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats> {
        Ok(DbStats {
            tables: self.tables()?,
        })
    }
}

impl RowStore for SqliteStore {
    fn replace(&self, table: &str, row: &Row) -> Result<i64> {
        let columns = row.column_names().map(quote_ident).collect::<Vec<_>>();
        let placeholders = (1..=columns.len()).map(|i| format!("?{}", i)).collect::<Vec<_>>();
        let sql = format!(
            "INSERT OR REPLACE INTO {} ({}) VALUES ({})",
            quote_ident(table),
            columns.join(", "),
            placeholders.join(", ")
        );
        let values = row.iter().map(|(_, v)| v.clone()).collect::<Vec<_>>();
        self.trace(&sql, &values);

        self.conn.execute(&sql, params_from_iter(values.iter()))?;
        Ok(self.conn.last_insert_rowid())
    }

    fn select(&self, query: &Query) -> Result<Vec<Row>> {
        let sql = query.to_sql();
        self.trace(&sql, &query.params);

        let mut stmt = self.conn.prepare(&sql)?;
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

        let rows = stmt
            .query_map(params_from_iter(query.params.iter()), |r| {
                let mut row = Row::new();
                for (i, name) in names.iter().enumerate() {
                    row.put(name.as_str(), r.get::<_, Value>(i)?);
                }
                Ok(row)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(rows)
    }

    fn delete(&self, table: &str, key_column: &str, key: i64) -> Result<usize> {
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?1",
            quote_ident(table),
            quote_ident(key_column)
        );
        self.trace(&sql, &[Value::Integer(key)]);
        Ok(self.conn.execute(&sql, [key])?)
    }

    fn execute_batch(&self, sql: &str) -> Result<()> {
        self.trace(sql, &[]);
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    fn count(&self, table: &str) -> Result<usize> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
        let count: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

/// One table as seen by [`SqliteStore::tables`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableSummary {
    pub name: String,
    pub resource: ResourceKind,
    pub rows: usize,
}

/// Database statistics
#[derive(Debug, Clone, Serialize)]
pub struct DbStats {
    pub tables: Vec<TableSummary>,
}

impl DbStats {
    pub fn total_rows(&self) -> usize {
        self.tables.iter().map(|t| t.rows).sum()
    }
}

impl std::fmt::Display for DbStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Database Statistics:")?;
        for table in &self.tables {
            writeln!(f, "  {} ({}): {}", table.name, table.resource, table.rows)?;
        }
        write!(f, "  Total rows: {}", self.total_rows())
    }
}
