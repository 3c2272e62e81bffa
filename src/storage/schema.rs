//! Table definitions derived from descriptors
//!
//! Tables are only ever created, never altered.

use super::quote_ident;
use crate::codec::FieldCodec;
use crate::notify::ResourceKind;
use crate::schema::TableInfo;

/// `CREATE TABLE` / `CREATE VIRTUAL TABLE` statement for a descriptor.
pub fn create_table_sql<M: 'static>(info: &TableInfo<M>, codec: &FieldCodec<'_>) -> String {
    match info.resource() {
        ResourceKind::Standard => {
            let mut columns = vec![format!(
                "{} INTEGER PRIMARY KEY AUTOINCREMENT",
                quote_ident(info.id_column())
            )];
            columns.extend(info.fields().iter().map(|field| {
                format!(
                    "{} {}",
                    quote_ident(field.column_name()),
                    field.storage_kind(codec).sql_type()
                )
            }));
            format!(
                "CREATE TABLE IF NOT EXISTS {} ({})",
                quote_ident(info.table_name()),
                columns.join(", ")
            )
        }
        // fts4 keys rows on its implicit docid; columns are untyped
        ResourceKind::FullText => {
            let columns = info
                .fields()
                .iter()
                .map(|field| quote_ident(field.column_name()))
                .collect::<Vec<_>>();
            format!(
                "CREATE VIRTUAL TABLE IF NOT EXISTS {} USING fts4({})",
                quote_ident(info.table_name()),
                columns.join(", ")
            )
        }
    }
}

/// Suffixes of the bookkeeping tables fts4 creates next to a virtual table.
pub const FTS_SHADOW_SUFFIXES: &[&str] = &["_content", "_segments", "_segdir", "_docsize", "_stat"];

/// Lists user tables with the SQL that created them.
pub const LIST_TABLES: &str =
    "SELECT name, sql FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name";
