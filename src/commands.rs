use crate::{OutputMode, emit_success};
use rowmap::config::{self, RowmapConfig};
use rowmap::storage::{Query, RowStore, SqliteStore, TableSummary, quote_ident};
use rowmap::{ResourceKind, Value};
use std::path::Path;

const DEFAULT_DATABASE: &str = ".rowmap/rowmap.db";

fn config_base(config_path: &Path) -> &Path {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// Open the store named on the command line or in the config file
pub fn open_store(config_path: &Path, database: Option<&Path>, verbose: bool) -> anyhow::Result<SqliteStore> {
    let config = config::load_config(Some(config_path))?.unwrap_or_default();
    let path = match database {
        Some(db) => db.to_path_buf(),
        None => config.database_path(config_base(config_path)),
    };
    if !path.exists() {
        anyhow::bail!("no database at {} (run `rowmap init` or pass --database)", path.display());
    }

    tracing::debug!("Opening {}", path.display());
    let log_sql = verbose || config.log_sql.unwrap_or(false);
    Ok(SqliteStore::open(&path)?.with_sql_logging(log_sql))
}

pub fn run_init(
    output_mode: OutputMode,
    config_path: &Path,
    database: Option<&Path>,
    authority: Option<String>,
    force: bool,
) -> anyhow::Result<()> {
    let config = RowmapConfig {
        database: Some(
            database
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_else(|| DEFAULT_DATABASE.to_string()),
        ),
        authority: Some(authority.unwrap_or_else(|| rowmap::database::DEFAULT_AUTHORITY.to_string())),
        log_sql: Some(false),
    };
    config::write_config(config_path, &config, force)?;

    let db_path = config.database_path(config_base(config_path));
    config::ensure_db_dir(&db_path)?;
    SqliteStore::open(&db_path)?;

    if output_mode.is_human() {
        println!("Wrote {}", config_path.display());
        println!("Database: {}", db_path.display());
    } else {
        let data = serde_json::json!({
            "config": config_path.display().to_string(),
            "database": db_path.display().to_string(),
            "authority": config.authority,
        });
        emit_success("init", data)?;
    }
    Ok(())
}

pub fn run_tables(output_mode: OutputMode, store: &SqliteStore) -> anyhow::Result<()> {
    let stats = store.stats()?;
    if output_mode.is_human() {
        if stats.tables.is_empty() {
            println!("No tables.");
        } else {
            println!("{}", rowmap::ui::tables_table(&stats.tables));
            println!("Total rows: {}", stats.total_rows());
        }
    } else {
        emit_success("tables", serde_json::to_value(&stats)?)?;
    }
    Ok(())
}

fn find_table(store: &SqliteStore, table: &str) -> anyhow::Result<TableSummary> {
    store
        .tables()?
        .into_iter()
        .find(|t| t.name.eq_ignore_ascii_case(table))
        .ok_or_else(|| anyhow::anyhow!("no table named {}", table))
}

pub fn run_count(output_mode: OutputMode, store: &SqliteStore, table: &str) -> anyhow::Result<()> {
    let summary = find_table(store, table)?;
    if output_mode.is_human() {
        println!("{}: {}", summary.name, summary.rows);
    } else {
        emit_success("count", serde_json::to_value(&summary)?)?;
    }
    Ok(())
}

pub fn run_search(
    output_mode: OutputMode,
    store: &SqliteStore,
    table: &str,
    query: &str,
    limit: usize,
) -> anyhow::Result<()> {
    let summary = find_table(store, table)?;
    if summary.resource != ResourceKind::FullText {
        anyhow::bail!("{} is not a full-text table", summary.name);
    }

    let columns = store.columns(&summary.name)?;
    let select = Query::from(summary.name.as_str())
        .columns(std::iter::once("docid".to_string()).chain(columns.iter().cloned()))
        .filter(format!("{} MATCH ?", quote_ident(&summary.name)), [Value::from(query)])
        .limit(limit);
    let rows = store.select(&select)?;

    if output_mode.is_human() {
        if rows.is_empty() {
            println!("No matches.");
        }
        for row in &rows {
            let docid = row.get("docid").map(Value::to_string).unwrap_or_default();
            println!("- docid {}", docid);
            for column in &columns {
                if let Some(value) = row.get(column) {
                    println!("  {}: {}", column, value);
                }
            }
        }
    } else {
        let hits: Vec<serde_json::Value> = rows
            .iter()
            .map(|row| {
                let fields: serde_json::Map<String, serde_json::Value> = row
                    .iter()
                    .map(|(name, value)| (name.to_string(), serde_json::json!(value.to_text())))
                    .collect();
                serde_json::Value::Object(fields)
            })
            .collect();
        let data = serde_json::json!({
            "table": summary.name,
            "query": query,
            "hits": hits,
        });
        emit_success("search", data)?;
    }
    Ok(())
}
