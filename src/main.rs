//! Rowmap CLI - inspect databases written by rowmap models

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "rowmap")]
#[command(version)]
#[command(about = "Inspect model tables and full-text shadows in a rowmap database")]
#[command(long_about = r#"
Rowmap maps Rust models onto SQLite tables. This tool looks at the result:
  • list primary and full-text tables with their row counts
  • count rows in one table
  • run full-text queries against a shadow table

Example usage:
  rowmap init
  rowmap tables
  rowmap search --table NoteText --query "quarterly report"
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value = "text")]
    format: OutputMode,

    /// Path to the config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Path to the database file (overrides the config)
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a rowmap.toml with default settings
    Init {
        /// Overwrite an existing config
        #[arg(long)]
        force: bool,

        /// Authority used in change URIs
        #[arg(long)]
        authority: Option<String>,
    },

    /// List tables with their kind and row counts
    Tables,

    /// Count rows in a table
    Count {
        #[arg(short, long)]
        table: String,
    },

    /// Run a full-text query against a shadow table
    Search {
        /// Full-text table name
        #[arg(short, long)]
        table: String,

        /// fts MATCH expression
        #[arg(short, long)]
        query: String,

        /// Maximum number of results
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputMode {
    Text,
    Json,
}

impl OutputMode {
    pub fn is_human(&self) -> bool {
        matches!(self, OutputMode::Text)
    }
}

/// Print a JSON envelope for `command`
pub fn emit_success(command: &str, data: serde_json::Value) -> anyhow::Result<()> {
    let envelope = serde_json::json!({
        "command": command,
        "ok": true,
        "data": data,
    });
    println!("{}", serde_json::to_string_pretty(&envelope)?);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(rowmap::config::default_config_path);

    match cli.command {
        Commands::Init { force, authority } => {
            commands::run_init(cli.format, &config_path, cli.database.as_deref(), authority, force)
        }
        Commands::Tables => {
            let store = commands::open_store(&config_path, cli.database.as_deref(), cli.verbose)?;
            commands::run_tables(cli.format, &store)
        }
        Commands::Count { table } => {
            let store = commands::open_store(&config_path, cli.database.as_deref(), cli.verbose)?;
            commands::run_count(cli.format, &store, &table)
        }
        Commands::Search { table, query, limit } => {
            let store = commands::open_store(&config_path, cli.database.as_deref(), cli.verbose)?;
            commands::run_search(cli.format, &store, &table, &query, limit)
        }
    }
}
