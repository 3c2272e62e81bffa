//! # Rowmap - model-to-row mapping over SQLite
//!
//! Binds plain Rust structs to rows of a relational store.
//!
//! Rowmap provides:
//! - Schema descriptors built once per model type and cached in a registry
//! - A field codec with pluggable per-type serializers
//! - Upsert-by-identity persistence with row-id based equality and hashing
//! - Lazily loaded one-to-many associations
//! - Full-text shadow tables keyed one-to-one with their owner rows
//! - Change notifications addressed by `content://` URIs

pub mod value;
pub mod codec;
pub mod identity;
pub mod model;
pub mod schema;
pub mod registry;
pub mod storage;
pub mod notify;
pub mod mapper;
pub mod database;
pub mod association;
pub mod fulltext;
pub mod config;
pub mod ui;

#[cfg(test)]
mod testing;

// Re-exports for convenient access
pub use association::HasMany;
pub use codec::{FieldType, SerializerRegistry, TypeSerializer};
pub use database::Database;
pub use fulltext::FullTextModel;
pub use identity::Identity;
pub use model::{Describe, Model};
pub use notify::{Change, ChangeObserver, ChangeUri, ResourceKind};
pub use schema::{SchemaBuilder, TableInfo};
pub use storage::{Query, Row, RowStore, SqliteStore};
pub use value::{Value, ValueKind};

#[doc(hidden)]
pub use serde_json as __serde_json;
#[doc(hidden)]
pub use tracing as __tracing;

/// Result type alias for Rowmap operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Rowmap operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Cannot decode {column}: {message}")]
    Decode { column: String, message: String },

    #[error("Cannot read field {field}: {message}")]
    FieldAccess { field: String, message: String },

    #[error("Not saved: {0}")]
    Unsaved(String),

    #[error("Identity already set to {existing}, refusing {attempted}")]
    IdentityConflict { existing: i64, attempted: i64 },

    #[error("Index {index} out of bounds for length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("Invalid URI: {0}")]
    InvalidUri(String),

    #[error("Not found: {0}")]
    NotFound(String),
}
