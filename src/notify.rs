//! Change notifications - emitted after every successful write
//!
//! Each change is addressed by a URI:
//! - `content://<authority>/<table>/<id>` for primary tables
//! - `content://<authority>/fts/<table>/<id>` for full-text tables
//!
//! The id segment is omitted when a change is not about a single row.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// Which family of tables a change touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// A model's primary table
    Standard,
    /// A full-text shadow table
    FullText,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Standard => "standard",
            ResourceKind::FullText => "full-text",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Address of a changed table or row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChangeUri {
    pub authority: String,
    pub resource: ResourceKind,
    pub table: String,
    pub id: Option<i64>,
}

impl ChangeUri {
    pub fn new(authority: impl Into<String>, resource: ResourceKind, table: impl Into<String>, id: Option<i64>) -> Self {
        Self {
            authority: authority.into(),
            resource,
            table: table.into(),
            id,
        }
    }

    /// Parse a URI string into a ChangeUri
    pub fn parse(uri: &str) -> Result<Self> {
        let rest = uri
            .strip_prefix("content://")
            .ok_or_else(|| Error::InvalidUri("URI must start with content://".to_string()))?;

        let mut segments = rest.split('/');
        let authority = segments
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::InvalidUri("URI must name an authority".to_string()))?;
        let segments: Vec<&str> = segments.collect();

        // `fts/<n>` is table `fts` row `n`; table names never start with a digit
        let (resource, segments) = match segments.as_slice() {
            ["fts", table, rest @ ..] if table.parse::<i64>().is_err() => (ResourceKind::FullText, {
                let mut v = vec![*table];
                v.extend_from_slice(rest);
                v
            }),
            other => (ResourceKind::Standard, other.to_vec()),
        };

        let (table, id) = match segments.as_slice() {
            [table] if !table.is_empty() => (*table, None),
            [table, id] if !table.is_empty() => {
                let id = id
                    .parse::<i64>()
                    .map_err(|_| Error::InvalidUri(format!("Invalid row id: {}", id)))?;
                (*table, Some(id))
            }
            _ => return Err(Error::InvalidUri(format!("URI must be <table>[/<id>]: {}", uri))),
        };

        Ok(Self::new(authority, resource, table, id))
    }

    /// Convert to URI string
    pub fn to_uri_string(&self) -> String {
        let prefix = match self.resource {
            ResourceKind::Standard => "",
            ResourceKind::FullText => "fts/",
        };
        match self.id {
            Some(id) => format!("content://{}/{}{}/{}", self.authority, prefix, self.table, id),
            None => format!("content://{}/{}{}", self.authority, prefix, self.table),
        }
    }
}

impl fmt::Display for ChangeUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_uri_string())
    }
}

impl FromStr for ChangeUri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// A single change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub uri: ChangeUri,
    /// Simple name of the model or shadow type
    pub model_type: &'static str,
}

impl Change {
    pub fn resource(&self) -> ResourceKind {
        self.uri.resource
    }

    pub fn id(&self) -> Option<i64> {
        self.uri.id
    }
}

/// Receives changes after the write has reached the store.
pub trait ChangeObserver: Send + Sync {
    fn on_change(&self, change: &Change);
}

impl<F> ChangeObserver for F
where
    F: Fn(&Change) + Send + Sync,
{
    fn on_change(&self, change: &Change) {
        self(change)
    }
}

/// Fans changes out to registered observers.
pub struct Notifier {
    authority: String,
    observers: RwLock<Vec<Arc<dyn ChangeObserver>>>,
}

impl Notifier {
    pub fn new(authority: impl Into<String>) -> Self {
        Self {
            authority: authority.into(),
            observers: RwLock::new(Vec::new()),
        }
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }

    pub fn subscribe(&self, observer: Arc<dyn ChangeObserver>) {
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    pub fn notify(&self, resource: ResourceKind, model_type: &'static str, table: &str, id: Option<i64>) {
        let change = Change {
            uri: ChangeUri::new(&self.authority, resource, table, id),
            model_type,
        };
        tracing::debug!("Change {}", change.uri);

        let observers = self.observers.read().unwrap_or_else(PoisonError::into_inner);
        for observer in observers.iter() {
            observer.on_change(&change);
        }
    }
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.observers.read().map(|o| o.len()).unwrap_or(0);
        f.debug_struct("Notifier")
            .field("authority", &self.authority)
            .field("observers", &count)
            .finish()
    }
}

/// Observer that keeps every change it sees.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    changes: Mutex<Vec<Change>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn changes(&self) -> Vec<Change> {
        self.changes.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn take(&self) -> Vec<Change> {
        std::mem::take(&mut *self.changes.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl ChangeObserver for RecordingObserver {
    fn on_change(&self, change: &Change) {
        self.changes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(change.clone());
    }
}
