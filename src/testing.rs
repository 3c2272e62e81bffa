//! Shared test fixtures

use crate::Result;
use crate::storage::{Query, Row, RowStore, SqliteStore};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Captures formatted tracing output for assertions.
#[derive(Clone, Default)]
pub(crate) struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    pub(crate) fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }

    pub(crate) fn capture<R>(&self, f: impl FnOnce() -> R) -> R {
        let writer = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        tracing::subscriber::with_default(subscriber, f)
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// In-memory SQLite store that counts SELECTs and upserts.
pub(crate) struct CountingStore {
    inner: SqliteStore,
    selects: Arc<AtomicUsize>,
    replaces: Arc<AtomicUsize>,
}

#[derive(Clone)]
pub(crate) struct Counters {
    selects: Arc<AtomicUsize>,
    replaces: Arc<AtomicUsize>,
}

impl Counters {
    pub(crate) fn selects(&self) -> usize {
        self.selects.load(Ordering::SeqCst)
    }

    pub(crate) fn replaces(&self) -> usize {
        self.replaces.load(Ordering::SeqCst)
    }
}

impl CountingStore {
    pub(crate) fn new() -> (Self, Counters) {
        let selects = Arc::new(AtomicUsize::new(0));
        let replaces = Arc::new(AtomicUsize::new(0));
        let store = Self {
            inner: SqliteStore::open_in_memory().unwrap(),
            selects: Arc::clone(&selects),
            replaces: Arc::clone(&replaces),
        };
        (store, Counters { selects, replaces })
    }
}

impl RowStore for CountingStore {
    fn replace(&self, table: &str, row: &Row) -> Result<i64> {
        self.replaces.fetch_add(1, Ordering::SeqCst);
        self.inner.replace(table, row)
    }

    fn select(&self, query: &Query) -> Result<Vec<Row>> {
        self.selects.fetch_add(1, Ordering::SeqCst);
        self.inner.select(query)
    }

    fn delete(&self, table: &str, key_column: &str, key: i64) -> Result<usize> {
        self.inner.delete(table, key_column, key)
    }

    fn execute_batch(&self, sql: &str) -> Result<()> {
        self.inner.execute_batch(sql)
    }

    fn count(&self, table: &str) -> Result<usize> {
        self.inner.count(table)
    }
}
