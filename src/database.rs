//! Database - persistence entry point
//!
//! Owns the row store, the serializer registry, the descriptor registry and
//! the change notifier, and drives the row mapper for every operation.
//! Cloning a `Database` is cheap and shares all of them.
//!
//! Calls are synchronous and go to the store one statement at a time; the
//! store itself is behind a mutex.

use crate::codec::{FieldCodec, SerializerRegistry};
use crate::config::RowmapConfig;
use crate::fulltext::FullTextModel;
use crate::mapper::RowMapper;
use crate::model::{Model, simple_type_name};
use crate::notify::{ChangeObserver, Notifier, ResourceKind};
use crate::registry::SchemaRegistry;
use crate::schema::TableInfo;
use crate::storage::schema::create_table_sql;
use crate::storage::{Query, Row, RowStore, SqliteStore, quote_ident};
use crate::value::Value;
use crate::{Error, Result};
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Authority used in change URIs when none is configured.
pub const DEFAULT_AUTHORITY: &str = "rowmap";

struct Inner {
    store: Mutex<Box<dyn RowStore>>,
    serializers: SerializerRegistry,
    schemas: SchemaRegistry,
    notifier: Notifier,
}

/// Handle on a row store plus everything needed to map models onto it.
#[derive(Clone)]
pub struct Database {
    inner: Arc<Inner>,
}

/// Builder for [`Database`]
pub struct DatabaseBuilder {
    store: Box<dyn RowStore>,
    serializers: SerializerRegistry,
    authority: String,
}

impl DatabaseBuilder {
    /// Replace the serializer registry (defaults to the built-ins)
    pub fn serializers(mut self, serializers: SerializerRegistry) -> Self {
        self.serializers = serializers;
        self
    }

    pub fn authority(mut self, authority: impl Into<String>) -> Self {
        self.authority = authority.into();
        self
    }

    pub fn build(self) -> Database {
        Database {
            inner: Arc::new(Inner {
                store: Mutex::new(self.store),
                serializers: self.serializers,
                schemas: SchemaRegistry::new(),
                notifier: Notifier::new(self.authority),
            }),
        }
    }
}

impl Database {
    pub fn builder(store: impl RowStore + 'static) -> DatabaseBuilder {
        DatabaseBuilder {
            store: Box::new(store),
            serializers: SerializerRegistry::with_defaults(),
            authority: DEFAULT_AUTHORITY.to_string(),
        }
    }

    pub fn new(store: impl RowStore + 'static) -> Self {
        Self::builder(store).build()
    }

    /// Open a database file with default settings
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(SqliteStore::open(path)?))
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(SqliteStore::open_in_memory()?))
    }

    /// Open the database a config file points at
    pub fn from_config(config: &RowmapConfig, base: &Path) -> Result<Self> {
        config.validate()?;
        let path = config.database_path(base);
        crate::config::ensure_db_dir(&path)?;
        let store = SqliteStore::open(&path)?.with_sql_logging(config.log_sql.unwrap_or(false));
        Ok(Self::builder(store)
            .authority(config.authority.as_deref().unwrap_or(DEFAULT_AUTHORITY))
            .build())
    }

    pub fn subscribe(&self, observer: Arc<dyn ChangeObserver>) {
        self.inner.notifier.subscribe(observer);
    }

    pub fn schemas(&self) -> &SchemaRegistry {
        &self.inner.schemas
    }

    pub fn serializers(&self) -> &SerializerRegistry {
        &self.inner.serializers
    }

    fn codec(&self) -> FieldCodec<'_> {
        FieldCodec::new(&self.inner.serializers)
    }

    fn store(&self) -> MutexGuard<'_, Box<dyn RowStore>> {
        self.inner.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run raw schema SQL against the store
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.store().execute_batch(sql)
    }

    // ========== Schema ==========

    /// Create the primary table of `M` if it does not exist
    pub fn create_table<M: Model>(&self) -> Result<()> {
        let info = self.inner.schemas.table_info::<M>()?;
        self.store().execute_batch(&create_table_sql(&info, &self.codec()))
    }

    /// Create the fts table of `S` if it does not exist
    pub fn create_full_text_table<S: FullTextModel>(&self) -> Result<()> {
        let info = self.inner.schemas.full_text_info::<S>()?;
        self.store().execute_batch(&create_table_sql(&info, &self.codec()))
    }

    // ========== Models ==========

    /// Upsert `model` and return its id, assigning one on first save.
    pub fn save<M: Model>(&self, model: &mut M) -> Result<i64> {
        let info = self.inner.schemas.table_info::<M>()?;
        model.before_save();

        let row = RowMapper::new(&info, self.codec()).to_row(model);
        let id = self.store().replace(info.table_name(), &row)?;
        model.identity().assign(id)?;

        self.inner
            .notifier
            .notify(ResourceKind::Standard, info.type_name(), info.table_name(), Some(id));
        Ok(id)
    }

    /// Load the row with identity `id`
    pub fn load<M: Model>(&self, id: i64) -> Result<Option<M>> {
        let info = self.inner.schemas.table_info::<M>()?;
        let query = Query::from(info.table_name())
            .filter(format!("{} = ?", quote_ident(info.id_column())), [Value::Integer(id)])
            .limit(1);
        let rows = self.store().select(&query)?;
        rows.first().map(|row| self.materialize(&info, row)).transpose()
    }

    /// Like [`Database::load`], but a missing row is an error
    pub fn get<M: Model>(&self, id: i64) -> Result<M> {
        self.load(id)?
            .ok_or_else(|| Error::NotFound(format!("{} {}", M::table_name(), id)))
    }

    /// Rows of `M` matching a SQL predicate with `?` placeholders
    pub fn find<M: Model>(&self, predicate: &str, params: impl IntoIterator<Item = Value>) -> Result<Vec<M>> {
        let info = self.inner.schemas.table_info::<M>()?;
        self.fetch(&info, Query::from(info.table_name()).filter(predicate, params))
    }

    /// Rows of `M` whose `column` equals `value`
    pub fn find_by<M: Model>(&self, column: &str, value: impl Into<Value>) -> Result<Vec<M>> {
        let info = self.inner.schemas.table_info::<M>()?;
        let predicate = format!("{}.{} = ?", quote_ident(info.table_name()), quote_ident(column));
        self.fetch(&info, Query::from(info.table_name()).filter(predicate, [value.into()]))
    }

    pub fn all<M: Model>(&self) -> Result<Vec<M>> {
        let info = self.inner.schemas.table_info::<M>()?;
        self.fetch(&info, Query::from(info.table_name()))
    }

    /// Run a prepared query against `M`'s table
    pub fn query<M: Model>(&self, query: Query) -> Result<Vec<M>> {
        let info = self.inner.schemas.table_info::<M>()?;
        self.fetch(&info, query)
    }

    pub fn count<M: Model>(&self) -> Result<usize> {
        let info = self.inner.schemas.table_info::<M>()?;
        self.store().count(info.table_name())
    }

    /// Delete `model`'s row. Its full-text shadow rows are left alone.
    pub fn delete<M: Model>(&self, model: &M) -> Result<bool> {
        let info = self.inner.schemas.table_info::<M>()?;
        let id = model
            .id()
            .ok_or_else(|| Error::Unsaved(format!("cannot delete an unsaved {}", info.type_name())))?;

        let removed = self.store().delete(info.table_name(), info.id_column(), id)?;
        if removed > 0 {
            self.inner
                .notifier
                .notify(ResourceKind::Standard, info.type_name(), info.table_name(), Some(id));
        }
        Ok(removed > 0)
    }

    fn fetch<M: Model>(&self, info: &TableInfo<M>, query: Query) -> Result<Vec<M>> {
        let rows = self.store().select(&query)?;
        rows.iter().map(|row| self.materialize(info, row)).collect()
    }

    fn materialize<M: Model>(&self, info: &TableInfo<M>, row: &Row) -> Result<M> {
        let mapper = RowMapper::new(info, self.codec());
        let mut model = M::default();
        mapper.apply(&mut model, row)?;
        if let Some(id) = mapper.row_id(row) {
            model.identity().assign(id)?;
        }
        Ok(model)
    }

    // ========== Full-text shadows ==========

    /// Upsert `shadow` into its fts table under the owner's id.
    pub fn save_full_text<S: FullTextModel>(&self, shadow: &mut S) -> Result<i64> {
        let info = self.inner.schemas.full_text_info::<S>()?;
        shadow.before_save();

        let docid = shadow.docid().ok_or_else(|| {
            Error::Unsaved(format!(
                "{} needs a saved {} to key on",
                info.type_name(),
                simple_type_name::<S::Owner>()
            ))
        })?;

        let row = RowMapper::new(&info, self.codec()).to_row(shadow);
        self.store().replace(info.table_name(), &row)?;

        self.inner
            .notifier
            .notify(ResourceKind::FullText, info.type_name(), info.table_name(), Some(docid));
        Ok(docid)
    }

    /// Docids whose shadow row matches an fts `MATCH` expression
    pub fn search<S: FullTextModel>(&self, expression: &str) -> Result<Vec<i64>> {
        let info = self.inner.schemas.full_text_info::<S>()?;
        let query = Query::from(info.table_name())
            .columns([info.id_column()])
            .filter(format!("{} MATCH ?", quote_ident(info.table_name())), [Value::from(expression)]);
        let rows = self.store().select(&query)?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get(info.id_column()).and_then(Value::as_i64))
            .collect())
    }

    /// Owners of the shadow rows matching `expression`, skipping owners that no longer exist
    pub fn search_owners<S: FullTextModel>(&self, expression: &str) -> Result<Vec<S::Owner>> {
        let mut owners = Vec::new();
        for docid in self.search::<S>(expression)? {
            if let Some(owner) = self.load::<S::Owner>(docid)? {
                owners.push(owner);
            }
        }
        Ok(owners)
    }

    /// Remove the shadow row keyed on `docid`
    pub fn delete_full_text<S: FullTextModel>(&self, docid: i64) -> Result<bool> {
        let info = self.inner.schemas.full_text_info::<S>()?;
        let removed = self.store().delete(info.table_name(), info.id_column(), docid)?;
        if removed > 0 {
            self.inner
                .notifier
                .notify(ResourceKind::FullText, info.type_name(), info.table_name(), Some(docid));
        }
        Ok(removed > 0)
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("serializers", &self.inner.serializers)
            .field("schemas", &self.inner.schemas)
            .field("notifier", &self.inner.notifier)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{JsonSerializer, TypeSerializer};
    use crate::identity::Identity;
    use crate::model::Describe;
    use crate::notify::RecordingObserver;
    use crate::schema::SchemaBuilder;
    use crate::testing::{CountingStore, LogCapture};
    use crate::value::ValueKind;
    use serde::{Deserialize, Serialize};
    use std::path::PathBuf;
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    #[derive(Debug, Clone, Copy, PartialEq, Default)]
    enum Priority {
        #[default]
        Low,
        High,
    }

    crate::enum_field!(Priority { Low, High });

    #[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
    struct Meta {
        tags: Vec<String>,
        pinned: bool,
    }

    crate::json_field!(Meta);

    #[derive(Debug, Default, Clone)]
    struct Note {
        identity: Identity,
        title: String,
        body: Option<String>,
        priority: Priority,
        archived: bool,
        attachment: Option<PathBuf>,
        created: Option<SystemTime>,
        elapsed: Option<Duration>,
        meta: Meta,
        summary: String,
    }

    impl Describe for Note {
        fn describe(schema: &mut SchemaBuilder<Self>) {
            schema.field("title", |n: &Note| &n.title, |n, v| n.title = v);
            schema.optional("body", |n: &Note| n.body.as_ref(), |n, v| n.body = v);
            schema.field("priority", |n: &Note| &n.priority, |n, v| n.priority = v);
            schema.field("archived", |n: &Note| &n.archived, |n, v| n.archived = v);
            schema.optional("attachment", |n: &Note| n.attachment.as_ref(), |n, v| n.attachment = v);
            schema.optional("created", |n: &Note| n.created.as_ref(), |n, v| n.created = v);
            schema.optional("elapsed", |n: &Note| n.elapsed.as_ref(), |n, v| n.elapsed = v);
            schema.field("meta", |n: &Note| &n.meta, |n, v| n.meta = v);
            schema.field("summary", |n: &Note| &n.summary, |n, v| n.summary = v);
        }
    }

    impl Model for Note {
        const TABLE: Option<&'static str> = Some("Notes");

        fn identity(&self) -> &Identity {
            &self.identity
        }

        fn before_save(&mut self) {
            self.summary = self.title.chars().take(8).collect();
        }
    }

    crate::impl_row_identity!(Note);

    struct NoteText {
        note: Note,
        content: String,
        stale: String,
    }

    impl NoteText {
        fn new(note: &Note) -> Self {
            Self {
                note: note.clone(),
                content: String::new(),
                stale: "not indexed".into(),
            }
        }
    }

    impl Describe for NoteText {
        fn describe(schema: &mut SchemaBuilder<Self>) {
            schema
                .field("content", |t: &NoteText| &t.content, |t, v| t.content = v)
                .full_text_as("text");
            schema.field("stale", |t: &NoteText| &t.stale, |t, v| t.stale = v);
        }
    }

    impl FullTextModel for NoteText {
        type Owner = Note;

        fn owner(&self) -> &Note {
            &self.note
        }

        fn before_save(&mut self) {
            let body = self.note.body.clone().unwrap_or_default();
            self.content = format!("{} {}", self.note.title, body);
        }
    }

    fn setup() -> (Database, Arc<RecordingObserver>) {
        let mut serializers = SerializerRegistry::with_defaults();
        serializers.register(JsonSerializer::<Meta>::new());
        let db = Database::builder(SqliteStore::open_in_memory().unwrap())
            .serializers(serializers)
            .authority("notes")
            .build();
        db.create_table::<Note>().unwrap();
        db.create_full_text_table::<NoteText>().unwrap();

        let recorder = Arc::new(RecordingObserver::new());
        db.subscribe(recorder.clone());
        (db, recorder)
    }

    fn sample_note() -> Note {
        Note {
            title: "Groceries for the week".into(),
            body: Some("milk eggs bread".into()),
            priority: Priority::High,
            archived: true,
            attachment: Some(PathBuf::from("/tmp/list.txt")),
            created: Some(UNIX_EPOCH + Duration::from_millis(1_650_000_000_000)),
            elapsed: Some(Duration::from_millis(3_723_004)),
            meta: Meta {
                tags: vec!["home".into()],
                pinned: true,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_save_assigns_id_and_notifies() {
        let (db, recorder) = setup();
        let mut note = sample_note();

        let id = db.save(&mut note).unwrap();
        assert_eq!(note.id(), Some(id));
        assert_eq!(note.summary, "Grocerie");

        let changes = recorder.take();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].uri.to_uri_string(), format!("content://notes/Notes/{}", id));
        assert_eq!(changes[0].model_type, "Note");
    }

    #[test]
    fn test_round_trip_through_serializers() {
        let (db, _) = setup();
        let mut note = sample_note();
        let id = note.save(&db).unwrap();

        let loaded: Note = db.load(id).unwrap().unwrap();
        assert_eq!(loaded, note);
        assert_eq!(loaded.title, note.title);
        assert_eq!(loaded.body, note.body);
        assert_eq!(loaded.priority, note.priority);
        assert_eq!(loaded.archived, note.archived);
        assert_eq!(loaded.attachment, note.attachment);
        assert_eq!(loaded.created, note.created);
        assert_eq!(loaded.elapsed, note.elapsed);
        assert_eq!(loaded.meta, note.meta);
        assert_eq!(loaded.summary, note.summary);

        let raw = Query::from("Notes")
            .columns(["created", "elapsed"])
            .filter(format!("{} = ?", Note::ID_COLUMN), [Value::Integer(id)]);
        let stored = db.store().select(&raw).unwrap();
        assert_eq!(stored[0].get("created"), Some(&Value::Integer(1_650_000_000_000)));
        assert_eq!(stored[0].get("elapsed"), Some(&Value::Integer(3_723_004)));
    }

    #[test]
    fn test_round_trip_without_serializers() {
        let db = Database::builder(SqliteStore::open_in_memory().unwrap())
            .serializers(SerializerRegistry::new())
            .build();
        db.create_table::<Note>().unwrap();

        let mut note = sample_note();
        let id = db.save(&mut note).unwrap();

        let loaded: Note = db.get(id).unwrap();
        assert_eq!(loaded.created, note.created);
        assert_eq!(loaded.elapsed, note.elapsed);
        assert_eq!(loaded.archived, note.archived);
        assert_eq!(loaded.attachment, note.attachment);
        assert_eq!(loaded.meta, note.meta);
    }

    #[test]
    fn test_loaded_copies_are_equal_and_hash_equal() {
        let (db, _) = setup();
        let mut note = sample_note();
        let id = db.save(&mut note).unwrap();

        let a: Note = db.load(id).unwrap().unwrap();
        let b: Note = db.load(id).unwrap().unwrap();
        assert_eq!(a, b);
        assert_eq!(crate::model::row_hash(&a), crate::model::row_hash(&b));
        assert_eq!(crate::model::row_hash(&a), crate::model::row_hash(&note));
    }

    #[test]
    fn test_save_is_idempotent() {
        let (db, _) = setup();
        let mut note = sample_note();
        let first = db.save(&mut note).unwrap();
        let second = db.save(&mut note).unwrap();
        assert_eq!(first, second);
        assert_eq!(db.count::<Note>().unwrap(), 1);

        note.title = "Changed".into();
        db.save(&mut note).unwrap();
        assert_eq!(db.count::<Note>().unwrap(), 1);
        let loaded: Note = db.load(first).unwrap().unwrap();
        assert_eq!(loaded.title, "Changed");
    }

    #[test]
    fn test_find_and_delete() {
        let (db, recorder) = setup();
        let mut a = sample_note();
        let mut b = Note {
            title: "Call mom".into(),
            ..Default::default()
        };
        db.save(&mut a).unwrap();
        db.save(&mut b).unwrap();

        let high: Vec<Note> = db.find_by("priority", "High").unwrap();
        assert_eq!(high, vec![a.clone()]);

        let all: Vec<Note> = db.all().unwrap();
        assert_eq!(all.len(), 2);

        let ordered: Vec<Note> = db
            .query(Query::from("Notes").order_by("\"title\" ASC"))
            .unwrap();
        assert_eq!(ordered[0].title, "Call mom");

        recorder.take();
        assert!(db.delete(&b).unwrap());
        assert!(!db.delete(&b).unwrap());
        assert_eq!(recorder.take().len(), 1);
        assert!(db.load::<Note>(b.id().unwrap()).unwrap().is_none());
        assert!(matches!(db.get::<Note>(b.id().unwrap()), Err(Error::NotFound(_))));
        assert_eq!(db.get::<Note>(a.id().unwrap()).unwrap(), a);

        assert!(matches!(db.delete(&Note::default()), Err(Error::Unsaved(_))));
    }

    #[test]
    fn test_full_text_row_keys_on_owner_id() {
        let (db, recorder) = setup();
        let mut note = Note {
            identity: Identity::persisted(42),
            title: "Quarterly report".into(),
            body: Some("revenue grew".into()),
            ..Default::default()
        };
        db.save(&mut note).unwrap();
        recorder.take();

        let mut shadow = NoteText::new(&note);
        let docid = shadow.save(&db).unwrap();
        assert_eq!(docid, 42);

        assert_eq!(db.search::<NoteText>("revenue").unwrap(), vec![42]);
        assert!(db.search::<NoteText>("indexed").unwrap().is_empty());

        let owners = db.search_owners::<NoteText>("quarterly").unwrap();
        assert_eq!(owners, vec![note.clone()]);

        let changes = recorder.take();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].resource(), ResourceKind::FullText);
        assert_eq!(changes[0].uri.to_uri_string(), "content://notes/fts/NoteText/42");
    }

    #[test]
    fn test_full_text_save_is_upsert() {
        let (db, _) = setup();
        let mut note = sample_note();
        db.save(&mut note).unwrap();

        NoteText::new(&note).save(&db).unwrap();
        note.title = "Hardware store".into();
        NoteText::new(&note).save(&db).unwrap();

        assert!(db.search::<NoteText>("groceries").unwrap().is_empty());
        assert_eq!(db.search::<NoteText>("hardware").unwrap(), vec![note.id().unwrap()]);
        assert_eq!(db.store().count("NoteText").unwrap(), 1);
    }

    #[test]
    fn test_owner_delete_leaves_shadow() {
        let (db, _) = setup();
        let mut note = sample_note();
        let id = db.save(&mut note).unwrap();
        NoteText::new(&note).save(&db).unwrap();

        db.delete(&note).unwrap();
        assert_eq!(db.search::<NoteText>("milk").unwrap(), vec![id]);
        assert!(db.search_owners::<NoteText>("milk").unwrap().is_empty());

        assert!(db.delete_full_text::<NoteText>(id).unwrap());
        assert!(db.search::<NoteText>("milk").unwrap().is_empty());
    }

    #[test]
    fn test_full_text_needs_saved_owner() {
        let (db, _) = setup();
        let note = sample_note();
        let err = NoteText::new(&note).save(&db).unwrap_err();
        assert!(matches!(err, Error::Unsaved(_)));
    }

    #[test]
    fn test_full_text_descriptor_keeps_flagged_fields_only() {
        let (db, _) = setup();
        let info = db.schemas().full_text_info::<NoteText>().unwrap();
        assert_eq!(info.column_names(), vec!["docid", "text"]);
    }

    /// Promises text, returns an integer.
    struct CountingMetaSerializer;

    impl TypeSerializer for CountingMetaSerializer {
        type Target = Meta;

        fn serialized_kind(&self) -> ValueKind {
            ValueKind::Text
        }

        fn serialize(&self, value: &Meta) -> Value {
            Value::Integer(value.tags.len() as i64)
        }

        fn deserialize(&self, _value: &Value) -> std::result::Result<Meta, String> {
            Ok(Meta::default())
        }
    }

    #[test]
    fn test_serializer_mismatch_still_writes() {
        let mut serializers = SerializerRegistry::with_defaults();
        serializers.register(CountingMetaSerializer);
        let (store, counters) = CountingStore::new();
        let db = Database::builder(store).serializers(serializers).build();
        db.create_table::<Note>().unwrap();

        let mut note = sample_note();
        let logs = LogCapture::default();
        let id = logs.capture(|| db.save(&mut note)).unwrap();

        assert_eq!(counters.replaces(), 1);
        assert!(logs.contents().contains("TypeSerializer returned wrong type"));

        let rows = db
            .store()
            .select(&Query::from("Notes").columns(["meta"]).filter("\"Id\" = ?", [Value::Integer(id)]))
            .unwrap();
        assert_eq!(rows[0].get("meta").and_then(Value::as_i64), Some(1));
    }

    #[test]
    fn test_store_failure_propagates() {
        let db = Database::open_in_memory().unwrap();
        let mut note = sample_note();
        assert!(matches!(db.save(&mut note), Err(Error::Storage(_))));
        assert_eq!(note.id(), None);
    }
}
