//! Schema descriptors - the table/column layout of a model type
//!
//! A [`TableInfo`] is built once per type from what the type registers in
//! [`Describe::describe`] and never changes afterwards:
//! - the identity column comes first
//! - embedded (ancestor) fields follow, outermost ancestor first
//! - the type's own fields come last, in registration order
//!
//! Full-text descriptors keep only the fields flagged with
//! [`FieldDef::full_text`] and always key on `docid`.

use crate::codec::{FieldCodec, FieldType};
use crate::fulltext::FullTextModel;
use crate::model::{Describe, Model, simple_type_name};
use crate::notify::ResourceKind;
use crate::value::{Value, ValueKind};
use crate::{Error, Result};
use regex::Regex;
use std::any::TypeId;
use std::collections::HashSet;
use std::fmt;
use std::sync::OnceLock;

/// Identity column of every full-text table.
pub const DOCID: &str = "docid";

type Reader<M> = dyn Fn(&M, &FieldCodec<'_>) -> std::result::Result<Value, String> + Send + Sync;
type Writer<M> = dyn Fn(&mut M, &FieldCodec<'_>, &Value) -> std::result::Result<(), String> + Send + Sync;

fn storage_kind_of<T: FieldType>(codec: &FieldCodec<'_>) -> ValueKind {
    codec.storage_kind::<T>()
}

/// One persisted field of `M`.
pub struct FieldDef<M> {
    name: &'static str,
    column: Option<String>,
    full_text: bool,
    type_name: &'static str,
    kind_of: fn(&FieldCodec<'_>) -> ValueKind,
    read: Box<Reader<M>>,
    write: Option<Box<Writer<M>>>,
}

impl<M: 'static> FieldDef<M> {
    /// Store under `name` instead of the field name.
    pub fn column(&mut self, name: impl Into<String>) -> &mut Self {
        self.column = Some(name.into());
        self
    }

    /// Mirror this field into the full-text table.
    pub fn full_text(&mut self) -> &mut Self {
        self.full_text = true;
        self
    }

    /// Mirror this field into the full-text table under `name`.
    pub fn full_text_as(&mut self, name: impl Into<String>) -> &mut Self {
        self.full_text = true;
        self.column(name)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn column_name(&self) -> &str {
        self.column.as_deref().unwrap_or(self.name)
    }

    pub fn is_full_text(&self) -> bool {
        self.full_text
    }

    /// Rust type name of the field
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn is_writable(&self) -> bool {
        self.write.is_some()
    }

    pub fn storage_kind(&self, codec: &FieldCodec<'_>) -> ValueKind {
        (self.kind_of)(codec)
    }

    /// Read the field off `model` and encode it.
    pub fn encode(&self, model: &M, codec: &FieldCodec<'_>) -> std::result::Result<Value, String> {
        (self.read)(model, codec)
    }

    /// Decode `value` and store it into `model`; read-only fields ignore it.
    pub fn decode_into(&self, model: &mut M, codec: &FieldCodec<'_>, value: &Value) -> std::result::Result<(), String> {
        match &self.write {
            Some(write) => write(model, codec, value),
            None => Ok(()),
        }
    }

    /// Re-home this field onto a type that embeds `M`.
    fn lift<O: 'static>(self, lens: fn(&O) -> &M, lens_mut: fn(&mut O) -> &mut M) -> FieldDef<O> {
        let read = self.read;
        let write = self.write.map(|write| {
            Box::new(move |outer: &mut O, codec: &FieldCodec<'_>, value: &Value| {
                write(lens_mut(outer), codec, value)
            }) as Box<Writer<O>>
        });

        FieldDef {
            name: self.name,
            column: self.column,
            full_text: self.full_text,
            type_name: self.type_name,
            kind_of: self.kind_of,
            read: Box::new(move |outer: &O, codec: &FieldCodec<'_>| read(lens(outer), codec)),
            write,
        }
    }
}

impl<M> fmt::Debug for FieldDef<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDef")
            .field("name", &self.name)
            .field("column", &self.column.as_deref().unwrap_or(self.name))
            .field("type", &self.type_name)
            .field("full_text", &self.full_text)
            .finish()
    }
}

/// Collects the fields a type registers in [`Describe::describe`].
pub struct SchemaBuilder<M> {
    inherited: Vec<FieldDef<M>>,
    declared: Vec<FieldDef<M>>,
}

impl<M: 'static> SchemaBuilder<M> {
    pub fn new() -> Self {
        Self {
            inherited: Vec::new(),
            declared: Vec::new(),
        }
    }

    /// A required field.
    ///
    /// Loading a `NULL` leaves the field at its current value.
    pub fn field<T: FieldType>(
        &mut self,
        name: &'static str,
        get: fn(&M) -> &T,
        set: fn(&mut M, T),
    ) -> &mut FieldDef<M> {
        self.push(FieldDef {
            name,
            column: None,
            full_text: false,
            type_name: std::any::type_name::<T>(),
            kind_of: storage_kind_of::<T>,
            read: Box::new(move |model: &M, codec: &FieldCodec<'_>| {
                let raw: &dyn FieldType = get(model);
                Ok(codec.encode(Some(raw), TypeId::of::<T>()))
            }),
            write: Some(Box::new(move |model: &mut M, codec: &FieldCodec<'_>, value: &Value| {
                if let Some(decoded) = codec.decode::<T>(value)? {
                    set(model, decoded);
                }
                Ok(())
            })),
        })
    }

    /// A nullable field.
    pub fn optional<T: FieldType>(
        &mut self,
        name: &'static str,
        get: fn(&M) -> Option<&T>,
        set: fn(&mut M, Option<T>),
    ) -> &mut FieldDef<M> {
        self.push(FieldDef {
            name,
            column: None,
            full_text: false,
            type_name: std::any::type_name::<T>(),
            kind_of: storage_kind_of::<T>,
            read: Box::new(move |model: &M, codec: &FieldCodec<'_>| {
                let raw = get(model).map(|v| v as &dyn FieldType);
                Ok(codec.encode(raw, TypeId::of::<T>()))
            }),
            write: Some(Box::new(move |model: &mut M, codec: &FieldCodec<'_>, value: &Value| {
                set(model, codec.decode::<T>(value)?);
                Ok(())
            })),
        })
    }

    /// A derived, write-only column. A failing getter drops the column from
    /// that row instead of failing the save.
    pub fn computed<T: FieldType>(
        &mut self,
        name: &'static str,
        get: fn(&M) -> std::result::Result<Option<T>, String>,
    ) -> &mut FieldDef<M> {
        self.push(FieldDef {
            name,
            column: None,
            full_text: false,
            type_name: std::any::type_name::<T>(),
            kind_of: storage_kind_of::<T>,
            read: Box::new(move |model: &M, codec: &FieldCodec<'_>| {
                let value = get(model)?;
                let raw = value.as_ref().map(|v| v as &dyn FieldType);
                Ok(codec.encode(raw, TypeId::of::<T>()))
            }),
            write: None,
        })
    }

    /// Pull in the fields of an embedded base type. They are ordered ahead of
    /// every field `M` declares itself.
    pub fn embed<P: Describe>(&mut self, lens: fn(&M) -> &P, lens_mut: fn(&mut M) -> &mut P) -> &mut Self {
        let mut base = SchemaBuilder::<P>::new();
        P::describe(&mut base);
        self.inherited
            .extend(base.into_fields().into_iter().map(|field| field.lift(lens, lens_mut)));
        self
    }

    fn push(&mut self, field: FieldDef<M>) -> &mut FieldDef<M> {
        let index = self.declared.len();
        self.declared.push(field);
        &mut self.declared[index]
    }

    fn into_fields(self) -> Vec<FieldDef<M>> {
        let mut fields = self.inherited;
        fields.extend(self.declared);
        fields
    }
}

impl<M: 'static> Default for SchemaBuilder<M> {
    fn default() -> Self {
        Self::new()
    }
}

fn model_id<M: Model>(model: &M) -> Option<i64> {
    model.identity().get()
}

fn owner_id<S: FullTextModel>(shadow: &S) -> Option<i64> {
    shadow.owner().identity().get()
}

/// Immutable table layout of a model or full-text shadow type.
pub struct TableInfo<M> {
    resource: ResourceKind,
    type_name: &'static str,
    table_name: String,
    id_column: String,
    identity: fn(&M) -> Option<i64>,
    fields: Vec<FieldDef<M>>,
}

/// Descriptor of a full-text shadow type.
pub type FullTextTableInfo<S> = TableInfo<S>;

impl<M: Model> TableInfo<M> {
    /// Build the primary-table descriptor of `M`.
    pub fn for_model() -> Result<Self> {
        let mut builder = SchemaBuilder::new();
        M::describe(&mut builder);
        Self::assemble(
            ResourceKind::Standard,
            M::table_name(),
            M::ID_COLUMN,
            model_id::<M>,
            builder.into_fields(),
        )
    }
}

impl<S: FullTextModel> TableInfo<S> {
    /// Build the full-text descriptor of `S`: only flagged fields, keyed on `docid`.
    pub fn for_full_text() -> Result<Self> {
        let mut builder = SchemaBuilder::new();
        S::describe(&mut builder);
        let fields = builder
            .into_fields()
            .into_iter()
            .filter(FieldDef::is_full_text)
            .collect::<Vec<_>>();
        if fields.is_empty() {
            return Err(Error::Configuration(format!(
                "{} declares no full-text columns",
                simple_type_name::<S>()
            )));
        }
        Self::assemble(ResourceKind::FullText, S::table_name(), DOCID, owner_id::<S>, fields)
    }
}

impl<M: 'static> TableInfo<M> {
    fn assemble(
        resource: ResourceKind,
        table_name: &str,
        id_column: &str,
        identity: fn(&M) -> Option<i64>,
        fields: Vec<FieldDef<M>>,
    ) -> Result<Self> {
        let type_name = simple_type_name::<M>();
        check_identifier(type_name, "table", table_name)?;
        check_identifier(type_name, "identity column", id_column)?;

        let mut seen = HashSet::new();
        seen.insert(id_column.to_ascii_lowercase());
        for field in &fields {
            let column = field.column_name();
            check_identifier(type_name, "column", column)?;
            if !seen.insert(column.to_ascii_lowercase()) {
                return Err(Error::Configuration(format!(
                    "{}: column {} is declared twice (or shadows the identity column)",
                    type_name, column
                )));
            }
        }

        tracing::debug!(
            "Built {} descriptor for {} -> {} ({} columns)",
            resource,
            type_name,
            table_name,
            fields.len() + 1
        );

        Ok(Self {
            resource,
            type_name,
            table_name: table_name.to_string(),
            id_column: id_column.to_string(),
            identity,
            fields,
        })
    }

    pub fn resource(&self) -> ResourceKind {
        self.resource
    }

    /// Simple name of the described type
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn id_column(&self) -> &str {
        &self.id_column
    }

    /// Persisted fields, identity excluded, in column order.
    pub fn fields(&self) -> &[FieldDef<M>] {
        &self.fields
    }

    /// All column names, identity first.
    pub fn column_names(&self) -> Vec<&str> {
        std::iter::once(self.id_column.as_str())
            .chain(self.fields.iter().map(FieldDef::column_name))
            .collect()
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef<M>> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Row key of `model` in this table.
    pub fn identity_of(&self, model: &M) -> Option<i64> {
        (self.identity)(model)
    }
}

impl<M> fmt::Debug for TableInfo<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableInfo")
            .field("resource", &self.resource)
            .field("type", &self.type_name)
            .field("table", &self.table_name)
            .field("id_column", &self.id_column)
            .field("fields", &self.fields)
            .finish()
    }
}

fn identifier_pattern() -> &'static Regex {
    static IDENT: OnceLock<Regex> = OnceLock::new();
    IDENT.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid"))
}

fn check_identifier(type_name: &str, what: &str, name: &str) -> Result<()> {
    if identifier_pattern().is_match(name) {
        Ok(())
    } else {
        Err(Error::Configuration(format!(
            "{}: invalid {} name {:?}",
            type_name, what, name
        )))
    }
}
