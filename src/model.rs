//! Model traits - what a persisted type registers about itself
//!
//! A type opts into persistence by implementing [`Describe`] (its field list)
//! and [`Model`] (its identity slot and table). Ancestors are expressed by
//! embedding: a model that contains a base struct calls
//! [`SchemaBuilder::embed`] and gets the base's columns ahead of its own.

use crate::database::Database;
use crate::identity::{Identity, row_hash_code};
use crate::schema::SchemaBuilder;
use crate::Result;

/// Registers the persisted fields of a type.
pub trait Describe: Sized + Send + Sync + 'static {
    fn describe(schema: &mut SchemaBuilder<Self>);
}

/// A persisted entity with an identity column.
pub trait Model: Describe + Default {
    /// Explicit table name; defaults to the type's simple name.
    const TABLE: Option<&'static str> = None;

    /// Name of the identity column.
    const ID_COLUMN: &'static str = "Id";

    fn identity(&self) -> &Identity;

    /// Runs before the row is built on every save.
    fn before_save(&mut self) {}

    fn table_name() -> &'static str {
        Self::TABLE.unwrap_or_else(simple_type_name::<Self>)
    }

    fn id(&self) -> Option<i64> {
        self.identity().get()
    }

    /// Upsert this model, returning its (possibly new) id.
    fn save(&mut self, db: &Database) -> Result<i64> {
        db.save(self)
    }
}

/// Last path segment of a type name, without generic arguments.
pub fn simple_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Row hash code of a model, see [`row_hash_code`].
pub fn row_hash<M: Model>(model: &M) -> i32 {
    let identity = model.identity();
    row_hash_code(identity.get(), identity.instance_hash(), M::table_name())
}
