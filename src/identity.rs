//! Row identity - equality and hashing tied to a persisted row id
//!
//! Two model values are the same row iff both carry an id, the ids match,
//! and they live in the same table. Unsaved values are only ever equal to
//! themselves.
//!
//! Hash codes follow the classic 32-bit scheme:
//! `739 + 739 * hash(id or instance) + 739 * hash(table)`, with the id hashed
//! like a Java `Long` and the table name like a Java `String`, so every
//! representation of a row hashes identically no matter who computes it.

use crate::{Error, Result};
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Prime used by [`row_hash_code`].
pub const HASH_PRIME: i32 = 739;

/// Identity slot of a model: empty until the store assigns an id, stable after.
///
/// Cloning yields an independent slot carrying the same id, so an unsaved
/// clone does not pick up the original's id when the original is saved.
pub struct Identity {
    cell: Arc<OnceLock<i64>>,
}

impl Identity {
    /// An unsaved identity
    pub fn new() -> Self {
        Self {
            cell: Arc::new(OnceLock::new()),
        }
    }

    /// An identity for a row that already exists
    pub fn persisted(id: i64) -> Self {
        let cell = OnceLock::new();
        let _ = cell.set(id);
        Self { cell: Arc::new(cell) }
    }

    pub fn get(&self) -> Option<i64> {
        self.cell.get().copied()
    }

    pub fn is_saved(&self) -> bool {
        self.cell.get().is_some()
    }

    /// Record the id handed out by the store.
    ///
    /// Re-assigning the same id is a no-op; a different id is rejected.
    pub fn assign(&self, id: i64) -> Result<()> {
        match self.cell.get() {
            Some(existing) if *existing == id => Ok(()),
            Some(existing) => Err(Error::IdentityConflict {
                existing: *existing,
                attempted: id,
            }),
            None => {
                let _ = self.cell.set(id);
                Ok(())
            }
        }
    }

    /// A read-only view that follows this slot after it is assigned.
    pub fn watch(&self) -> IdentityWatch {
        IdentityWatch {
            cell: Arc::clone(&self.cell),
        }
    }

    /// Per-instance hash used while unsaved.
    pub fn instance_hash(&self) -> i32 {
        let addr = Arc::as_ptr(&self.cell) as usize as u64;
        java_long_hash(addr as i64)
    }

    /// Whether `self` and `other` are the very same slot.
    pub fn same_instance(&self, other: &Identity) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }
}

impl Default for Identity {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Identity {
    fn clone(&self) -> Self {
        match self.get() {
            Some(id) => Self::persisted(id),
            None => Self::new(),
        }
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(id) => write!(f, "Identity({})", id),
            None => write!(f, "Identity(unsaved)"),
        }
    }
}

/// Shared read-only handle on an owner's [`Identity`].
#[derive(Clone)]
pub struct IdentityWatch {
    cell: Arc<OnceLock<i64>>,
}

impl IdentityWatch {
    pub fn get(&self) -> Option<i64> {
        self.cell.get().copied()
    }
}

impl fmt::Debug for IdentityWatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("IdentityWatch").field(&self.get()).finish()
    }
}

/// `Long.hashCode()`
pub fn java_long_hash(value: i64) -> i32 {
    (value ^ ((value as u64) >> 32) as i64) as i32
}

/// `String.hashCode()` over UTF-16 code units
pub fn java_string_hash(value: &str) -> i32 {
    value
        .encode_utf16()
        .fold(0i32, |hash, unit| hash.wrapping_mul(31).wrapping_add(i32::from(unit)))
}

/// Hash code of a row reference.
pub fn row_hash_code(id: Option<i64>, instance_hash: i32, table: &str) -> i32 {
    let mut hash = HASH_PRIME;
    let id_hash = id.map(java_long_hash).unwrap_or(instance_hash);
    hash = hash.wrapping_add(HASH_PRIME.wrapping_mul(id_hash));
    hash = hash.wrapping_add(HASH_PRIME.wrapping_mul(java_string_hash(table)));
    hash
}

/// Row equality over identity slots and table names.
pub fn same_row(a: &Identity, a_table: &str, b: &Identity, b_table: &str) -> bool {
    match a.get() {
        Some(id) => b.get() == Some(id) && a_table == b_table,
        None => a.same_instance(b),
    }
}

/// Implement `PartialEq`, `Eq` and `Hash` for a [`Model`](crate::Model)
/// by row identity.
#[macro_export]
macro_rules! impl_row_identity {
    ($ty:ty) => {
        impl ::std::cmp::PartialEq for $ty {
            fn eq(&self, other: &Self) -> bool {
                $crate::identity::same_row(
                    $crate::Model::identity(self),
                    <$ty as $crate::Model>::table_name(),
                    $crate::Model::identity(other),
                    <$ty as $crate::Model>::table_name(),
                )
            }
        }

        impl ::std::cmp::Eq for $ty {}

        impl ::std::hash::Hash for $ty {
            fn hash<H: ::std::hash::Hasher>(&self, state: &mut H) {
                state.write_i32($crate::model::row_hash::<$ty>(self));
            }
        }
    };
}
