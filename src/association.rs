//! Lazy one-to-many associations
//!
//! A [`HasMany`] starts unloaded and issues no query until something reads
//! or edits it. The first access loads every `E` whose foreign-key column
//! equals the owner's id; after that it is a snapshot and does not see rows
//! written elsewhere until [`HasMany::clear`] drops it.
//!
//! Edits only touch the snapshot. Saving added or changed children, and
//! deleting removed ones, is up to the caller.
//!
//! A `HasMany` is not synchronised. Callers sharing one across threads must
//! serialise access themselves.

use crate::database::Database;
use crate::identity::{Identity, IdentityWatch};
use crate::model::Model;
use crate::{Error, Result};
use std::fmt;
use std::ops::Range;

enum Snapshot<E> {
    Unloaded,
    Loaded(Vec<E>),
}

/// Children of one owner, keyed by `foreign_key` on `E`'s table.
pub struct HasMany<E: Model> {
    db: Database,
    owner: IdentityWatch,
    foreign_key: String,
    state: Snapshot<E>,
}

impl<E: Model> HasMany<E> {
    /// Association over `E` rows whose `foreign_key` column holds the owner's id.
    ///
    /// `owner` is watched, not copied: an owner saved after this call is
    /// seen on the next load.
    pub fn new(db: &Database, owner: &Identity, foreign_key: impl Into<String>) -> Self {
        Self {
            db: db.clone(),
            owner: owner.watch(),
            foreign_key: foreign_key.into(),
            state: Snapshot::Unloaded,
        }
    }

    pub fn foreign_key(&self) -> &str {
        &self.foreign_key
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.state, Snapshot::Loaded(_))
    }

    fn materialize(&mut self) -> Result<&mut Vec<E>> {
        if let Snapshot::Unloaded = self.state {
            let children = match self.owner.get() {
                Some(id) => {
                    let children = self.db.find_by::<E>(&self.foreign_key, id)?;
                    tracing::debug!(
                        "Loaded {} {} for {} = {}",
                        children.len(),
                        E::table_name(),
                        self.foreign_key,
                        id
                    );
                    children
                }
                None => Vec::new(),
            };
            self.state = Snapshot::Loaded(children);
        }

        match &mut self.state {
            Snapshot::Loaded(children) => Ok(children),
            Snapshot::Unloaded => unreachable!("snapshot was just loaded"),
        }
    }

    // ========== Reads ==========

    /// The loaded children
    pub fn snapshot(&mut self) -> Result<&[E]> {
        Ok(self.materialize()?.as_slice())
    }

    pub fn len(&mut self) -> Result<usize> {
        Ok(self.materialize()?.len())
    }

    pub fn is_empty(&mut self) -> Result<bool> {
        Ok(self.materialize()?.is_empty())
    }

    pub fn get(&mut self, index: usize) -> Result<Option<&E>> {
        Ok(self.materialize()?.get(index))
    }

    pub fn iter(&mut self) -> Result<std::slice::Iter<'_, E>> {
        Ok(self.materialize()?.iter())
    }

    // ========== Edits ==========

    /// Insert at `index`, shifting later children right.
    pub fn insert(&mut self, index: usize, child: E) -> Result<()> {
        let children = self.materialize()?;
        if index > children.len() {
            return Err(Error::IndexOutOfBounds {
                index,
                len: children.len(),
            });
        }
        children.insert(index, child);
        Ok(())
    }

    pub fn push(&mut self, child: E) -> Result<()> {
        self.materialize()?.push(child);
        Ok(())
    }

    /// Remove and return the child at `index`.
    pub fn remove(&mut self, index: usize) -> Result<E> {
        let children = self.materialize()?;
        if index >= children.len() {
            return Err(Error::IndexOutOfBounds {
                index,
                len: children.len(),
            });
        }
        Ok(children.remove(index))
    }

    /// Remove the first child equal to `child`; returns whether one was found.
    pub fn remove_item(&mut self, child: &E) -> Result<bool>
    where
        E: PartialEq,
    {
        let children = self.materialize()?;
        match children.iter().position(|c| c == child) {
            Some(pos) => {
                children.remove(pos);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Remove the children in `range`.
    pub fn remove_range(&mut self, range: Range<usize>) -> Result<()> {
        let children = self.materialize()?;
        if range.start > range.end || range.end > children.len() {
            return Err(Error::IndexOutOfBounds {
                index: range.end,
                len: children.len(),
            });
        }
        children.drain(range);
        Ok(())
    }

    /// Remove every child equal to one in `others`; returns whether anything changed.
    pub fn remove_all(&mut self, others: &[E]) -> Result<bool>
    where
        E: PartialEq,
    {
        let children = self.materialize()?;
        let before = children.len();
        children.retain(|c| !others.contains(c));
        Ok(children.len() != before)
    }

    /// Keep only children equal to one in `others`; returns whether anything changed.
    pub fn retain_all(&mut self, others: &[E]) -> Result<bool>
    where
        E: PartialEq,
    {
        let children = self.materialize()?;
        let before = children.len();
        children.retain(|c| others.contains(c));
        Ok(children.len() != before)
    }

    /// Drop the snapshot; the next access queries again.
    pub fn clear(&mut self) {
        self.state = Snapshot::Unloaded;
    }
}

impl<E: Model + fmt::Debug> fmt::Debug for HasMany<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("HasMany");
        s.field("table", &E::table_name())
            .field("foreign_key", &self.foreign_key)
            .field("owner", &self.owner);
        match &self.state {
            Snapshot::Unloaded => s.field("children", &"<unloaded>"),
            Snapshot::Loaded(children) => s.field("children", children),
        };
        s.finish()
    }
}
