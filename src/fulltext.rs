//! Full-text shadows - searchable copies of selected model text
//!
//! A shadow is a short-lived value built around one owner model. Saving it
//! upserts a row into the shadow's fts table whose `docid` is the owner's
//! id, so the fts table is keyed one-to-one with the owner table. Removing
//! the owner does not remove the shadow row; call
//! [`Database::delete_full_text`] for that.

use crate::database::Database;
use crate::identity::row_hash_code;
use crate::model::{Describe, Model, simple_type_name};
use crate::Result;

/// A full-text mirror of some of an owner's text.
pub trait FullTextModel: Describe {
    type Owner: Model;

    /// Explicit table name; defaults to the type's simple name.
    const TABLE: Option<&'static str> = None;

    fn owner(&self) -> &Self::Owner;

    /// Runs before the row is built; derive the indexed text from the owner here.
    fn before_save(&mut self) {}

    fn table_name() -> &'static str {
        Self::TABLE.unwrap_or_else(simple_type_name::<Self>)
    }

    /// Row key: the owner's id.
    fn docid(&self) -> Option<i64> {
        self.owner().id()
    }

    /// Upsert the shadow row, returning its docid.
    fn save(&mut self, db: &Database) -> Result<i64> {
        db.save_full_text(self)
    }
}

/// Shadow equality: same docid and same table; unsaved shadows equal only themselves.
pub fn same_shadow<S: FullTextModel>(a: &S, b: &S) -> bool {
    match a.docid() {
        Some(id) => b.docid() == Some(id),
        None => std::ptr::eq(a, b),
    }
}

/// Hash code of a shadow, see [`row_hash_code`].
pub fn shadow_hash<S: FullTextModel>(shadow: &S) -> i32 {
    row_hash_code(
        shadow.docid(),
        shadow.owner().identity().instance_hash(),
        S::table_name(),
    )
}

/// `<table>@<docid>`
pub fn shadow_label<S: FullTextModel>(shadow: &S) -> String {
    match shadow.docid() {
        Some(id) => format!("{}@{}", S::table_name(), id),
        None => format!("{}@unsaved", S::table_name()),
    }
}

/// Implement `PartialEq`, `Eq`, `Hash` and `Display` for a [`FullTextModel`].
#[macro_export]
macro_rules! impl_full_text_identity {
    ($ty:ty) => {
        impl ::std::cmp::PartialEq for $ty {
            fn eq(&self, other: &Self) -> bool {
                $crate::fulltext::same_shadow(self, other)
            }
        }

        impl ::std::cmp::Eq for $ty {}

        impl ::std::hash::Hash for $ty {
            fn hash<H: ::std::hash::Hasher>(&self, state: &mut H) {
                state.write_i32($crate::fulltext::shadow_hash(self));
            }
        }

        impl ::std::fmt::Display for $ty {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(&$crate::fulltext::shadow_label(self))
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{Identity, java_string_hash};
    use crate::schema::SchemaBuilder;

    #[derive(Debug, Default, Clone)]
    struct Article {
        identity: Identity,
        headline: String,
    }

    impl Describe for Article {
        fn describe(schema: &mut SchemaBuilder<Self>) {
            schema.field("headline", |a: &Article| &a.headline, |a, v| a.headline = v);
        }
    }

    impl Model for Article {
        fn identity(&self) -> &Identity {
            &self.identity
        }
    }

    #[derive(Debug)]
    struct ArticleText {
        article: Article,
        headline: String,
    }

    impl Describe for ArticleText {
        fn describe(schema: &mut SchemaBuilder<Self>) {
            schema
                .field("headline", |t: &ArticleText| &t.headline, |t, v| t.headline = v)
                .full_text();
        }
    }

    impl FullTextModel for ArticleText {
        type Owner = Article;

        fn owner(&self) -> &Article {
            &self.article
        }
    }

    crate::impl_full_text_identity!(ArticleText);

    fn shadow(id: Option<i64>, text: &str) -> ArticleText {
        let identity = id.map(Identity::persisted).unwrap_or_default();
        ArticleText {
            article: Article {
                identity,
                headline: text.into(),
            },
            headline: text.into(),
        }
    }

    #[test]
    fn test_shadows_of_same_row_are_equal() {
        let a = shadow(Some(42), "one");
        let b = shadow(Some(42), "two");
        assert_eq!(a, b);
        assert_eq!(shadow_hash(&a), shadow_hash(&b));
        assert_ne!(a, shadow(Some(43), "one"));
        assert_eq!(a.to_string(), "ArticleText@42");
    }

    #[test]
    fn test_unsaved_shadow_equals_only_itself() {
        let a = shadow(None, "x");
        let b = shadow(None, "x");
        assert_eq!(a, a);
        assert_ne!(a, b);
        assert_eq!(a.to_string(), "ArticleText@unsaved");
    }

    #[test]
    fn test_shadow_hash_uses_table_hash() {
        let a = shadow(Some(1), "x");
        let expected = 739i32
            .wrapping_add(739i32.wrapping_mul(1))
            .wrapping_add(739i32.wrapping_mul(java_string_hash("ArticleText")));
        assert_eq!(shadow_hash(&a), expected);
    }
}
