//! Row mapper - model values to flat rows and back
//!
//! A field whose value cannot be read is logged and left out of the row;
//! the rest of the row is still written. The identity column is always set
//! last, from the model's current identity.

use crate::codec::FieldCodec;
use crate::schema::TableInfo;
use crate::storage::Row;
use crate::value::Value;
use crate::{Error, Result};

pub struct RowMapper<'a, M> {
    info: &'a TableInfo<M>,
    codec: FieldCodec<'a>,
}

impl<'a, M: 'static> RowMapper<'a, M> {
    pub fn new(info: &'a TableInfo<M>, codec: FieldCodec<'a>) -> Self {
        Self { info, codec }
    }

    /// Flatten `model` into a row keyed by column name.
    pub fn to_row(&self, model: &M) -> Row {
        let mut row = Row::new();

        for field in self.info.fields() {
            match field.encode(model, &self.codec) {
                Ok(value) => row.put(field.column_name(), value),
                Err(message) => {
                    let err = Error::FieldAccess {
                        field: format!("{}.{}", self.info.type_name(), field.name()),
                        message,
                    };
                    tracing::error!("Skipping column {} ({}): {}", field.column_name(), field.type_name(), err);
                }
            }
        }

        row.put(self.info.id_column(), self.info.identity_of(model));
        row
    }

    /// Apply a stored row onto `model`. Columns missing from the row leave
    /// their field untouched; the identity column is not applied here.
    pub fn apply(&self, model: &mut M, row: &Row) -> Result<()> {
        for field in self.info.fields().iter().filter(|f| f.is_writable()) {
            let Some(value) = row.get(field.column_name()) else {
                continue;
            };
            field
                .decode_into(model, &self.codec, value)
                .map_err(|message| Error::Decode {
                    column: format!("{}.{}", self.info.table_name(), field.column_name()),
                    message,
                })?;
        }
        Ok(())
    }

    /// Identity stored in `row`, if any.
    pub fn row_id(&self, row: &Row) -> Option<i64> {
        row.get(self.info.id_column()).and_then(Value::as_i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::SerializerRegistry;
    use crate::identity::Identity;
    use crate::model::{Describe, Model};
    use crate::schema::SchemaBuilder;
    use crate::testing::LogCapture;

    #[derive(Debug, Clone, Copy, PartialEq, Default)]
    enum Status {
        #[default]
        Open,
        Closed,
    }

    crate::enum_field!(Status { Open, Closed });

    #[derive(Debug, Default)]
    struct Ticket {
        identity: Identity,
        title: String,
        status: Status,
        urgent: bool,
        estimate: Option<f64>,
    }

    impl Describe for Ticket {
        fn describe(schema: &mut SchemaBuilder<Self>) {
            schema.field("title", |t: &Ticket| &t.title, |t, v| t.title = v);
            schema.field("status", |t: &Ticket| &t.status, |t, v| t.status = v);
            schema.field("urgent", |t: &Ticket| &t.urgent, |t, v| t.urgent = v);
            schema.optional("estimate", |t: &Ticket| t.estimate.as_ref(), |t, v| t.estimate = v);
            schema.computed("slug", |t: &Ticket| {
                if t.title.is_empty() {
                    Err("title is empty".to_string())
                } else {
                    Ok(Some(t.title.to_lowercase().replace(' ', "-")))
                }
            });
        }
    }

    impl Model for Ticket {
        fn identity(&self) -> &Identity {
            &self.identity
        }
    }

    #[test]
    fn test_to_row_sets_identity_last() {
        let info = TableInfo::<Ticket>::for_model().unwrap();
        let registry = SerializerRegistry::with_defaults();
        let mapper = RowMapper::new(&info, FieldCodec::new(&registry));

        let ticket = Ticket {
            identity: Identity::persisted(12),
            title: "Fix Login".into(),
            status: Status::Closed,
            urgent: true,
            estimate: None,
        };
        let row = mapper.to_row(&ticket);

        assert_eq!(
            row.column_names().collect::<Vec<_>>(),
            vec!["title", "status", "urgent", "estimate", "slug", "Id"]
        );
        assert_eq!(row.get("status"), Some(&Value::Text("Closed".into())));
        assert_eq!(row.get("urgent"), Some(&Value::Integer(1)));
        assert_eq!(row.get("estimate"), Some(&Value::Null));
        assert_eq!(row.get("slug"), Some(&Value::Text("fix-login".into())));
        assert_eq!(mapper.row_id(&row), Some(12));
    }

    #[test]
    fn test_failing_field_is_omitted_and_logged() {
        let info = TableInfo::<Ticket>::for_model().unwrap();
        let registry = SerializerRegistry::with_defaults();
        let mapper = RowMapper::new(&info, FieldCodec::new(&registry));

        let logs = LogCapture::default();
        let row = logs.capture(|| mapper.to_row(&Ticket::default()));

        assert!(!row.contains("slug"));
        assert!(row.contains("title"));
        assert_eq!(row.get("Id"), Some(&Value::Null));
        assert!(logs.contents().contains("title is empty"));
    }

    #[test]
    fn test_apply_round_trips() {
        let info = TableInfo::<Ticket>::for_model().unwrap();
        let registry = SerializerRegistry::with_defaults();
        let mapper = RowMapper::new(&info, FieldCodec::new(&registry));

        let original = Ticket {
            identity: Identity::persisted(3),
            title: "Ship it".into(),
            status: Status::Closed,
            urgent: true,
            estimate: Some(2.5),
        };
        let row = mapper.to_row(&original);

        let mut loaded = Ticket::default();
        mapper.apply(&mut loaded, &row).unwrap();
        assert_eq!(loaded.title, original.title);
        assert_eq!(loaded.status, original.status);
        assert_eq!(loaded.urgent, original.urgent);
        assert_eq!(loaded.estimate, original.estimate);
    }

    #[test]
    fn test_apply_reports_bad_column() {
        let info = TableInfo::<Ticket>::for_model().unwrap();
        let registry = SerializerRegistry::with_defaults();
        let mapper = RowMapper::new(&info, FieldCodec::new(&registry));

        let row: Row = [("status", Value::from("Pending"))].into_iter().collect();
        let err = mapper.apply(&mut Ticket::default(), &row).unwrap_err();
        match err {
            Error::Decode { column, .. } => assert_eq!(column, "Ticket.status"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
