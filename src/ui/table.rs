use crate::storage::TableSummary;
use tabled::{settings::Style, Table, Tabled};

#[derive(Tabled)]
pub struct TableRow {
    #[tabled(rename = "Table")]
    pub name: String,
    #[tabled(rename = "Kind")]
    pub kind: String,
    #[tabled(rename = "Rows")]
    pub rows: usize,
}

#[derive(Default)]
pub struct TableBuilder {
    rows: Vec<TableRow>,
}

impl TableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_row(&mut self, summary: &TableSummary) {
        self.rows.push(TableRow {
            name: summary.name.clone(),
            kind: summary.resource.to_string(),
            rows: summary.rows,
        });
    }

    pub fn build(&self) -> String {
        if self.rows.is_empty() {
            return String::new();
        }

        Table::new(&self.rows).with(Style::rounded()).to_string()
    }
}

pub fn tables_table(tables: &[TableSummary]) -> String {
    let mut builder = TableBuilder::new();
    for summary in tables {
        builder.add_row(summary);
    }
    builder.build()
}
