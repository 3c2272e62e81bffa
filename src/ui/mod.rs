pub mod table;

pub use table::{tables_table, TableBuilder};
