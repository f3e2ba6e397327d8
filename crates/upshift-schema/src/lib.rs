mod comparator;
mod connection;
mod difference;
mod fix;
mod introspect;
mod model;

pub use comparator::{diff, sort_differences};
pub use connection::{
    parse_batch_output, ConnectionFactory, DatabaseServer, MysqlCliConnection, MysqlCliFactory,
    Row, SchemaConnection,
};
pub use difference::{SchemaDifference, Severity};
pub use fix::{
    apply_fixes, auto_migrate, difference_report, list_differences, DifferenceReport,
    DifferenceSummary, MigrationSummary,
};
pub use introspect::{InformationSchemaBuilder, ObjectModel};
pub use model::{quote_identifier, quote_literal, ColumnSchema, KeyKind, KeySchema, Schema, TableSchema};

#[cfg(test)]
mod tests;
