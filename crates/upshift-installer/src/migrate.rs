use anyhow::Result;
use upshift_schema::{auto_migrate, ConnectionFactory, DatabaseServer, MigrationSummary, Schema};

/// Brings the database schema up to the freshly installed release.
pub trait SchemaMigrator {
    fn migrate(&self) -> Result<MigrationSummary>;
}

/// Adds missing tables and columns on every configured server.
pub struct DatabaseSchemaMigrator {
    expected: Schema,
    servers: Vec<DatabaseServer>,
    factory: Box<dyn ConnectionFactory>,
    table_prefix: String,
}

impl DatabaseSchemaMigrator {
    pub fn new(
        expected: Schema,
        servers: Vec<DatabaseServer>,
        factory: Box<dyn ConnectionFactory>,
        table_prefix: impl Into<String>,
    ) -> Self {
        Self {
            expected,
            servers,
            factory,
            table_prefix: table_prefix.into(),
        }
    }
}

impl SchemaMigrator for DatabaseSchemaMigrator {
    fn migrate(&self) -> Result<MigrationSummary> {
        auto_migrate(
            &self.expected,
            &self.servers,
            self.factory.as_ref(),
            &self.table_prefix,
        )
    }
}

pub(crate) fn describe_migration(summary: &MigrationSummary) -> String {
    if summary.applied.is_empty() {
        "No database difference found.".to_string()
    } else {
        format!(
            "Database successfully migrated, {} fixes applied.",
            summary.applied.len()
        )
    }
}
