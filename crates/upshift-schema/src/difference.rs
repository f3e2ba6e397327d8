use std::sync::Arc;

use anyhow::{Context, Result};

use crate::connection::SchemaConnection;
use crate::introspect::InformationSchemaBuilder;
use crate::model::{quote_identifier, ColumnSchema, KeySchema, TableSchema};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Informational,
    Recommended,
    Critical,
}

impl Severity {
    pub fn level(self) -> u8 {
        match self {
            Self::Informational => 0,
            Self::Recommended => 1,
            Self::Critical => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Informational => "informational",
            Self::Recommended => "recommended",
            Self::Critical => "critical",
        }
    }
}

/// One independently fixable discrepancy. `table` is always the expected
/// table, except for `ExtraTable` which only exists in the database.
/// Descriptions mark emphasized parts with `[n]...[/n]`.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaDifference {
    MissingTable {
        table: Arc<TableSchema>,
    },
    ExtraTable {
        table: Arc<TableSchema>,
    },
    MissingColumn {
        table: Arc<TableSchema>,
        column: Arc<ColumnSchema>,
    },
    ExtraColumn {
        table: Arc<TableSchema>,
        column: Arc<ColumnSchema>,
    },
    DifferentColumnDefinition {
        table: Arc<TableSchema>,
        column: Arc<ColumnSchema>,
        current: Arc<ColumnSchema>,
    },
    DifferentAutoIncrement {
        table: Arc<TableSchema>,
        column: Arc<ColumnSchema>,
        current: Arc<ColumnSchema>,
    },
    DifferentColumnsOrder {
        table: Arc<TableSchema>,
        current: Arc<TableSchema>,
    },
    MissingKey {
        table: Arc<TableSchema>,
        key: KeySchema,
    },
    ExtraKey {
        table: Arc<TableSchema>,
        key: KeySchema,
    },
    DifferentKey {
        table: Arc<TableSchema>,
        key: KeySchema,
        current: KeySchema,
    },
}

impl SchemaDifference {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingTable { .. } => "MissingTable",
            Self::ExtraTable { .. } => "ExtraTable",
            Self::MissingColumn { .. } => "MissingColumn",
            Self::ExtraColumn { .. } => "ExtraColumn",
            Self::DifferentColumnDefinition { .. } => "DifferentColumnDefinition",
            Self::DifferentAutoIncrement { .. } => "DifferentAutoIncrement",
            Self::DifferentColumnsOrder { .. } => "DifferentColumnsOrder",
            Self::MissingKey { .. } => "MissingKey",
            Self::ExtraKey { .. } => "ExtraKey",
            Self::DifferentKey { .. } => "DifferentKey",
        }
    }

    pub fn table(&self) -> &Arc<TableSchema> {
        match self {
            Self::MissingTable { table }
            | Self::ExtraTable { table }
            | Self::MissingColumn { table, .. }
            | Self::ExtraColumn { table, .. }
            | Self::DifferentColumnDefinition { table, .. }
            | Self::DifferentAutoIncrement { table, .. }
            | Self::DifferentColumnsOrder { table, .. }
            | Self::MissingKey { table, .. }
            | Self::ExtraKey { table, .. }
            | Self::DifferentKey { table, .. } => table,
        }
    }

    /// Stable identity: kind, table and, where it applies, column or key.
    pub fn id(&self) -> String {
        let table = &self.table().name;
        match self {
            Self::MissingTable { .. }
            | Self::ExtraTable { .. }
            | Self::DifferentColumnsOrder { .. } => format!("{}:{table}", self.kind()),
            Self::MissingColumn { column, .. }
            | Self::ExtraColumn { column, .. }
            | Self::DifferentColumnDefinition { column, .. }
            | Self::DifferentAutoIncrement { column, .. } => {
                format!("{}:{table}.{}", self.kind(), column.name)
            }
            Self::MissingKey { key, .. }
            | Self::ExtraKey { key, .. }
            | Self::DifferentKey { key, .. } => format!("{}:{table}.{}", self.kind(), key.name),
        }
    }

    pub fn describe(&self) -> String {
        let table = &self.table().name;
        match self {
            Self::MissingTable { .. } => format!("Table [1]{table}[/1] is missing"),
            Self::ExtraTable { .. } => {
                format!("Table [1]{table}[/1] is not part of the data model")
            }
            Self::MissingColumn { column, .. } => {
                format!("Column [1]{table}.{}[/1] is missing", column.name)
            }
            Self::ExtraColumn { column, .. } => {
                format!("Column [1]{table}.{}[/1] should not exist", column.name)
            }
            Self::DifferentColumnDefinition {
                column, current, ..
            } => format!(
                "Column [1]{table}.{}[/1] is defined as [2]{}[/2] instead of [3]{}[/3]",
                column.name,
                current.ddl(),
                column.ddl()
            ),
            Self::DifferentAutoIncrement { column, .. } if column.auto_increment => format!(
                "Column [1]{table}.{}[/1] should be marked as [2]AUTO_INCREMENT[/2]",
                column.name
            ),
            Self::DifferentAutoIncrement { column, .. } => format!(
                "Column [1]{table}.{}[/1] should [2]not[/2] be marked as [3]AUTO_INCREMENT[/3]",
                column.name
            ),
            Self::DifferentColumnsOrder { .. } => {
                format!("Columns in table [1]{table}[/1] are in wrong order")
            }
            Self::MissingKey { key, .. } => {
                format!("Key [1]{}[/1] is missing in table [2]{table}[/2]", key.name)
            }
            Self::ExtraKey { key, .. } => {
                format!("Table [1]{table}[/1] has an unexpected key [2]{}[/2]", key.name)
            }
            Self::DifferentKey { key, .. } => format!(
                "Key [1]{}[/1] of table [2]{table}[/2] is defined differently",
                key.name
            ),
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Self::MissingTable { .. }
            | Self::MissingColumn { .. }
            | Self::DifferentAutoIncrement { .. } => Severity::Critical,
            Self::ExtraColumn { .. }
            | Self::DifferentColumnDefinition { .. }
            | Self::DifferentColumnsOrder { .. }
            | Self::MissingKey { .. }
            | Self::DifferentKey { .. } => Severity::Recommended,
            Self::ExtraTable { .. } | Self::ExtraKey { .. } => Severity::Informational,
        }
    }

    /// Whether applying the fix can lose data.
    pub fn is_destructive(&self) -> bool {
        matches!(
            self,
            Self::ExtraTable { .. }
                | Self::ExtraColumn { .. }
                | Self::DifferentColumnDefinition { .. }
        )
    }

    /// Issues the corrective DDL for this difference on one connection.
    pub fn apply_fix(&self, connection: &mut dyn SchemaConnection) -> Result<()> {
        for statement in self.fix_statements(connection)? {
            connection
                .execute(&statement)
                .with_context(|| format!("failed fixing {}", self.id()))?;
        }
        Ok(())
    }

    fn fix_statements(&self, connection: &mut dyn SchemaConnection) -> Result<Vec<String>> {
        let table_name = quote_identifier(&self.table().name);
        let statements = match self {
            Self::MissingTable { table } => vec![table.create_ddl()],
            Self::ExtraTable { .. } => vec![format!("DROP TABLE {table_name}")],
            Self::MissingColumn { table, column } => {
                let existing = InformationSchemaBuilder::new(connection)
                    .current_columns(&table.name)?
                    .into_iter()
                    .map(|column| column.name)
                    .collect::<Vec<_>>();
                let position = table
                    .column_names()
                    .take_while(|name| *name != column.name)
                    .filter(|name| existing.iter().any(|current| current.as_str() == *name))
                    .last()
                    .map(|previous| format!(" AFTER {}", quote_identifier(previous)))
                    .unwrap_or_else(|| " FIRST".to_string());
                vec![format!(
                    "ALTER TABLE {table_name} ADD COLUMN {}{position}",
                    column.ddl()
                )]
            }
            Self::ExtraColumn { column, .. } => vec![format!(
                "ALTER TABLE {table_name} DROP COLUMN {}",
                quote_identifier(&column.name)
            )],
            Self::DifferentColumnDefinition {
                column, current, ..
            } => {
                let mut wanted = ColumnSchema::clone(column);
                wanted.auto_increment = current.auto_increment;
                vec![format!("ALTER TABLE {table_name} MODIFY COLUMN {}", wanted.ddl())]
            }
            Self::DifferentAutoIncrement { table, column, .. } => {
                let mut current = InformationSchemaBuilder::new(connection)
                    .current_column(&table.name, &column.name)?;
                current.auto_increment = column.auto_increment;
                vec![format!("ALTER TABLE {table_name} MODIFY COLUMN {}", current.ddl())]
            }
            Self::DifferentColumnsOrder { table, .. } => {
                let current_columns =
                    InformationSchemaBuilder::new(connection).current_columns(&table.name)?;
                let mut clauses = Vec::new();
                let mut previous: Option<&str> = None;
                for name in table.column_names() {
                    let Some(current) = current_columns.iter().find(|column| column.name == name)
                    else {
                        continue;
                    };
                    let position = match previous {
                        Some(previous) => format!(" AFTER {}", quote_identifier(previous)),
                        None => " FIRST".to_string(),
                    };
                    clauses.push(format!("  MODIFY COLUMN {}{position}", current.ddl()));
                    previous = Some(name);
                }
                vec![format!("ALTER TABLE {table_name}\n{}", clauses.join(",\n"))]
            }
            Self::MissingKey { key, .. } => {
                vec![format!("ALTER TABLE {table_name} ADD {}", key.ddl())]
            }
            Self::ExtraKey { key, .. } => {
                vec![format!("ALTER TABLE {table_name} {}", key.drop_ddl())]
            }
            Self::DifferentKey { key, current, .. } => vec![format!(
                "ALTER TABLE {table_name} {}, ADD {}",
                current.drop_ddl(),
                key.ddl()
            )],
        };
        Ok(statements)
    }
}
