use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use crate::connection::{Row, SchemaConnection};
use crate::model::{quote_literal, ColumnSchema, KeyKind, KeySchema, Schema, TableSchema};

/// Expected schema as declared by the application's data model, without
/// the installation's table prefix.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ObjectModel {
    #[serde(default)]
    tables: Vec<TableDefinition>,
}

#[derive(Debug, Clone, Deserialize)]
struct TableDefinition {
    name: String,
    engine: Option<String>,
    charset: Option<String>,
    collation: Option<String>,
    #[serde(default)]
    columns: Vec<ColumnSchema>,
    #[serde(default)]
    keys: Vec<KeySchema>,
}

impl ObjectModel {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let model: Self = toml::from_str(input).context("failed to parse object model")?;
        model.validate()?;
        Ok(model)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed reading object model {}", path.display()))?;
        Self::from_toml_str(&raw).with_context(|| format!("invalid object model {}", path.display()))
    }

    pub fn schema(&self, table_prefix: &str) -> Schema {
        let mut schema = Schema::new();
        for definition in &self.tables {
            schema.push(TableSchema {
                name: format!("{table_prefix}{}", definition.name),
                engine: definition.engine.clone(),
                charset: definition.charset.clone(),
                collation: definition.collation.clone(),
                columns: definition.columns.iter().cloned().map(Arc::new).collect(),
                keys: definition.keys.clone(),
            });
        }
        schema
    }

    fn validate(&self) -> Result<()> {
        let mut tables = BTreeSet::new();
        for table in &self.tables {
            if !tables.insert(table.name.as_str()) {
                return Err(anyhow!("table '{}' is declared twice", table.name));
            }

            let mut columns = BTreeSet::new();
            for column in &table.columns {
                if !columns.insert(column.name.as_str()) {
                    return Err(anyhow!(
                        "column '{}.{}' is declared twice",
                        table.name,
                        column.name
                    ));
                }
            }
            if table.columns.iter().filter(|column| column.auto_increment).count() > 1 {
                return Err(anyhow!(
                    "table '{}' declares more than one auto increment column",
                    table.name
                ));
            }

            let primary_keys = table
                .keys
                .iter()
                .filter(|key| key.kind == KeyKind::Primary)
                .count();
            if primary_keys > 1 {
                return Err(anyhow!("table '{}' declares more than one primary key", table.name));
            }
            for key in &table.keys {
                if let Some(unknown) = key.columns.iter().find(|name| !columns.contains(name.as_str())) {
                    return Err(anyhow!(
                        "key '{}' of table '{}' references unknown column '{unknown}'",
                        key.name,
                        table.name
                    ));
                }
            }
        }
        Ok(())
    }
}

const TABLES_QUERY: &str = "SELECT TABLE_NAME, ENGINE, TABLE_COLLATION FROM information_schema.TABLES WHERE TABLE_SCHEMA = DATABASE() AND TABLE_TYPE = 'BASE TABLE' ORDER BY TABLE_NAME";
const COLUMNS_QUERY: &str = "SELECT TABLE_NAME, COLUMN_NAME, COLUMN_TYPE, IS_NULLABLE, COLUMN_DEFAULT, EXTRA, CHARACTER_SET_NAME, COLLATION_NAME FROM information_schema.COLUMNS WHERE TABLE_SCHEMA = DATABASE()";
const KEYS_QUERY: &str = "SELECT TABLE_NAME, INDEX_NAME, NON_UNIQUE, COLUMN_NAME, INDEX_TYPE FROM information_schema.STATISTICS WHERE TABLE_SCHEMA = DATABASE() ORDER BY TABLE_NAME, INDEX_NAME, SEQ_IN_INDEX";

/// Reads the live schema of the connected database.
pub struct InformationSchemaBuilder<'a> {
    connection: &'a mut dyn SchemaConnection,
    table_prefix: Option<String>,
}

impl<'a> InformationSchemaBuilder<'a> {
    pub fn new(connection: &'a mut dyn SchemaConnection) -> Self {
        Self {
            connection,
            table_prefix: None,
        }
    }

    /// Only tables whose name starts with `prefix` are read.
    pub fn with_table_prefix(mut self, prefix: &str) -> Self {
        if !prefix.is_empty() {
            self.table_prefix = Some(prefix.to_string());
        }
        self
    }

    pub fn schema(&mut self) -> Result<Schema> {
        let table_rows = self.connection.query(TABLES_QUERY)?;
        let column_rows = self
            .connection
            .query(&format!("{COLUMNS_QUERY} ORDER BY TABLE_NAME, ORDINAL_POSITION"))?;
        let key_rows = self.connection.query(KEYS_QUERY)?;

        let mut schema = Schema::new();
        for row in &table_rows {
            let name = required(row, "TABLE_NAME")?;
            if !self.wants_table(name) {
                continue;
            }
            let collation = optional(row, "TABLE_COLLATION");
            let columns = column_rows
                .iter()
                .filter(|row| optional(row, "TABLE_NAME").as_deref() == Some(name))
                .map(column_from_row)
                .collect::<Result<Vec<_>>>()?;
            schema.push(TableSchema {
                name: name.to_string(),
                engine: optional(row, "ENGINE"),
                charset: collation.as_deref().and_then(charset_of_collation),
                collation,
                columns: columns.into_iter().map(Arc::new).collect(),
                keys: keys_from_rows(&key_rows, name)?,
            });
        }
        Ok(schema)
    }

    pub fn current_columns(&mut self, table: &str) -> Result<Vec<ColumnSchema>> {
        let rows = self.connection.query(&format!(
            "{COLUMNS_QUERY} AND TABLE_NAME = {} ORDER BY ORDINAL_POSITION",
            quote_literal(table)
        ))?;
        rows.iter()
            .filter(|row| optional(row, "TABLE_NAME").as_deref() == Some(table))
            .map(column_from_row)
            .collect()
    }

    pub fn current_column(&mut self, table: &str, column: &str) -> Result<ColumnSchema> {
        self.current_columns(table)?
            .into_iter()
            .find(|current| current.name == column)
            .ok_or_else(|| anyhow!("column '{table}.{column}' does not exist"))
    }

    fn wants_table(&self, name: &str) -> bool {
        self.table_prefix
            .as_deref()
            .map(|prefix| name.starts_with(prefix))
            .unwrap_or(true)
    }
}

fn column_from_row(row: &Row) -> Result<ColumnSchema> {
    let extra = optional(row, "EXTRA").unwrap_or_default();
    Ok(ColumnSchema {
        name: required(row, "COLUMN_NAME")?.to_string(),
        data_type: required(row, "COLUMN_TYPE")?.to_string(),
        nullable: optional(row, "IS_NULLABLE").as_deref() == Some("YES"),
        default: optional(row, "COLUMN_DEFAULT").and_then(|value| normalize_default(&value)),
        auto_increment: extra.to_ascii_lowercase().contains("auto_increment"),
        charset: optional(row, "CHARACTER_SET_NAME"),
        collation: optional(row, "COLLATION_NAME"),
    })
}

fn keys_from_rows(rows: &[Row], table: &str) -> Result<Vec<KeySchema>> {
    let mut keys: Vec<KeySchema> = Vec::new();
    for row in rows {
        if optional(row, "TABLE_NAME").as_deref() != Some(table) {
            continue;
        }
        let name = required(row, "INDEX_NAME")?;
        let column = required(row, "COLUMN_NAME")?.to_string();
        if let Some(existing) = keys.iter_mut().find(|key| key.name == name) {
            existing.columns.push(column);
            continue;
        }
        let kind = if name == "PRIMARY" {
            KeyKind::Primary
        } else if optional(row, "INDEX_TYPE").as_deref() == Some("FULLTEXT") {
            KeyKind::Fulltext
        } else if optional(row, "NON_UNIQUE").as_deref() == Some("0") {
            KeyKind::Unique
        } else {
            KeyKind::Index
        };
        keys.push(KeySchema {
            name: name.to_string(),
            kind,
            columns: vec![column],
        });
    }
    Ok(keys)
}

/// Servers differ in how they report defaults; some quote string literals
/// and report a literal `NULL`.
fn normalize_default(value: &str) -> Option<String> {
    if value.eq_ignore_ascii_case("NULL") {
        return None;
    }
    let unquoted = value
        .strip_prefix('\'')
        .and_then(|rest| rest.strip_suffix('\''))
        .map(|inner| inner.replace("''", "'"))
        .unwrap_or_else(|| value.to_string());
    Some(unquoted)
}

fn charset_of_collation(collation: &str) -> Option<String> {
    collation
        .split_once('_')
        .map(|(charset, _)| charset.to_string())
}

fn required<'r>(row: &'r Row, field: &str) -> Result<&'r str> {
    row.get(field)
        .and_then(|value| value.as_deref())
        .ok_or_else(|| anyhow!("information schema row lacks {field}"))
}

fn optional(row: &Row, field: &str) -> Option<String> {
    row.get(field).cloned().flatten()
}
