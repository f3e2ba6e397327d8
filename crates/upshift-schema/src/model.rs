use std::sync::Arc;

use serde::{Deserialize, Serialize};

const INTEGER_TYPES: &[&str] = &["tinyint", "smallint", "mediumint", "int", "integer", "bigint"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub auto_increment: bool,
    #[serde(default)]
    pub charset: Option<String>,
    #[serde(default)]
    pub collation: Option<String>,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable: false,
            default: None,
            auto_increment: false,
            charset: None,
            collation: None,
        }
    }

    /// Compares type, nullability, default and collation. The collation is
    /// only compared when both sides name one; auto increment is separate.
    pub fn same_definition(&self, other: &ColumnSchema) -> bool {
        let collation_matches = match (&self.collation, &other.collation) {
            (Some(left), Some(right)) => left.eq_ignore_ascii_case(right),
            _ => true,
        };
        normalize_type(&self.data_type) == normalize_type(&other.data_type)
            && self.nullable == other.nullable
            && self.default == other.default
            && collation_matches
    }

    pub fn ddl(&self) -> String {
        let mut ddl = format!("{} {}", quote_identifier(&self.name), self.data_type);
        if let Some(charset) = &self.charset {
            ddl.push_str(&format!(" CHARACTER SET {charset}"));
        }
        if let Some(collation) = &self.collation {
            ddl.push_str(&format!(" COLLATE {collation}"));
        }
        ddl.push_str(if self.nullable { " NULL" } else { " NOT NULL" });
        match &self.default {
            Some(value) => {
                ddl.push_str(" DEFAULT ");
                ddl.push_str(&render_default(value));
            }
            None if self.nullable => ddl.push_str(" DEFAULT NULL"),
            None => {}
        }
        if self.auto_increment {
            ddl.push_str(" AUTO_INCREMENT");
        }
        ddl
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyKind {
    Primary,
    Unique,
    Index,
    Fulltext,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySchema {
    pub name: String,
    pub kind: KeyKind,
    pub columns: Vec<String>,
}

impl KeySchema {
    pub fn ddl(&self) -> String {
        let columns = self
            .columns
            .iter()
            .map(|column| quote_identifier(column))
            .collect::<Vec<_>>()
            .join(", ");
        match self.kind {
            KeyKind::Primary => format!("PRIMARY KEY ({columns})"),
            KeyKind::Unique => format!("UNIQUE KEY {} ({columns})", quote_identifier(&self.name)),
            KeyKind::Index => format!("KEY {} ({columns})", quote_identifier(&self.name)),
            KeyKind::Fulltext => {
                format!("FULLTEXT KEY {} ({columns})", quote_identifier(&self.name))
            }
        }
    }

    pub fn drop_ddl(&self) -> String {
        match self.kind {
            KeyKind::Primary => "DROP PRIMARY KEY".to_string(),
            _ => format!("DROP INDEX {}", quote_identifier(&self.name)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TableSchema {
    pub name: String,
    pub engine: Option<String>,
    pub charset: Option<String>,
    pub collation: Option<String>,
    pub columns: Vec<Arc<ColumnSchema>>,
    pub keys: Vec<KeySchema>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn column(&self, name: &str) -> Option<&Arc<ColumnSchema>> {
        self.columns.iter().find(|column| column.name == name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|column| column.name.as_str())
    }

    pub fn key(&self, name: &str) -> Option<&KeySchema> {
        self.keys.iter().find(|key| key.name == name)
    }

    pub fn create_ddl(&self) -> String {
        let mut lines: Vec<String> = self
            .columns
            .iter()
            .map(|column| format!("  {}", column.ddl()))
            .collect();
        lines.extend(self.keys.iter().map(|key| format!("  {}", key.ddl())));

        let mut ddl = format!(
            "CREATE TABLE {} (\n{}\n)",
            quote_identifier(&self.name),
            lines.join(",\n")
        );
        if let Some(engine) = &self.engine {
            ddl.push_str(&format!(" ENGINE={engine}"));
        }
        if let Some(charset) = &self.charset {
            ddl.push_str(&format!(" DEFAULT CHARSET={charset}"));
        }
        if let Some(collation) = &self.collation {
            ddl.push_str(&format!(" COLLATE={collation}"));
        }
        ddl
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Schema {
    tables: Vec<Arc<TableSchema>>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, table: TableSchema) {
        self.tables.push(Arc::new(table));
    }

    pub fn tables(&self) -> &[Arc<TableSchema>] {
        &self.tables
    }

    pub fn table(&self, name: &str) -> Option<&Arc<TableSchema>> {
        self.tables.iter().find(|table| table.name == name)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
}

fn render_default(value: &str) -> String {
    let upper = value.to_ascii_uppercase();
    if upper.starts_with("CURRENT_TIMESTAMP") || value.parse::<f64>().is_ok() {
        value.to_string()
    } else {
        quote_literal(value)
    }
}

/// Lowercases, collapses whitespace and drops integer display widths, which
/// newer servers no longer report.
fn normalize_type(data_type: &str) -> String {
    let collapsed = data_type
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_lowercase();
    let Some(open) = collapsed.find('(') else {
        return collapsed;
    };
    if !INTEGER_TYPES.contains(&&collapsed[..open]) {
        return collapsed;
    }
    match collapsed[open..].find(')') {
        Some(close) => format!("{}{}", &collapsed[..open], &collapsed[open + close + 1..]),
        None => collapsed,
    }
}
