use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Command;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// One result row keyed by column label. SQL `NULL` is `None`.
pub type Row = BTreeMap<String, Option<String>>;

pub trait SchemaConnection {
    fn execute(&mut self, sql: &str) -> Result<()>;

    fn query(&mut self, sql: &str) -> Result<Vec<Row>>;
}

/// One database server holding a copy of the schema, master or replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseServer {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub password: String,
    pub database: String,
}

fn default_port() -> u16 {
    3306
}

impl DatabaseServer {
    pub fn label(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.database)
    }
}

pub trait ConnectionFactory {
    fn connect(&self, server: &DatabaseServer) -> Result<Box<dyn SchemaConnection>>;
}

/// Runs statements through the `mysql` command line client in batch mode.
#[derive(Debug, Clone)]
pub struct MysqlCliConnection {
    binary: PathBuf,
    server: DatabaseServer,
}

impl MysqlCliConnection {
    pub fn new(binary: impl Into<PathBuf>, server: DatabaseServer) -> Self {
        Self {
            binary: binary.into(),
            server,
        }
    }

    fn run(&self, sql: &str) -> Result<String> {
        let output = Command::new(&self.binary)
            .arg("--batch")
            .arg("--default-character-set=utf8mb4")
            .arg("--host")
            .arg(&self.server.host)
            .arg("--port")
            .arg(self.server.port.to_string())
            .arg("--user")
            .arg(&self.server.user)
            .arg("--execute")
            .arg(sql)
            .arg(&self.server.database)
            .env("MYSQL_PWD", &self.server.password)
            .output()
            .with_context(|| {
                format!(
                    "failed launching {} for {}",
                    self.binary.display(),
                    self.server.label()
                )
            })?;
        if !output.status.success() {
            anyhow::bail!(
                "statement failed on {}: {}",
                self.server.label(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        String::from_utf8(output.stdout).context("mysql produced non-UTF-8 output")
    }
}

impl SchemaConnection for MysqlCliConnection {
    fn execute(&mut self, sql: &str) -> Result<()> {
        self.run(sql).map(|_| ())
    }

    fn query(&mut self, sql: &str) -> Result<Vec<Row>> {
        Ok(parse_batch_output(&self.run(sql)?))
    }
}

#[derive(Debug, Clone)]
pub struct MysqlCliFactory {
    binary: PathBuf,
}

impl MysqlCliFactory {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl ConnectionFactory for MysqlCliFactory {
    fn connect(&self, server: &DatabaseServer) -> Result<Box<dyn SchemaConnection>> {
        Ok(Box::new(MysqlCliConnection::new(
            self.binary.clone(),
            server.clone(),
        )))
    }
}

/// Parses tab separated `--batch` output: a header line, then one line per
/// row with backslash escapes and `NULL` for SQL null.
pub fn parse_batch_output(output: &str) -> Vec<Row> {
    let mut lines = output.lines();
    let Some(header) = lines.next() else {
        return Vec::new();
    };
    let labels: Vec<&str> = header.split('\t').collect();

    lines
        .filter(|line| !line.is_empty())
        .map(|line| {
            labels
                .iter()
                .zip(line.split('\t'))
                .map(|(label, value)| {
                    let value = match value {
                        "NULL" => None,
                        escaped => Some(unescape_batch_value(escaped)),
                    };
                    (label.to_string(), value)
                })
                .collect()
        })
        .collect()
}

fn unescape_batch_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('0') => out.push('\0'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}
