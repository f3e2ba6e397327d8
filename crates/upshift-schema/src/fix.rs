use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info};

use crate::comparator::{diff, sort_differences};
use crate::connection::{ConnectionFactory, DatabaseServer, SchemaConnection};
use crate::difference::{SchemaDifference, Severity};
use crate::introspect::InformationSchemaBuilder;
use crate::model::Schema;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DifferenceSummary {
    pub id: String,
    pub description: String,
    pub severity: u8,
    pub destructive: bool,
}

impl From<&SchemaDifference> for DifferenceSummary {
    fn from(difference: &SchemaDifference) -> Self {
        Self {
            id: difference.id(),
            description: difference.describe(),
            severity: difference.severity().level(),
            destructive: difference.is_destructive(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DifferenceReport {
    pub success: bool,
    pub differences: Vec<DifferenceSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DifferenceReport {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            differences: Vec::new(),
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationSummary {
    pub servers: usize,
    pub applied: Vec<String>,
    /// Differences left for manual review on the first server.
    pub remaining: usize,
}

/// Differences worth showing, sorted for display. Informational ones are
/// left out.
pub fn list_differences(
    expected: &Schema,
    connection: &mut dyn SchemaConnection,
    table_prefix: &str,
) -> Result<Vec<SchemaDifference>> {
    let actual = InformationSchemaBuilder::new(connection)
        .with_table_prefix(table_prefix)
        .schema()
        .context("failed reading the database schema")?;
    let mut differences: Vec<SchemaDifference> = diff(&actual, expected)
        .into_iter()
        .filter(|difference| difference.severity() != Severity::Informational)
        .collect();
    sort_differences(&mut differences);
    Ok(differences)
}

pub fn difference_report(
    expected: &Schema,
    connection: &mut dyn SchemaConnection,
    table_prefix: &str,
) -> DifferenceReport {
    match list_differences(expected, connection, table_prefix) {
        Ok(differences) => DifferenceReport {
            success: true,
            differences: differences.iter().map(DifferenceSummary::from).collect(),
            error: None,
        },
        Err(err) => DifferenceReport::failed(format!("{err:#}")),
    }
}

/// Applies the differences named by `ids` on every server. Differences are
/// recomputed per server, so ids already fixed there are skipped.
pub fn apply_fixes(
    expected: &Schema,
    servers: &[DatabaseServer],
    factory: &dyn ConnectionFactory,
    table_prefix: &str,
    ids: &[String],
) -> Result<usize> {
    let mut applied = 0;
    for server in servers {
        let mut connection = factory
            .connect(server)
            .with_context(|| format!("failed connecting to {}", server.label()))?;
        let differences = list_differences(expected, connection.as_mut(), table_prefix)?;
        for difference in differences
            .iter()
            .filter(|difference| ids.contains(&difference.id()))
        {
            difference
                .apply_fix(connection.as_mut())
                .with_context(|| format!("on {}", server.label()))?;
            info!(id = %difference.id(), server = %server.label(), "applied schema fix");
            applied += 1;
        }
    }
    Ok(applied)
}

/// Adds missing tables and columns on every server. Nothing else is
/// touched since only these fixes cannot lose data.
pub fn auto_migrate(
    expected: &Schema,
    servers: &[DatabaseServer],
    factory: &dyn ConnectionFactory,
    table_prefix: &str,
) -> Result<MigrationSummary> {
    let mut summary = MigrationSummary::default();
    for (index, server) in servers.iter().enumerate() {
        let mut connection = factory
            .connect(server)
            .with_context(|| format!("failed connecting to {}", server.label()))?;
        let differences = list_differences(expected, connection.as_mut(), table_prefix)?;

        let (additive, others): (Vec<_>, Vec<_>) =
            differences.into_iter().partition(|difference| {
                matches!(
                    difference,
                    SchemaDifference::MissingTable { .. } | SchemaDifference::MissingColumn { .. }
                )
            });
        for difference in &additive {
            difference
                .apply_fix(connection.as_mut())
                .with_context(|| format!("on {}", server.label()))?;
            debug!(id = %difference.id(), server = %server.label(), "migrated schema");
            if index == 0 {
                summary.applied.push(difference.id());
            }
        }
        if index == 0 {
            summary.remaining = others.len();
        }
        summary.servers += 1;
    }
    Ok(summary)
}
