use std::sync::Arc;

use crate::difference::SchemaDifference;
use crate::model::{Schema, TableSchema};

/// Every difference between the live schema and the expected one.
pub fn diff(actual: &Schema, expected: &Schema) -> Vec<SchemaDifference> {
    let mut differences = Vec::new();

    for table in expected.tables() {
        match actual.table(&table.name) {
            Some(current) => diff_table(table, current, &mut differences),
            None => differences.push(SchemaDifference::MissingTable {
                table: Arc::clone(table),
            }),
        }
    }

    for current in actual.tables() {
        if expected.table(&current.name).is_none() {
            differences.push(SchemaDifference::ExtraTable {
                table: Arc::clone(current),
            });
        }
    }

    differences
}

/// Severity descending, non-destructive first among equals. Stable, so the
/// comparison order survives otherwise.
pub fn sort_differences(differences: &mut [SchemaDifference]) {
    differences.sort_by(|left, right| {
        right
            .severity()
            .cmp(&left.severity())
            .then(left.is_destructive().cmp(&right.is_destructive()))
    });
}

fn diff_table(
    table: &Arc<TableSchema>,
    current: &Arc<TableSchema>,
    differences: &mut Vec<SchemaDifference>,
) {
    for column in &table.columns {
        let Some(current_column) = current.column(&column.name) else {
            differences.push(SchemaDifference::MissingColumn {
                table: Arc::clone(table),
                column: Arc::clone(column),
            });
            continue;
        };
        if !column.same_definition(current_column) {
            differences.push(SchemaDifference::DifferentColumnDefinition {
                table: Arc::clone(table),
                column: Arc::clone(column),
                current: Arc::clone(current_column),
            });
        }
        if column.auto_increment != current_column.auto_increment {
            differences.push(SchemaDifference::DifferentAutoIncrement {
                table: Arc::clone(table),
                column: Arc::clone(column),
                current: Arc::clone(current_column),
            });
        }
    }

    for current_column in &current.columns {
        if table.column(&current_column.name).is_none() {
            differences.push(SchemaDifference::ExtraColumn {
                table: Arc::clone(table),
                column: Arc::clone(current_column),
            });
        }
    }

    if columns_out_of_order(table, current) {
        differences.push(SchemaDifference::DifferentColumnsOrder {
            table: Arc::clone(table),
            current: Arc::clone(current),
        });
    }

    for key in &table.keys {
        match current.key(&key.name) {
            None => differences.push(SchemaDifference::MissingKey {
                table: Arc::clone(table),
                key: key.clone(),
            }),
            Some(current_key) if current_key.kind != key.kind || current_key.columns != key.columns => {
                differences.push(SchemaDifference::DifferentKey {
                    table: Arc::clone(table),
                    key: key.clone(),
                    current: current_key.clone(),
                });
            }
            Some(_) => {}
        }
    }
    for current_key in &current.keys {
        if table.key(&current_key.name).is_none() {
            differences.push(SchemaDifference::ExtraKey {
                table: Arc::clone(table),
                key: current_key.clone(),
            });
        }
    }
}

/// Compares the relative order of the columns both tables have.
fn columns_out_of_order(table: &TableSchema, current: &TableSchema) -> bool {
    let expected: Vec<&str> = table
        .column_names()
        .filter(|name| current.column(name).is_some())
        .collect();
    let actual: Vec<&str> = current
        .column_names()
        .filter(|name| table.column(name).is_some())
        .collect();
    expected != actual
}
