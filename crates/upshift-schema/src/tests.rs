use super::*;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use anyhow::{anyhow, Result};

const MODEL: &str = r#"
[[tables]]
name = "product"
engine = "InnoDB"
charset = "utf8mb4"
collation = "utf8mb4_unicode_ci"

[[tables.columns]]
name = "id_product"
type = "int(10) unsigned"
auto_increment = true

[[tables.columns]]
name = "reference"
type = "varchar(64)"
nullable = true

[[tables.columns]]
name = "price"
type = "decimal(20,6)"
default = "0.000000"

[[tables.keys]]
name = "PRIMARY"
kind = "primary"
columns = ["id_product"]

[[tables.keys]]
name = "reference"
kind = "index"
columns = ["reference"]

[[tables]]
name = "configuration"
engine = "InnoDB"

[[tables.columns]]
name = "id_configuration"
type = "int(10) unsigned"
auto_increment = true

[[tables.columns]]
name = "name"
type = "varchar(254)"

[[tables.columns]]
name = "value"
type = "text"
nullable = true

[[tables.keys]]
name = "PRIMARY"
kind = "primary"
columns = ["id_configuration"]
"#;

const PREFIX: &str = "app_";

fn expected_schema() -> Schema {
    ObjectModel::from_toml_str(MODEL)
        .expect("object model must parse")
        .schema(PREFIX)
}

fn owned_tables(schema: &Schema) -> Vec<TableSchema> {
    schema
        .tables()
        .iter()
        .map(|table| TableSchema::clone(table))
        .collect()
}

fn schema_from(tables: &[TableSchema]) -> Schema {
    let mut schema = Schema::new();
    for table in tables {
        schema.push(table.clone());
    }
    schema
}

fn without_column(tables: &mut [TableSchema], table: &str, column: &str) {
    let table = tables
        .iter_mut()
        .find(|candidate| candidate.name == table)
        .expect("table must exist");
    table.columns.retain(|candidate| candidate.name != column);
    table
        .keys
        .retain(|key| !key.columns.iter().any(|name| name == column));
}

#[derive(Default)]
struct FakeDatabase {
    tables: Vec<TableSchema>,
    reference: Schema,
    statements: Vec<String>,
}

impl FakeDatabase {
    fn new(tables: Vec<TableSchema>) -> Self {
        Self {
            tables,
            reference: expected_schema(),
            statements: Vec::new(),
        }
    }

    fn table_rows(&self) -> Vec<Row> {
        self.tables
            .iter()
            .map(|table| {
                let mut row = Row::new();
                row.insert("TABLE_NAME".to_string(), Some(table.name.clone()));
                row.insert("ENGINE".to_string(), table.engine.clone());
                row.insert("TABLE_COLLATION".to_string(), table.collation.clone());
                row
            })
            .collect()
    }

    fn column_rows(&self) -> Vec<Row> {
        let mut rows = Vec::new();
        for table in &self.tables {
            for column in &table.columns {
                let mut row = Row::new();
                row.insert("TABLE_NAME".to_string(), Some(table.name.clone()));
                row.insert("COLUMN_NAME".to_string(), Some(column.name.clone()));
                row.insert("COLUMN_TYPE".to_string(), Some(column.data_type.clone()));
                row.insert(
                    "IS_NULLABLE".to_string(),
                    Some(if column.nullable { "YES" } else { "NO" }.to_string()),
                );
                row.insert("COLUMN_DEFAULT".to_string(), column.default.clone());
                row.insert(
                    "EXTRA".to_string(),
                    Some(if column.auto_increment { "auto_increment" } else { "" }.to_string()),
                );
                row.insert("CHARACTER_SET_NAME".to_string(), column.charset.clone());
                row.insert("COLLATION_NAME".to_string(), column.collation.clone());
                rows.push(row);
            }
        }
        rows
    }

    fn key_rows(&self) -> Vec<Row> {
        let mut rows = Vec::new();
        for table in &self.tables {
            for key in &table.keys {
                for column in &key.columns {
                    let mut row = Row::new();
                    row.insert("TABLE_NAME".to_string(), Some(table.name.clone()));
                    row.insert("INDEX_NAME".to_string(), Some(key.name.clone()));
                    let non_unique = matches!(key.kind, KeyKind::Index | KeyKind::Fulltext);
                    row.insert(
                        "NON_UNIQUE".to_string(),
                        Some(if non_unique { "1" } else { "0" }.to_string()),
                    );
                    row.insert("COLUMN_NAME".to_string(), Some(column.clone()));
                    let index_type = if key.kind == KeyKind::Fulltext { "FULLTEXT" } else { "BTREE" };
                    row.insert("INDEX_TYPE".to_string(), Some(index_type.to_string()));
                    rows.push(row);
                }
            }
        }
        rows
    }

    fn apply(&mut self, sql: &str) -> Result<()> {
        self.statements.push(sql.to_string());
        if let Some(name) = backticked_after(sql, "CREATE TABLE ") {
            let table = self
                .reference
                .table(&name)
                .ok_or_else(|| anyhow!("unknown table {name}"))?;
            self.tables.push(TableSchema::clone(table));
            return Ok(());
        }
        if let (Some(table_name), Some(column_name)) = (
            backticked_after(sql, "ALTER TABLE "),
            backticked_after(sql, "ADD COLUMN "),
        ) {
            let column = self
                .reference
                .table(&table_name)
                .and_then(|table| table.column(&column_name))
                .cloned()
                .ok_or_else(|| anyhow!("unknown column {table_name}.{column_name}"))?;
            let table = self
                .tables
                .iter_mut()
                .find(|table| table.name == table_name)
                .ok_or_else(|| anyhow!("table {table_name} does not exist"))?;
            let position = match backticked_after(sql, " AFTER ") {
                Some(previous) => table
                    .columns
                    .iter()
                    .position(|column| column.name == previous)
                    .map(|index| index + 1)
                    .ok_or_else(|| anyhow!("column {previous} does not exist"))?,
                None => 0,
            };
            table.columns.insert(position, column);
        }
        Ok(())
    }
}

fn backticked_after(sql: &str, marker: &str) -> Option<String> {
    let start = sql.find(marker)? + marker.len();
    let rest = sql[start..].strip_prefix('`')?;
    let end = rest.find('`')?;
    Some(rest[..end].to_string())
}

struct FakeConnection {
    database: Rc<RefCell<FakeDatabase>>,
}

impl SchemaConnection for FakeConnection {
    fn execute(&mut self, sql: &str) -> Result<()> {
        self.database.borrow_mut().apply(sql)
    }

    fn query(&mut self, sql: &str) -> Result<Vec<Row>> {
        let database = self.database.borrow();
        if sql.contains("information_schema.TABLES") {
            Ok(database.table_rows())
        } else if sql.contains("information_schema.COLUMNS") {
            Ok(database.column_rows())
        } else if sql.contains("information_schema.STATISTICS") {
            Ok(database.key_rows())
        } else {
            Err(anyhow!("unexpected query {sql}"))
        }
    }
}

struct FakeFactory {
    databases: Vec<Rc<RefCell<FakeDatabase>>>,
}

impl ConnectionFactory for FakeFactory {
    fn connect(&self, server: &DatabaseServer) -> Result<Box<dyn SchemaConnection>> {
        let index: usize = server.host.parse()?;
        let database = self
            .databases
            .get(index)
            .ok_or_else(|| anyhow!("no fake database {index}"))?;
        Ok(Box::new(FakeConnection {
            database: Rc::clone(database),
        }))
    }
}

fn servers(count: usize) -> Vec<DatabaseServer> {
    (0..count)
        .map(|index| DatabaseServer {
            host: index.to_string(),
            port: 3306,
            user: "app".to_string(),
            password: String::new(),
            database: "app".to_string(),
        })
        .collect()
}

#[test]
fn object_model_applies_table_prefix_in_declared_order() {
    let schema = expected_schema();

    let names: Vec<&str> = schema.tables().iter().map(|table| table.name.as_str()).collect();
    assert_eq!(names, vec!["app_product", "app_configuration"]);
    let product = schema.table("app_product").expect("product table must exist");
    let columns: Vec<&str> = product.column_names().collect();
    assert_eq!(columns, vec!["id_product", "reference", "price"]);
    assert!(product.column("id_product").expect("column must exist").auto_increment);
}

#[test]
fn object_model_rejects_key_on_unknown_column() {
    let err = ObjectModel::from_toml_str(
        r#"
[[tables]]
name = "broken"

[[tables.columns]]
name = "id"
type = "int"

[[tables.keys]]
name = "PRIMARY"
kind = "primary"
columns = ["missing"]
"#,
    )
    .expect_err("must reject model");

    assert!(err.to_string().contains("unknown column 'missing'"));
}

#[test]
fn object_model_rejects_duplicate_columns() {
    let err = ObjectModel::from_toml_str(
        r#"
[[tables]]
name = "broken"

[[tables.columns]]
name = "id"
type = "int"

[[tables.columns]]
name = "id"
type = "int"
"#,
    )
    .expect_err("must reject model");

    assert!(err.to_string().contains("declared twice"));
}

#[test]
fn diff_of_schema_against_itself_is_empty() {
    let schema = expected_schema();
    assert!(diff(&schema, &schema).is_empty());
}

#[test]
fn single_missing_column_yields_one_stable_difference() {
    let expected = expected_schema();
    let mut tables = owned_tables(&expected);
    without_column(&mut tables, "app_configuration", "value");
    let actual = schema_from(&tables);

    let first = diff(&actual, &expected);
    let second = diff(&actual, &expected);

    assert_eq!(first.len(), 1);
    assert_eq!(first[0].kind(), "MissingColumn");
    assert_eq!(first[0].id(), "MissingColumn:app_configuration.value");
    assert_eq!(first[0].id(), second[0].id());
    assert_eq!(
        first[0].describe(),
        "Column [1]app_configuration.value[/1] is missing"
    );
}

#[test]
fn diff_reports_missing_and_extra_tables() {
    let expected = expected_schema();
    let mut tables = owned_tables(&expected);
    tables.retain(|table| table.name != "app_product");
    tables.push(TableSchema::new("app_legacy"));
    let actual = schema_from(&tables);

    let ids: Vec<String> = diff(&actual, &expected).iter().map(SchemaDifference::id).collect();

    assert_eq!(ids, vec!["MissingTable:app_product", "ExtraTable:app_legacy"]);
}

#[test]
fn diff_reports_definition_auto_increment_and_extra_column() {
    let expected = expected_schema();
    let mut tables = owned_tables(&expected);
    let product = &mut tables[0];
    let mut id = ColumnSchema::clone(&product.columns[0]);
    id.auto_increment = false;
    product.columns[0] = Arc::new(id);
    let mut price = ColumnSchema::clone(&product.columns[2]);
    price.data_type = "decimal(10,2)".to_string();
    product.columns[2] = Arc::new(price);
    product.columns.push(Arc::new(ColumnSchema::new("legacy", "int(1)")));
    let actual = schema_from(&tables);

    let differences = diff(&actual, &expected);
    let ids: Vec<String> = differences.iter().map(SchemaDifference::id).collect();

    assert_eq!(
        ids,
        vec![
            "DifferentAutoIncrement:app_product.id_product",
            "DifferentColumnDefinition:app_product.price",
            "ExtraColumn:app_product.legacy",
        ]
    );
    assert!(differences[2].is_destructive());
    assert_eq!(differences[0].severity(), Severity::Critical);
}

#[test]
fn integer_display_width_is_not_a_definition_difference() {
    let expected = expected_schema();
    let mut tables = owned_tables(&expected);
    let mut id = ColumnSchema::clone(&tables[0].columns[0]);
    id.data_type = "int unsigned".to_string();
    tables[0].columns[0] = Arc::new(id);

    assert!(diff(&schema_from(&tables), &expected).is_empty());
}

#[test]
fn diff_reports_column_order_once_per_table() {
    let expected = expected_schema();
    let mut tables = owned_tables(&expected);
    tables[0].columns.swap(1, 2);
    tables[1].columns.swap(0, 2);
    let actual = schema_from(&tables);

    let ids: Vec<String> = diff(&actual, &expected).iter().map(SchemaDifference::id).collect();

    assert_eq!(
        ids,
        vec![
            "DifferentColumnsOrder:app_product",
            "DifferentColumnsOrder:app_configuration",
        ]
    );
}

#[test]
fn diff_reports_key_differences() {
    let expected = expected_schema();
    let mut tables = owned_tables(&expected);
    tables[0].keys[1].kind = KeyKind::Unique;
    tables[1].keys.push(KeySchema {
        name: "name".to_string(),
        kind: KeyKind::Index,
        columns: vec!["name".to_string()],
    });
    tables[1].keys.retain(|key| key.kind != KeyKind::Primary);
    let actual = schema_from(&tables);

    let ids: Vec<String> = diff(&actual, &expected).iter().map(SchemaDifference::id).collect();

    assert_eq!(
        ids,
        vec![
            "DifferentKey:app_product.reference",
            "MissingKey:app_configuration.PRIMARY",
            "ExtraKey:app_configuration.name",
        ]
    );
}

#[test]
fn sorted_differences_put_severity_first_then_non_destructive() {
    let expected = expected_schema();
    let mut tables = owned_tables(&expected);
    tables[0].columns.push(Arc::new(ColumnSchema::new("legacy", "int")));
    tables[0].columns.swap(0, 1);
    without_column(&mut tables, "app_configuration", "value");
    tables.push(TableSchema::new("app_legacy"));
    let actual = schema_from(&tables);

    let mut differences = diff(&actual, &expected);
    sort_differences(&mut differences);

    for pair in differences.windows(2) {
        let (left, right) = (&pair[0], &pair[1]);
        assert!(left.severity() >= right.severity());
        if left.severity() == right.severity() {
            assert!(!left.is_destructive() || right.is_destructive());
        }
    }
    assert_eq!(differences[0].kind(), "MissingColumn");
    assert_eq!(
        differences.last().map(SchemaDifference::kind),
        Some("ExtraTable")
    );
}

#[test]
fn information_schema_builder_reads_back_live_schema() {
    let expected = expected_schema();
    let mut database = FakeConnection {
        database: Rc::new(RefCell::new(FakeDatabase::new(owned_tables(&expected)))),
    };

    let actual = InformationSchemaBuilder::new(&mut database)
        .with_table_prefix(PREFIX)
        .schema()
        .expect("must read schema");

    assert!(diff(&actual, &expected).is_empty());
    let product = actual.table("app_product").expect("table must exist");
    assert_eq!(product.charset.as_deref(), Some("utf8mb4"));
    assert_eq!(product.keys[0].kind, KeyKind::Primary);
}

#[test]
fn information_schema_builder_skips_foreign_tables() {
    let mut tables = owned_tables(&expected_schema());
    tables.push(TableSchema::new("other_app_table"));
    let mut database = FakeConnection {
        database: Rc::new(RefCell::new(FakeDatabase::new(tables))),
    };

    let actual = InformationSchemaBuilder::new(&mut database)
        .with_table_prefix(PREFIX)
        .schema()
        .expect("must read schema");

    assert!(actual.table("other_app_table").is_none());
    assert_eq!(actual.len(), 2);
}

#[test]
fn missing_column_fix_is_idempotent_across_servers() {
    let expected = expected_schema();
    let mut tables = owned_tables(&expected);
    without_column(&mut tables, "app_product", "reference");
    let master = Rc::new(RefCell::new(FakeDatabase::new(tables.clone())));
    let replica = Rc::new(RefCell::new(FakeDatabase::new(tables)));
    let factory = FakeFactory {
        databases: vec![Rc::clone(&master), Rc::clone(&replica)],
    };
    let ids = vec!["MissingColumn:app_product.reference".to_string()];

    let first = apply_fixes(&expected, &servers(2), &factory, PREFIX, &ids)
        .expect("first application must succeed");
    let second = apply_fixes(&expected, &servers(2), &factory, PREFIX, &ids)
        .expect("second application must succeed");

    assert_eq!(first, 2);
    assert_eq!(second, 0);
    assert_eq!(
        master.borrow().statements,
        vec![
            "ALTER TABLE `app_product` ADD COLUMN `reference` varchar(64) NULL DEFAULT NULL AFTER `id_product`"
                .to_string()
        ]
    );
    let mut connection = FakeConnection {
        database: Rc::clone(&replica),
    };
    let remaining = list_differences(&expected, &mut connection, PREFIX)
        .expect("must list differences");
    assert!(remaining.iter().all(|difference| difference.id() != ids[0]));
}

#[test]
fn auto_migrate_only_adds_tables_and_columns() {
    let expected = expected_schema();
    let mut tables = owned_tables(&expected);
    tables.retain(|table| table.name != "app_configuration");
    tables[0].columns.retain(|column| column.name != "price");
    tables[0].columns.push(Arc::new(ColumnSchema::new("legacy", "int")));
    let database = Rc::new(RefCell::new(FakeDatabase::new(tables)));
    let factory = FakeFactory {
        databases: vec![Rc::clone(&database)],
    };

    let summary = auto_migrate(&expected, &servers(1), &factory, PREFIX)
        .expect("migration must succeed");

    assert_eq!(
        summary.applied,
        vec![
            "MissingColumn:app_product.price".to_string(),
            "MissingTable:app_configuration".to_string(),
        ]
    );
    assert_eq!(summary.remaining, 1);
    let statements = database.borrow().statements.clone();
    assert_eq!(
        statements[0],
        "ALTER TABLE `app_product` ADD COLUMN `price` decimal(20,6) NOT NULL DEFAULT 0.000000 AFTER `reference`"
    );
    assert!(statements[1].starts_with("CREATE TABLE `app_configuration` (\n"));
    assert!(statements.iter().all(|statement| !statement.contains("DROP")));
}

#[test]
fn column_order_fix_modifies_every_column_in_expected_order() {
    let expected = expected_schema();
    let mut tables = owned_tables(&expected);
    tables[1].columns.swap(1, 2);
    let database = Rc::new(RefCell::new(FakeDatabase::new(tables)));
    let mut connection = FakeConnection {
        database: Rc::clone(&database),
    };

    let differences = list_differences(&expected, &mut connection, PREFIX)
        .expect("must list differences");
    assert_eq!(differences.len(), 1);
    differences[0]
        .apply_fix(&mut connection)
        .expect("fix must apply");

    assert_eq!(
        database.borrow().statements[0],
        "ALTER TABLE `app_configuration`\n  MODIFY COLUMN `id_configuration` int(10) unsigned NOT NULL AUTO_INCREMENT FIRST,\n  MODIFY COLUMN `name` varchar(254) NOT NULL AFTER `id_configuration`,\n  MODIFY COLUMN `value` text NULL DEFAULT NULL AFTER `name`"
    );
}

#[test]
fn difference_report_serializes_listing_shape() {
    let expected = expected_schema();
    let mut tables = owned_tables(&expected);
    without_column(&mut tables, "app_configuration", "value");
    tables.push(TableSchema::new("app_legacy"));
    let mut connection = FakeConnection {
        database: Rc::new(RefCell::new(FakeDatabase::new(tables))),
    };

    let report = difference_report(&expected, &mut connection, PREFIX);
    let json = serde_json::to_value(&report).expect("must serialize report");

    assert_eq!(
        json,
        serde_json::json!({
            "success": true,
            "differences": [{
                "id": "MissingColumn:app_configuration.value",
                "description": "Column [1]app_configuration.value[/1] is missing",
                "severity": 2,
                "destructive": false
            }]
        })
    );
}

#[test]
fn difference_report_carries_connection_errors() {
    struct BrokenConnection;
    impl SchemaConnection for BrokenConnection {
        fn execute(&mut self, _sql: &str) -> Result<()> {
            Err(anyhow!("connection refused"))
        }
        fn query(&mut self, _sql: &str) -> Result<Vec<Row>> {
            Err(anyhow!("connection refused"))
        }
    }

    let report = difference_report(&expected_schema(), &mut BrokenConnection, PREFIX);

    assert!(!report.success);
    assert!(report
        .error
        .as_deref()
        .expect("error must be set")
        .contains("connection refused"));
}

#[test]
fn parse_batch_output_maps_null_and_escapes() {
    let rows = parse_batch_output("COLUMN_NAME\tCOLUMN_DEFAULT\nnote\tNULL\nbody\tline\\nbreak\n");

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get("COLUMN_DEFAULT"), Some(&None));
    assert_eq!(
        rows[1].get("COLUMN_DEFAULT"),
        Some(&Some("line\nbreak".to_string()))
    );
}
