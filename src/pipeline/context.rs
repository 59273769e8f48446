use crate::db::schema::SchemaSnapshot;
use crate::pipeline::types::SchemaContext;

/// Renders a snapshot as the schema section of a generation prompt.
///
/// Tables come in name order and columns in declaration order. Anything past
/// `max_tables` or `max_columns` is replaced by a `... N more` marker so the
/// prompt stays bounded no matter how wide the database is.
pub fn build_context(snapshot: &SchemaSnapshot, max_tables: usize, max_columns: usize) -> SchemaContext {
    let mut text = format!("Database type: {}\n", snapshot.database_type);

    if snapshot.tables.is_empty() {
        text.push_str("\nNo tables found.\n");
    }

    for table in snapshot.tables.values().take(max_tables) {
        text.push_str(&format!("\nTable: {}\n", table.name));

        let mut columns: Vec<String> = table
            .columns
            .iter()
            .take(max_columns)
            .map(|c| c.describe())
            .collect();
        if table.columns.len() > max_columns {
            columns.push(format!("... {} more", table.columns.len() - max_columns));
        }
        text.push_str(&format!("Columns: {}\n", columns.join(", ")));

        let foreign_keys: Vec<String> = snapshot
            .foreign_keys_for(&table.name)
            .map(|fk| fk.describe())
            .collect();
        if !foreign_keys.is_empty() {
            text.push_str(&format!("Foreign Keys: {}\n", foreign_keys.join("; ")));
        }
    }

    if snapshot.tables.len() > max_tables {
        text.push_str(&format!("\n... {} more tables\n", snapshot.tables.len() - max_tables));
    }

    SchemaContext {
        text,
        version: snapshot.captured_at,
        database_type: snapshot.database_type.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::{ColumnSchema, ForeignKey, TableSchema};
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn column(name: &str, data_type: &str, primary_key: bool) -> ColumnSchema {
        ColumnSchema {
            name: name.to_string(),
            data_type: data_type.to_string(),
            nullable: !primary_key,
            primary_key,
        }
    }

    fn snapshot() -> SchemaSnapshot {
        let mut tables = BTreeMap::new();
        tables.insert(
            "orders".to_string(),
            TableSchema {
                name: "orders".to_string(),
                columns: vec![
                    column("id", "INTEGER", true),
                    column("customer_id", "INTEGER", false),
                    column("amount", "DOUBLE", false),
                ],
            },
        );
        tables.insert(
            "customers".to_string(),
            TableSchema {
                name: "customers".to_string(),
                columns: vec![column("id", "INTEGER", true), column("name", "VARCHAR", false)],
            },
        );
        SchemaSnapshot {
            connection_id: "sales".to_string(),
            database_type: "duckdb".to_string(),
            tables,
            foreign_keys: vec![ForeignKey {
                table: "orders".to_string(),
                columns: vec!["customer_id".to_string()],
                referred_table: "customers".to_string(),
                referred_columns: vec!["id".to_string()],
            }],
            indexes: Vec::new(),
            captured_at: Utc::now(),
        }
    }

    #[test]
    fn renders_tables_in_name_order_with_keys() {
        let snapshot = snapshot();
        let context = build_context(&snapshot, 50, 40);

        let expected = "Database type: duckdb\n\
            \nTable: customers\n\
            Columns: id (INTEGER, PRIMARY KEY, NOT NULL), name (VARCHAR)\n\
            \nTable: orders\n\
            Columns: id (INTEGER, PRIMARY KEY, NOT NULL), customer_id (INTEGER), amount (DOUBLE)\n\
            Foreign Keys: customer_id -> customers.id\n";
        assert_eq!(context.text, expected);
        assert_eq!(context.version, snapshot.captured_at);
    }

    #[test]
    fn marks_omitted_tables_and_columns() {
        let context = build_context(&snapshot(), 1, 1);
        assert!(context.text.contains("Columns: id (INTEGER, PRIMARY KEY, NOT NULL), ... 1 more\n"));
        assert!(context.text.contains("... 1 more tables"));
        assert!(!context.text.contains("Table: orders"));
    }

    #[test]
    fn same_snapshot_same_text() {
        let snapshot = snapshot();
        assert_eq!(build_context(&snapshot, 5, 5), build_context(&snapshot, 5, 5));
    }
}
