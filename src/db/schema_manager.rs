use crate::db::registry::ConnectionRegistry;
use crate::db::schema::{ColumnSchema, ForeignKey, IndexInfo, SchemaSnapshot, TableSchema};
use crate::error::QueryError;
use duckdb::Connection;
use regex::Regex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, LazyLock};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

static REFERENCES_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)REFERENCES\s+(?:"?[\w]+"?\s*\.\s*)?"?([\w]+)"?\s*\(([^)]*)\)"#)
        .expect("valid REFERENCES pattern")
});

/// Caches one immutable schema snapshot per connection.
pub struct SchemaManager {
    registry: Arc<ConnectionRegistry>,
    snapshots: RwLock<HashMap<String, Arc<SchemaSnapshot>>>,
}

impl SchemaManager {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            snapshots: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get_snapshot(&self, connection_id: &str) -> Result<Arc<SchemaSnapshot>, QueryError> {
        self.snapshots
            .read()
            .await
            .get(connection_id)
            .cloned()
            .ok_or_else(|| QueryError::SchemaUnavailable(connection_id.to_string()))
    }

    /// Introspects the connection and swaps the new snapshot in whole.
    pub async fn refresh(&self, connection_id: &str) -> Result<Arc<SchemaSnapshot>, QueryError> {
        info!("Refreshing schema for connection '{}'", connection_id);
        let handle = self.registry.acquire(connection_id).await?;
        let id = connection_id.to_string();

        let snapshot = tokio::task::spawn_blocking(move || introspect(&handle, &id))
            .await
            .map_err(|e| QueryError::SchemaUnavailable(format!("{}: {}", connection_id, e)))?
            .map_err(|e| {
                error!("Schema introspection failed for '{}': {}", connection_id, e);
                QueryError::SchemaUnavailable(format!("{}: {}", connection_id, e))
            })?;

        let snapshot = Arc::new(snapshot);
        self.snapshots
            .write()
            .await
            .insert(connection_id.to_string(), Arc::clone(&snapshot));

        info!(
            "Schema for '{}' refreshed: {} tables",
            connection_id,
            snapshot.tables.len()
        );
        Ok(snapshot)
    }

    /// Refreshes every registered connection; failures are logged and skipped.
    pub async fn refresh_all(&self) {
        for info in self.registry.list().await {
            if let Err(e) = self.refresh(&info.connection_id).await {
                error!("Failed to refresh schema for '{}': {}", info.connection_id, e);
            }
        }
    }

    pub async fn evict(&self, connection_id: &str) {
        self.snapshots.write().await.remove(connection_id);
    }
}

fn introspect(conn: &Connection, connection_id: &str) -> Result<SchemaSnapshot, duckdb::Error> {
    let (primary_keys, foreign_keys) = match read_constraints(conn) {
        Ok(found) => found,
        Err(e) => {
            warn!("Could not read constraints for '{}': {}", connection_id, e);
            (HashSet::new(), Vec::new())
        }
    };

    let mut tables: BTreeMap<String, TableSchema> = BTreeMap::new();
    let mut stmt = conn.prepare(
        "SELECT table_name, column_name, data_type, is_nullable
         FROM information_schema.columns
         WHERE table_schema = 'main'
         ORDER BY table_name, ordinal_position",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)? == "YES",
        ))
    })?;

    for row in rows {
        let (table_name, column_name, data_type, nullable) = row?;
        let primary_key = primary_keys.contains(&(table_name.clone(), column_name.clone()));
        tables
            .entry(table_name.clone())
            .or_insert_with(|| TableSchema {
                name: table_name,
                columns: Vec::new(),
            })
            .columns
            .push(ColumnSchema {
                name: column_name,
                data_type,
                nullable,
                primary_key,
            });
    }

    let indexes = match read_indexes(conn) {
        Ok(indexes) => indexes,
        Err(e) => {
            warn!("Could not read indexes for '{}': {}", connection_id, e);
            Vec::new()
        }
    };

    debug!(
        "Introspected '{}': {} tables, {} foreign keys, {} indexes",
        connection_id,
        tables.len(),
        foreign_keys.len(),
        indexes.len()
    );

    Ok(SchemaSnapshot {
        connection_id: connection_id.to_string(),
        database_type: "duckdb".to_string(),
        tables,
        foreign_keys,
        indexes,
        captured_at: chrono::Utc::now(),
    })
}

type ConstraintSet = (HashSet<(String, String)>, Vec<ForeignKey>);

fn read_constraints(conn: &Connection) -> Result<ConstraintSet, duckdb::Error> {
    let mut stmt = conn.prepare(
        "SELECT table_name, constraint_type,
                array_to_string(constraint_column_names, ','), constraint_text
         FROM duckdb_constraints()
         WHERE schema_name = 'main'
           AND constraint_type IN ('PRIMARY KEY', 'FOREIGN KEY')
         ORDER BY table_name",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, Option<String>>(3)?,
        ))
    })?;

    let mut primary_keys = HashSet::new();
    let mut foreign_keys = Vec::new();
    for row in rows {
        let (table, constraint_type, columns, text) = row?;
        let columns = split_columns(&columns);
        if constraint_type == "PRIMARY KEY" {
            for column in columns {
                primary_keys.insert((table.clone(), column));
            }
        } else if let Some(fk) = text.as_deref().and_then(|t| parse_references(&table, columns, t)) {
            foreign_keys.push(fk);
        }
    }
    Ok((primary_keys, foreign_keys))
}

fn read_indexes(conn: &Connection) -> Result<Vec<IndexInfo>, duckdb::Error> {
    let mut stmt = conn.prepare(
        "SELECT index_name, table_name, is_unique, sql
         FROM duckdb_indexes()
         WHERE schema_name = 'main'
         ORDER BY table_name, index_name",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(IndexInfo {
            name: row.get(0)?,
            table: row.get(1)?,
            unique: row.get(2)?,
            sql: row.get(3)?,
        })
    })?;
    rows.collect()
}

fn split_columns(list: &str) -> Vec<String> {
    list.split(',')
        .map(|c| c.trim().trim_matches('"').to_string())
        .filter(|c| !c.is_empty())
        .collect()
}

fn parse_references(table: &str, columns: Vec<String>, constraint_text: &str) -> Option<ForeignKey> {
    let captures = REFERENCES_RE.captures(constraint_text)?;
    Some(ForeignKey {
        table: table.to_string(),
        columns,
        referred_table: captures.get(1)?.as_str().to_string(),
        referred_columns: split_columns(captures.get(2)?.as_str()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sample_database;

    #[test]
    fn references_clause_is_parsed() {
        let fk = parse_references(
            "orders",
            vec!["customer_id".to_string()],
            "FOREIGN KEY (customer_id) REFERENCES customers(id)",
        )
        .unwrap();
        assert_eq!(fk.referred_table, "customers");
        assert_eq!(fk.referred_columns, vec!["id".to_string()]);
        assert_eq!(fk.describe(), "customer_id -> customers.id");
    }

    #[tokio::test]
    async fn missing_snapshot_is_schema_unavailable() {
        let manager = SchemaManager::new(Arc::new(ConnectionRegistry::new(1)));
        let err = manager.get_snapshot("sales").await.unwrap_err();
        assert!(matches!(err, QueryError::SchemaUnavailable(_)));
    }

    #[tokio::test]
    async fn refresh_captures_tables_columns_and_keys() {
        let (_dir, path) = sample_database();
        let registry = Arc::new(ConnectionRegistry::new(2));
        registry.register("sales", &path).await.unwrap();
        let manager = SchemaManager::new(Arc::clone(&registry));

        let snapshot = manager.refresh("sales").await.unwrap();
        assert_eq!(
            snapshot.table_names(),
            vec!["customers".to_string(), "events".to_string(), "orders".to_string()]
        );

        let customers = &snapshot.tables["customers"];
        assert_eq!(customers.columns[0].name, "id");
        assert!(customers.columns[0].primary_key);
        assert!(!customers.columns[1].nullable);

        let fks: Vec<_> = snapshot.foreign_keys_for("orders").collect();
        assert_eq!(fks.len(), 1);
        assert_eq!(fks[0].referred_table, "customers");

        assert!(snapshot.indexes.iter().any(|ix| ix.name == "idx_orders_ordered_at"));
    }

    #[tokio::test]
    async fn refresh_replaces_the_whole_snapshot() {
        let (_dir, path) = sample_database();
        let registry = Arc::new(ConnectionRegistry::new(2));
        registry.register("sales", &path).await.unwrap();
        let manager = SchemaManager::new(Arc::clone(&registry));

        let first = manager.refresh("sales").await.unwrap();
        let second = manager.refresh("sales").await.unwrap();
        let current = manager.get_snapshot("sales").await.unwrap();

        assert!(Arc::ptr_eq(&second, &current));
        assert!(!Arc::ptr_eq(&first, &current));
        // Old readers keep their complete copy
        assert_eq!(first.tables.len(), current.tables.len());
    }
}
