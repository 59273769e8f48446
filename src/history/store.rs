use crate::db::db_pool::DuckDBConnectionManager;
use crate::history::QueryRecord;
use crate::pipeline::visualize::VisualizationIntent;
use chrono::{DateTime, Utc};
use duckdb::params;
use r2d2::Pool;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum HistoryStoreError {
    #[error("history database error: {0}")]
    Database(#[from] duckdb::Error),

    #[error("history pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("history task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// DuckDB file mirroring the ledger so it survives restarts.
pub struct HistoryStore {
    pool: Pool<DuckDBConnectionManager>,
}

impl HistoryStore {
    pub fn open(path: &str) -> Result<Self, HistoryStoreError> {
        info!("Opening query history at {}", path);
        // One writer: DuckDB locks the file per database instance
        let pool = Pool::builder()
            .max_size(1)
            .build(DuckDBConnectionManager::read_write(path.to_string()))?;

        let conn = pool.get()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS query_history (
                 query_id VARCHAR PRIMARY KEY,
                 connection_id VARCHAR NOT NULL,
                 original_query VARCHAR NOT NULL,
                 generated_sql VARCHAR NOT NULL,
                 executed_at VARCHAR NOT NULL,
                 execution_time_ms DOUBLE NOT NULL,
                 row_count BIGINT NOT NULL,
                 visualization_type VARCHAR NOT NULL
             )",
        )?;
        drop(conn);

        Ok(Self { pool })
    }

    pub fn load_all(&self) -> Result<Vec<QueryRecord>, HistoryStoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT query_id, connection_id, original_query, generated_sql, executed_at,
                    execution_time_ms, row_count, visualization_type
             FROM query_history
             ORDER BY executed_at",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, f64>(5)?,
                row.get::<_, i64>(6)?,
                row.get::<_, String>(7)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (query_id, connection_id, original_query, generated_sql, executed_at, time_ms, rows, viz) =
                row?;

            let executed_at = match DateTime::parse_from_rfc3339(&executed_at) {
                Ok(ts) => ts.with_timezone(&Utc),
                Err(e) => {
                    warn!("Skipping history entry {} with bad timestamp: {}", query_id, e);
                    continue;
                }
            };
            let visualization_type = viz.parse().unwrap_or_else(|e| {
                warn!("History entry {}: {}", query_id, e);
                VisualizationIntent::Table
            });

            records.push(QueryRecord {
                query_id,
                connection_id,
                original_query,
                generated_sql,
                executed_at,
                execution_time_ms: time_ms,
                row_count: rows.max(0) as usize,
                visualization_type,
            });
        }
        Ok(records)
    }

    pub fn upsert(&self, record: &QueryRecord) -> Result<(), HistoryStoreError> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT OR REPLACE INTO query_history VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                record.query_id,
                record.connection_id,
                record.original_query,
                record.generated_sql,
                record.executed_at.to_rfc3339(),
                record.execution_time_ms,
                record.row_count as i64,
                record.visualization_type.as_str(),
            ],
        )?;
        Ok(())
    }

    pub fn delete(&self, query_id: &str) -> Result<(), HistoryStoreError> {
        let conn = self.pool.get()?;
        conn.execute("DELETE FROM query_history WHERE query_id = ?", params![query_id])?;
        Ok(())
    }
}
