use crate::db::db_pool::DuckDBConnectionManager;
use crate::error::{ExecutionErrorKind, QueryError};
use chrono::{DateTime, Utc};
use r2d2::{ManageConnection, Pool, PooledConnection};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub type DuckPool = Pool<DuckDBConnectionManager>;

/// A pooled read-only connection borrowed for the length of one execution.
pub type ConnectionHandle = PooledConnection<DuckDBConnectionManager>;

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub connection_id: String,
    pub db_type: String,
    pub database: String,
    pub status: String,
    pub connected_at: DateTime<Utc>,
}

struct RegisteredConnection {
    path: String,
    pool: DuckPool,
    connected_at: DateTime<Utc>,
}

impl RegisteredConnection {
    fn info(&self, connection_id: &str, status: &str) -> ConnectionInfo {
        ConnectionInfo {
            connection_id: connection_id.to_string(),
            db_type: "duckdb".to_string(),
            database: self.path.clone(),
            status: status.to_string(),
            connected_at: self.connected_at,
        }
    }
}

/// Named read-only connection pools, one per target database.
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, RegisteredConnection>>,
    pool_size: u32,
}

impl ConnectionRegistry {
    pub fn new(pool_size: u32) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            pool_size: pool_size.max(1),
        }
    }

    /// Opens `path` read-only and makes it available as `connection_id`.
    /// Re-registering an id replaces its pool.
    pub async fn register(&self, connection_id: &str, path: &str) -> Result<ConnectionInfo, QueryError> {
        let connection_id = connection_id.trim();
        if connection_id.is_empty() {
            return Err(QueryError::InvalidRequest(
                "connection_id must not be empty".to_string(),
            ));
        }
        if !Path::new(path).exists() {
            return Err(QueryError::ConnectionUnavailable(format!(
                "database file '{}' does not exist",
                path
            )));
        }

        let manager = DuckDBConnectionManager::read_only(path.to_string());
        let pool_size = self.pool_size;
        let pool = tokio::task::spawn_blocking(move || -> Result<DuckPool, duckdb::Error> {
            // Open once up front so a bad file fails here, not on first query
            manager.connect()?;
            Ok(Pool::builder()
                .max_size(pool_size)
                .min_idle(Some(0))
                .connection_timeout(ACQUIRE_TIMEOUT)
                .build_unchecked(manager))
        })
        .await
        .map_err(|e| QueryError::ConnectionUnavailable(e.to_string()))?
        .map_err(|e| {
            QueryError::ConnectionUnavailable(format!("failed to open '{}': {}", path, e))
        })?;

        let registered = RegisteredConnection {
            path: path.to_string(),
            pool,
            connected_at: Utc::now(),
        };
        let info = registered.info(connection_id, "connected");

        let mut connections = self.connections.write().await;
        if connections.insert(connection_id.to_string(), registered).is_some() {
            warn!("Replaced existing connection '{}'", connection_id);
        }
        info!("Registered connection '{}' at {}", connection_id, path);
        Ok(info)
    }

    pub async fn remove(&self, connection_id: &str) -> Result<(), QueryError> {
        match self.connections.write().await.remove(connection_id) {
            Some(_) => {
                info!("Removed connection '{}'", connection_id);
                Ok(())
            }
            None => Err(QueryError::NotFound(format!("connection '{}'", connection_id))),
        }
    }

    pub async fn contains(&self, connection_id: &str) -> bool {
        self.connections.read().await.contains_key(connection_id)
    }

    pub async fn list(&self) -> Vec<ConnectionInfo> {
        let connections = self.connections.read().await;
        let mut infos: Vec<ConnectionInfo> = connections
            .iter()
            .map(|(id, conn)| conn.info(id, "connected"))
            .collect();
        infos.sort_by(|a, b| a.connection_id.cmp(&b.connection_id));
        infos
    }

    /// Borrows a connection. Unknown ids fail with `ConnectionUnavailable`;
    /// a pool that cannot hand out a connection fails with an execution
    /// error of kind `connection`.
    pub async fn acquire(&self, connection_id: &str) -> Result<ConnectionHandle, QueryError> {
        let pool = {
            let connections = self.connections.read().await;
            connections
                .get(connection_id)
                .map(|conn| conn.pool.clone())
                .ok_or_else(|| {
                    QueryError::ConnectionUnavailable(format!(
                        "connection '{}' is not registered",
                        connection_id
                    ))
                })?
        };

        debug!("Acquiring connection '{}'", connection_id);
        tokio::task::spawn_blocking(move || pool.get())
            .await
            .map_err(|e| QueryError::execution(ExecutionErrorKind::Connection, e.to_string()))?
            .map_err(|e| QueryError::execution(ExecutionErrorKind::Connection, e.to_string()))
    }

    pub async fn test(&self, connection_id: &str) -> Result<bool, QueryError> {
        let handle = self.acquire(connection_id).await?;
        let alive = tokio::task::spawn_blocking(move || handle.execute_batch("SELECT 1").is_ok())
            .await
            .unwrap_or(false);
        Ok(alive)
    }
}
