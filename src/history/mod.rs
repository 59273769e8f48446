pub mod store;

use crate::error::QueryError;
use crate::pipeline::types::{ExecutionResult, QueryRequest};
use crate::pipeline::visualize::VisualizationIntent;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tracing::{debug, error, info};
use uuid::Uuid;

pub use store::{HistoryStore, HistoryStoreError};

/// One successful query transaction.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct QueryRecord {
    pub query_id: String,
    pub connection_id: String,
    pub original_query: String,
    pub generated_sql: String,
    /// Last execution, refreshed by reruns
    #[serde(rename = "timestamp")]
    pub executed_at: DateTime<Utc>,
    pub execution_time_ms: f64,
    pub row_count: usize,
    pub visualization_type: VisualizationIntent,
}

struct Entry {
    record: QueryRecord,
    // Orders records that share a timestamp
    touched: u64,
}

#[derive(Default)]
struct Entries {
    by_id: HashMap<String, Entry>,
    clock: u64,
}

impl Entries {
    fn put(&mut self, record: QueryRecord) {
        self.clock += 1;
        let touched = self.clock;
        self.by_id.insert(record.query_id.clone(), Entry { record, touched });
    }
}

/// The query history ledger. Reads run concurrently; writes and reruns for
/// the same connection are serialized.
pub struct QueryHistory {
    entries: RwLock<Entries>,
    write_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    store: Option<Arc<HistoryStore>>,
}

impl QueryHistory {
    pub fn in_memory() -> Self {
        Self {
            entries: RwLock::new(Entries::default()),
            write_locks: Mutex::new(HashMap::new()),
            store: None,
        }
    }

    /// Loads every persisted record and mirrors later changes to `store`.
    pub async fn open(store: HistoryStore) -> Result<Self, HistoryStoreError> {
        let store = Arc::new(store);
        let loader = Arc::clone(&store);
        let records = tokio::task::spawn_blocking(move || loader.load_all()).await??;

        let mut entries = Entries::default();
        let mut records = records;
        records.sort_by_key(|r| r.executed_at);
        let loaded = records.len();
        for record in records {
            entries.put(record);
        }
        info!("Loaded {} history entries", loaded);

        Ok(Self {
            entries: RwLock::new(entries),
            write_locks: Mutex::new(HashMap::new()),
            store: Some(store),
        })
    }

    fn write_lock(&self, connection_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.write_locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(locks.entry(connection_id.to_string()).or_default())
    }

    /// Drops the per-connection write lock once the connection is removed.
    /// Records stay in the ledger.
    pub fn forget_connection(&self, connection_id: &str) {
        let mut locks = self.write_locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.remove(connection_id);
    }

    /// Creates a record for a first successful execution.
    pub async fn record(
        &self,
        request: &QueryRequest,
        generated_sql: &str,
        result: &ExecutionResult,
        intent: VisualizationIntent,
    ) -> QueryRecord {
        let lock = self.write_lock(&request.connection_id);
        let _guard = lock.lock().await;

        let record = QueryRecord {
            query_id: Uuid::new_v4().to_string(),
            connection_id: request.connection_id.clone(),
            original_query: request.text.clone(),
            generated_sql: generated_sql.to_string(),
            executed_at: Utc::now(),
            execution_time_ms: result.execution_time_ms,
            row_count: result.row_count,
            visualization_type: intent,
        };

        self.entries.write().await.put(record.clone());
        self.persist(&record).await;
        debug!("Recorded query {} for '{}'", record.query_id, record.connection_id);
        record
    }

    /// Newest first, optionally restricted to one connection.
    pub async fn list(&self, connection_id: Option<&str>, limit: usize) -> Vec<QueryRecord> {
        let entries = self.entries.read().await;
        let mut matching: Vec<&Entry> = entries
            .by_id
            .values()
            .filter(|e| connection_id.is_none_or(|id| e.record.connection_id == id))
            .collect();
        matching.sort_by(|a, b| {
            b.record
                .executed_at
                .cmp(&a.record.executed_at)
                .then(b.touched.cmp(&a.touched))
        });
        matching
            .into_iter()
            .take(limit)
            .map(|e| e.record.clone())
            .collect()
    }

    pub async fn get(&self, query_id: &str) -> Result<QueryRecord, QueryError> {
        self.entries
            .read()
            .await
            .by_id
            .get(query_id)
            .map(|e| e.record.clone())
            .ok_or_else(|| QueryError::NotFound(format!("query '{}'", query_id)))
    }

    /// Re-executes a stored record through `execute` and replaces its
    /// timestamp and stats. The stored SQL is never touched.
    pub async fn rerun<F, Fut>(
        &self,
        query_id: &str,
        execute: F,
    ) -> Result<(QueryRecord, ExecutionResult), QueryError>
    where
        F: FnOnce(QueryRecord) -> Fut,
        Fut: Future<Output = Result<(ExecutionResult, VisualizationIntent), QueryError>>,
    {
        let connection_id = self.get(query_id).await?.connection_id;
        let lock = self.write_lock(&connection_id);
        let _guard = lock.lock().await;

        // Could have been deleted while we waited for the lock
        let current = self.get(query_id).await?;
        let (result, intent) = execute(current).await?;

        let updated = {
            let mut entries = self.entries.write().await;
            let mut record = entries
                .by_id
                .get(query_id)
                .map(|e| e.record.clone())
                .ok_or_else(|| QueryError::NotFound(format!("query '{}'", query_id)))?;
            record.executed_at = Utc::now();
            record.execution_time_ms = result.execution_time_ms;
            record.row_count = result.row_count;
            record.visualization_type = intent;
            entries.put(record.clone());
            record
        };

        self.persist(&updated).await;
        info!("Reran query {}", query_id);
        Ok((updated, result))
    }

    pub async fn delete(&self, query_id: &str) -> Result<(), QueryError> {
        let connection_id = self.get(query_id).await?.connection_id;
        let lock = self.write_lock(&connection_id);
        let _guard = lock.lock().await;

        if self.entries.write().await.by_id.remove(query_id).is_none() {
            return Err(QueryError::NotFound(format!("query '{}'", query_id)));
        }

        if let Some(store) = &self.store {
            let store = Arc::clone(store);
            let id = query_id.to_string();
            match tokio::task::spawn_blocking(move || store.delete(&id)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Failed to delete history entry {}: {}", query_id, e),
                Err(e) => error!("Failed to delete history entry {}: {}", query_id, e),
            }
        }
        info!("Deleted query {}", query_id);
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.by_id.len()
    }

    // Best effort: the in-memory ledger stays authoritative
    async fn persist(&self, record: &QueryRecord) {
        let Some(store) = &self.store else {
            return;
        };
        let store = Arc::clone(store);
        let owned = record.clone();
        match tokio::task::spawn_blocking(move || store.upsert(&owned)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Failed to persist history entry {}: {}", record.query_id, e),
            Err(e) => error!("Failed to persist history entry {}: {}", record.query_id, e),
        }
    }
}
