//! Fixtures shared by the unit test modules.

use crate::db::registry::ConnectionRegistry;
use crate::db::schema_manager::SchemaManager;
use crate::llm::{GenerationParams, LlmProvider, ProviderError, ProviderErrorKind, ProviderKind};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Writes a small sales database and returns its directory guard and path.
///
/// - `customers`: 20 rows, 4 distinct regions
/// - `orders`: 100 rows over 12 months, FK to `customers`
/// - `events`: 2500 rows, for row-cap checks
pub fn sample_database() -> (TempDir, String) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sales.duckdb");
    let conn = duckdb::Connection::open(&path).unwrap();
    conn.execute_batch(
        "CREATE TABLE customers (
             id INTEGER PRIMARY KEY,
             name VARCHAR NOT NULL,
             region VARCHAR
         );
         INSERT INTO customers
             SELECT i, 'Customer ' || i, ['North', 'South', 'East', 'West'][(i % 4) + 1]
             FROM range(1, 21) t(i);

         CREATE TABLE orders (
             id INTEGER PRIMARY KEY,
             customer_id INTEGER REFERENCES customers(id),
             amount DOUBLE,
             ordered_at DATE
         );
         INSERT INTO orders
             SELECT i, (i % 20) + 1, i * 10.0,
                    CAST(DATE '2024-01-01' + INTERVAL (i % 12) MONTH AS DATE)
             FROM range(1, 101) t(i);
         CREATE INDEX idx_orders_ordered_at ON orders(ordered_at);

         CREATE TABLE events AS SELECT i AS id FROM range(0, 2500) t(i);",
    )
    .unwrap();
    drop(conn);
    (dir, path.to_string_lossy().into_owned())
}

/// Registers the sample database as `sales` and loads its snapshot.
pub async fn sample_connection() -> (TempDir, Arc<ConnectionRegistry>, Arc<SchemaManager>) {
    let (dir, path) = sample_database();
    let registry = Arc::new(ConnectionRegistry::new(2));
    registry.register("sales", &path).await.unwrap();
    let schemas = Arc::new(SchemaManager::new(Arc::clone(&registry)));
    schemas.refresh("sales").await.unwrap();
    (dir, registry, schemas)
}

/// Replays canned replies in order and remembers every prompt it saw.
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<Result<String, ProviderError>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new(replies: Vec<Result<String, ProviderError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn replying(replies: &[&str]) -> Arc<Self> {
        Self::new(replies.iter().map(|r| Ok(r.to_string())).collect())
    }

    pub fn failing(kind: ProviderErrorKind) -> Arc<Self> {
        Self::new(vec![Err(ProviderError::new(kind, ProviderKind::OpenAi, "scripted failure"))])
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn model(&self) -> &str {
        "scripted"
    }

    fn base_url(&self) -> &str {
        "http://scripted.invalid"
    }

    async fn generate(&self, prompt: &str, _params: &GenerationParams) -> Result<String, ProviderError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.replies.lock().unwrap().pop_front().unwrap_or_else(|| {
            Err(ProviderError::new(
                ProviderErrorKind::Unreachable,
                ProviderKind::OpenAi,
                "script exhausted",
            ))
        })
    }
}
