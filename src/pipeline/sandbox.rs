use crate::config::SandboxConfig;
use crate::db::registry::ConnectionHandle;
use crate::error::{ExecutionErrorKind, QueryError};
use crate::pipeline::guard;
use crate::pipeline::types::{ExecutionResult, ValueKind};
use arrow::json::writer::JsonArray;
use arrow::json::WriterBuilder;
use duckdb::arrow::record_batch::RecordBatch;
use duckdb::Connection;
use serde_json::{Map, Value};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// How often a stop re-sends the interrupt until the worker returns. Covers an
// interrupt that lands before the engine has started the statement.
const INTERRUPT_RETRY: Duration = Duration::from_millis(25);

/// Runs guarded SELECTs with a row cap and a wall-clock limit.
#[derive(Debug, Clone)]
pub struct SandboxExecutor {
    row_cap: usize,
    timeout: Duration,
}

enum Stop {
    Cancelled,
    TimedOut,
}

/// Interrupts the engine when dropped, unless disarmed after a clean finish.
struct InterruptOnDrop<F: Fn()> {
    interrupt: Option<F>,
}

impl<F: Fn()> InterruptOnDrop<F> {
    fn interrupt(&self) {
        if let Some(interrupt) = &self.interrupt {
            interrupt();
        }
    }

    fn disarm(mut self) {
        self.interrupt = None;
    }
}

impl<F: Fn()> Drop for InterruptOnDrop<F> {
    fn drop(&mut self) {
        if let Some(interrupt) = self.interrupt.take() {
            interrupt();
        }
    }
}

impl SandboxExecutor {
    pub fn new(row_cap: usize, timeout: Duration) -> Self {
        Self {
            row_cap: row_cap.max(1),
            timeout,
        }
    }

    pub fn from_config(config: &SandboxConfig) -> Self {
        Self::new(config.row_cap, config.timeout())
    }

    /// Executes `sql` on a blocking worker. When `cancel` trips, the timeout
    /// fires, or this future is dropped, the running statement is interrupted
    /// inside the engine; on the first two the worker is awaited so the
    /// connection is back in its pool before the error is returned.
    pub async fn execute(
        &self,
        sql: &str,
        handle: ConnectionHandle,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult, QueryError> {
        let statement = guard::check_read_only(sql)?;
        debug!("Executing SQL: {}", statement);

        let token = cancel.child_token();
        let worker_token = token.clone();
        let interrupt = {
            let engine = handle.interrupt_handle();
            let token = token.clone();
            move || {
                token.cancel();
                engine.interrupt();
            }
        };
        let row_cap = self.row_cap;

        let started = Instant::now();
        let mut task = tokio::task::spawn_blocking(move || {
            let outcome = run_bounded(&handle, &statement, row_cap, &worker_token);
            if worker_token.is_cancelled() {
                // Absorb an interrupt that arrived after the statement ended
                let _ = handle.execute_batch("SELECT 1");
            }
            outcome
        });
        let guard = InterruptOnDrop {
            interrupt: Some(interrupt),
        };

        let stop = tokio::select! {
            biased;
            _ = token.cancelled() => Stop::Cancelled,
            _ = tokio::time::sleep(self.timeout) => Stop::TimedOut,
            joined = &mut task => {
                guard.disarm();
                let mut result = match joined {
                    Ok(outcome) => outcome?,
                    Err(e) => {
                        return Err(QueryError::execution(ExecutionErrorKind::Connection, e.to_string()));
                    }
                };
                result.execution_time_ms = started.elapsed().as_secs_f64() * 1000.0;
                info!(
                    "Query returned {} rows in {:.1} ms (truncated: {})",
                    result.row_count, result.execution_time_ms, result.truncated
                );
                return Ok(result);
            }
        };

        stop_worker(&mut task, &guard).await;
        guard.disarm();

        Err(match stop {
            Stop::Cancelled => {
                QueryError::execution(ExecutionErrorKind::Cancelled, "execution was cancelled")
            }
            Stop::TimedOut => {
                warn!("Query exceeded the {:?} limit and was interrupted", self.timeout);
                QueryError::execution(
                    ExecutionErrorKind::Timeout,
                    format!("query exceeded the {} ms limit", self.timeout.as_millis()),
                )
            }
        })
    }
}

/// Interrupts until the worker has returned, so it no longer holds the
/// pooled connection.
async fn stop_worker<T, F: Fn()>(task: &mut JoinHandle<T>, guard: &InterruptOnDrop<F>) {
    loop {
        guard.interrupt();
        if tokio::time::timeout(INTERRUPT_RETRY, &mut *task).await.is_ok() {
            return;
        }
    }
}

/// Reads the result batch by batch, keeping at most `row_cap` rows.
/// `truncated` is set only when a row beyond the cap actually exists.
///
/// The engine materializes the full result before the first batch is handed
/// over, so the cap bounds conversion work and the caller's timeout bounds
/// engine work.
pub(crate) fn run_bounded(
    conn: &Connection,
    sql: &str,
    row_cap: usize,
    cancel: &CancellationToken,
) -> Result<ExecutionResult, QueryError> {
    if cancel.is_cancelled() {
        return Err(QueryError::execution(
            ExecutionErrorKind::Cancelled,
            "execution was cancelled",
        ));
    }

    let mut stmt = conn.prepare(sql).map_err(engine_error)?;
    let batches = stmt.query_arrow([]).map_err(engine_error)?;

    let schema = batches.get_schema();
    let columns: Vec<String> = schema.fields().iter().map(|f| f.name().clone()).collect();
    let column_kinds: Vec<ValueKind> = schema
        .fields()
        .iter()
        .map(|f| ValueKind::from(f.data_type()))
        .collect();

    let mut kept: Vec<RecordBatch> = Vec::new();
    let mut row_count = 0;
    let mut truncated = false;

    for batch in batches {
        if cancel.is_cancelled() {
            return Err(QueryError::execution(
                ExecutionErrorKind::Cancelled,
                "execution was cancelled",
            ));
        }

        let remaining = row_cap - row_count;
        if batch.num_rows() > remaining {
            if remaining > 0 {
                kept.push(batch.slice(0, remaining));
                row_count += remaining;
            }
            truncated = true;
            break;
        }
        row_count += batch.num_rows();
        kept.push(batch);
    }

    let rows = batches_to_rows(&kept)?;

    Ok(ExecutionResult {
        columns,
        column_kinds,
        rows,
        row_count,
        execution_time_ms: 0.0,
        truncated,
    })
}

fn batches_to_rows(batches: &[RecordBatch]) -> Result<Vec<Map<String, Value>>, QueryError> {
    let mut writer = WriterBuilder::new()
        .with_explicit_nulls(true)
        .build::<_, JsonArray>(Vec::new());
    let refs: Vec<&RecordBatch> = batches.iter().collect();
    writer.write_batches(&refs).map_err(conversion_error)?;
    writer.finish().map_err(conversion_error)?;

    let buffer = writer.into_inner();
    if buffer.is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_slice(&buffer).map_err(conversion_error)
}

fn conversion_error(err: impl std::fmt::Display) -> QueryError {
    QueryError::execution(
        ExecutionErrorKind::Syntax,
        format!("failed to convert result rows: {}", err),
    )
}

// Everything the engine reports while preparing or running a statement is
// treated as a problem with the statement itself.
fn engine_error(err: duckdb::Error) -> QueryError {
    QueryError::execution(ExecutionErrorKind::Syntax, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sample_connection;

    async fn run(cap: usize, sql: &str) -> Result<ExecutionResult, QueryError> {
        let (_dir, registry, _) = sample_connection().await;
        let handle = registry.acquire("sales").await.unwrap();
        SandboxExecutor::new(cap, Duration::from_secs(30))
            .execute(sql, handle, &CancellationToken::new())
            .await
    }

    #[tokio::test]
    async fn rows_beyond_the_cap_are_dropped_and_flagged() {
        let result = run(1000, "SELECT * FROM events").await.unwrap();
        assert_eq!(result.row_count, 1000);
        assert_eq!(result.rows.len(), 1000);
        assert!(result.truncated);
    }

    #[tokio::test]
    async fn exactly_cap_rows_is_not_truncated() {
        let result = run(100, "SELECT id FROM orders").await.unwrap();
        assert_eq!(result.row_count, 100);
        assert!(!result.truncated);

        let result = run(99, "SELECT id FROM orders").await.unwrap();
        assert_eq!(result.row_count, 99);
        assert!(result.truncated);
    }

    #[tokio::test]
    async fn preserves_engine_order_and_kinds() {
        let result = run(
            10,
            "SELECT ordered_at, amount, customer_id > 10 AS big, 'x' AS tag FROM orders ORDER BY id DESC LIMIT 3;",
        )
        .await
        .unwrap();

        assert_eq!(result.columns, vec!["ordered_at", "amount", "big", "tag"]);
        assert_eq!(
            result.column_kinds,
            vec![ValueKind::Temporal, ValueKind::Numeric, ValueKind::Boolean, ValueKind::Text]
        );
        assert_eq!(result.rows[0]["amount"], serde_json::json!(1000.0));
        assert_eq!(result.rows[2]["amount"], serde_json::json!(980.0));
        assert!(result.execution_time_ms >= 0.0);
    }

    #[tokio::test]
    async fn nulls_and_empty_results() {
        let result = run(10, "SELECT CAST(NULL AS INTEGER) AS nothing, 1 AS one").await.unwrap();
        assert_eq!(result.rows[0]["nothing"], Value::Null);

        let result = run(10, "SELECT id FROM customers WHERE id < 0").await.unwrap();
        assert_eq!(result.row_count, 0);
        assert!(result.rows.is_empty());
        assert_eq!(result.columns, vec!["id"]);
        assert!(!result.truncated);
    }

    #[tokio::test]
    async fn engine_errors_are_syntax_errors() {
        let err = run(10, "SELECT no_such_column FROM customers").await.unwrap_err();
        assert!(matches!(
            err,
            QueryError::Execution { kind: ExecutionErrorKind::Syntax, .. }
        ));
    }

    #[tokio::test]
    async fn write_statements_never_reach_the_engine() {
        let err = run(10, "DELETE FROM customers").await.unwrap_err();
        assert!(matches!(err, QueryError::UnsafeStatement(_)));
    }

    #[tokio::test]
    async fn cancelled_token_stops_execution() {
        let (_dir, registry, _) = sample_connection().await;
        let handle = registry.acquire("sales").await.unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = SandboxExecutor::new(10, Duration::from_secs(30))
            .execute("SELECT * FROM events", handle, &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind_name(), "execution_error.cancelled");
    }

    #[tokio::test]
    async fn slow_queries_time_out() {
        let (_dir, registry, _) = sample_connection().await;
        let handle = registry.acquire("sales").await.unwrap();

        let err = SandboxExecutor::new(10, Duration::from_millis(1))
            .execute(
                "SELECT SUM(a.range * b.range) FROM range(0, 7000) a, range(0, 7000) b",
                handle,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind_name(), "execution_error.timeout");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn timed_out_execution_releases_its_connection() {
        let (_dir, registry, _) = sample_connection().await;
        let executor = SandboxExecutor::new(10, Duration::from_millis(50));
        let sql = "SELECT SUM(a.range * b.range) FROM range(0, 30000) a, range(0, 30000) b";

        let first = registry.acquire("sales").await.unwrap();
        let second = registry.acquire("sales").await.unwrap();
        let cancel = CancellationToken::new();
        let (a, b) = tokio::join!(
            executor.execute(sql, first, &cancel),
            executor.execute(sql, second, &cancel)
        );
        assert_eq!(a.unwrap_err().kind_name(), "execution_error.timeout");
        assert_eq!(b.unwrap_err().kind_name(), "execution_error.timeout");

        // Both pooled connections are free again and still usable
        for _ in 0..2 {
            let handle = tokio::time::timeout(Duration::from_secs(3), registry.acquire("sales"))
                .await
                .expect("connection was not returned to the pool")
                .unwrap();
            let result = SandboxExecutor::new(10, Duration::from_secs(30))
                .execute("SELECT COUNT(*) AS n FROM orders", handle, &CancellationToken::new())
                .await
                .unwrap();
            assert_eq!(result.rows[0]["n"], 100);
        }
    }
}
