pub mod context;
pub mod generator;
pub mod guard;
pub mod sandbox;
pub mod types;
pub mod visualize;

use crate::config::{AppConfig, PipelineConfig};
use crate::db::registry::ConnectionRegistry;
use crate::db::schema_manager::SchemaManager;
use crate::error::{ExecutionErrorKind, QueryError};
use crate::history::{QueryHistory, QueryRecord};
use crate::llm::LlmManager;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use context::build_context;
use generator::SqlGenerator;
use sandbox::SandboxExecutor;
use types::{ExecutionResult, GeneratedSql, QueryOutcome, QueryRequest};
use visualize::{classify, VisualizationIntent};

/// Original text stored for statements submitted directly as SQL.
pub const RAW_SQL_LABEL: &str = "Raw SQL Query";

/// Where a submission is between generation and a usable result.
enum Stage {
    Execute { generated: GeneratedSql, retried: bool },
    Regenerate { failure: String },
}

/// Runs questions end to end: schema context, generation, sandboxed
/// execution, classification and the history record.
pub struct QueryService {
    registry: Arc<ConnectionRegistry>,
    schemas: Arc<SchemaManager>,
    history: Arc<QueryHistory>,
    generator: SqlGenerator,
    executor: SandboxExecutor,
    limits: PipelineConfig,
    category_threshold: usize,
}

impl QueryService {
    pub fn new(
        config: &AppConfig,
        registry: Arc<ConnectionRegistry>,
        schemas: Arc<SchemaManager>,
        history: Arc<QueryHistory>,
        llm: &LlmManager,
    ) -> Self {
        Self {
            registry,
            schemas,
            history,
            generator: SqlGenerator::new(
                llm.provider(),
                llm.params().clone(),
                config.pipeline.max_generation_attempts,
            ),
            executor: SandboxExecutor::from_config(&config.sandbox),
            limits: config.pipeline.clone(),
            category_threshold: config.visualization.category_threshold,
        }
    }

    async fn ensure_connection(&self, connection_id: &str) -> Result<(), QueryError> {
        if self.registry.contains(connection_id).await {
            Ok(())
        } else {
            Err(QueryError::ConnectionUnavailable(format!(
                "connection '{}' is not registered",
                connection_id
            )))
        }
    }

    async fn run(&self, connection_id: &str, sql: &str, cancel: &CancellationToken) -> Result<ExecutionResult, QueryError> {
        let handle = self.registry.acquire(connection_id).await?;
        self.executor.execute(sql, handle, cancel).await
    }

    /// Answers a natural-language question. Only a successful execution
    /// creates a history record.
    pub async fn submit(&self, request: QueryRequest) -> Result<QueryOutcome, QueryError> {
        request.validate()?;
        self.ensure_connection(&request.connection_id).await?;
        info!("Processing question for '{}': {}", request.connection_id, request.text);

        let snapshot = self.schemas.get_snapshot(&request.connection_id).await?;
        let context = build_context(
            &snapshot,
            self.limits.max_schema_tables,
            self.limits.max_columns_per_table,
        );

        let cancel = CancellationToken::new();
        let mut stage = Stage::Execute {
            generated: self.generator.generate_sql(&request, &context, None).await?,
            retried: false,
        };

        let (generated, result) = loop {
            stage = match stage {
                Stage::Execute { generated, retried } => {
                    match self.run(&request.connection_id, &generated.statement, &cancel).await {
                        Ok(result) => break (generated, result),
                        Err(QueryError::Execution { kind: ExecutionErrorKind::Syntax, message }) if !retried => {
                            warn!("Generated SQL failed, regenerating once: {}", message);
                            Stage::Regenerate {
                                failure: format!(
                                    "the query `{}` failed with: {}",
                                    generated.statement, message
                                ),
                            }
                        }
                        Err(e) => return Err(e),
                    }
                }
                Stage::Regenerate { failure } => Stage::Execute {
                    generated: self
                        .generator
                        .generate_sql(&request, &context, Some(&failure))
                        .await?,
                    retried: true,
                },
            };
        };

        let intent = classify(&result, self.category_threshold);
        let record = self
            .history
            .record(&request, &generated.statement, &result, intent)
            .await;
        Ok(QueryOutcome::new(record, result))
    }

    /// Runs caller-supplied SQL through the same guard, sandbox and ledger.
    pub async fn execute_raw(&self, connection_id: &str, sql: &str) -> Result<QueryOutcome, QueryError> {
        let request = QueryRequest::new(RAW_SQL_LABEL, connection_id);
        request.validate()?;
        let statement = guard::check_read_only(sql)?;
        self.ensure_connection(connection_id).await?;

        let result = self.run(connection_id, &statement, &CancellationToken::new()).await?;
        let intent = classify(&result, self.category_threshold);
        let record = self.history.record(&request, &statement, &result, intent).await;
        Ok(QueryOutcome::new(record, result))
    }

    /// Re-executes a stored query without calling the generator.
    pub async fn rerun(&self, query_id: &str) -> Result<QueryOutcome, QueryError> {
        let cancel = CancellationToken::new();
        let (record, result) = self
            .history
            .rerun(query_id, |record| async move {
                let result = self
                    .run(&record.connection_id, &record.generated_sql, &cancel)
                    .await?;
                let intent: VisualizationIntent = classify(&result, self.category_threshold);
                Ok((result, intent))
            })
            .await?;
        Ok(QueryOutcome::new(record, result))
    }

    /// Fresh data for a stored query; the ledger is left untouched.
    pub async fn fetch_for_export(&self, query_id: &str) -> Result<(QueryRecord, ExecutionResult), QueryError> {
        let record = self.history.get(query_id).await?;
        let result = self
            .run(&record.connection_id, &record.generated_sql, &CancellationToken::new())
            .await?;
        Ok((record, result))
    }

    pub fn history(&self) -> &QueryHistory {
        &self.history
    }
}
