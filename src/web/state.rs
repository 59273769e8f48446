use crate::config::AppConfig;
use crate::db::registry::ConnectionRegistry;
use crate::db::schema_manager::SchemaManager;
use crate::history::QueryHistory;
use crate::llm::LlmManager;
use crate::pipeline::QueryService;
use std::sync::Arc;

/// Shared application state for the web server
pub struct AppState {
    pub config: AppConfig,
    pub registry: Arc<ConnectionRegistry>,
    pub schema_manager: Arc<SchemaManager>,
    pub llm: LlmManager,
    pub history: Arc<QueryHistory>,
    pub service: QueryService,
    pub startup_time: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        registry: Arc<ConnectionRegistry>,
        schema_manager: Arc<SchemaManager>,
        llm: LlmManager,
        history: Arc<QueryHistory>,
    ) -> Self {
        let service = QueryService::new(
            &config,
            Arc::clone(&registry),
            Arc::clone(&schema_manager),
            Arc::clone(&history),
            &llm,
        );

        Self {
            config,
            registry,
            schema_manager,
            llm,
            history,
            service,
            startup_time: chrono::Utc::now(),
        }
    }
}
