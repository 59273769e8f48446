use axum::{
    extract::State,
    routing::{delete, get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;

use super::handlers;
use super::state::AppState;

// Liveness and a root banner
pub fn service_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
}

// API Routes - REST API for programmatic access
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new().nest(
        "/api",
        Router::new()
            // Query pipeline and history
            .route("/queries", post(handlers::queries::submit_query))
            .route("/queries/sql", post(handlers::queries::submit_sql))
            .route("/queries/history", get(handlers::queries::list_history))
            .route("/queries/ai/status", get(handlers::queries::ai_status))
            .route(
                "/queries/{id}",
                get(handlers::queries::get_query).delete(handlers::queries::delete_query),
            )
            .route("/queries/{id}/rerun", post(handlers::queries::rerun_query))
            // Connections
            .route(
                "/connections",
                get(handlers::connections::list_connections)
                    .post(handlers::connections::create_connection),
            )
            .route("/connections/{id}", delete(handlers::connections::delete_connection))
            .route("/connections/{id}/test", get(handlers::connections::test_connection))
            // Schema
            .route("/schema/{id}", get(handlers::schema::get_schema))
            .route("/schema/{id}/tables", get(handlers::schema::list_tables))
            .route("/schema/{id}/tables/{table}", get(handlers::schema::get_table))
            .route("/schema/{id}/refresh", post(handlers::schema::refresh_schema))
            // Data export
            .route("/exports/csv/{id}", post(handlers::exports::export_csv))
            .route("/exports/json/{id}", post(handlers::exports::export_json))
            .route("/exports/templates", get(handlers::exports::query_templates)),
    )
}

async fn root() -> Json<Value> {
    Json(json!({ "message": "AskDash API is running" }))
}

async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let uptime = chrono::Utc::now()
        .signed_duration_since(state.startup_time)
        .num_seconds();
    Json(json!({
        "status": "healthy",
        "uptime_seconds": uptime,
        "connections": state.registry.list().await.len(),
        "history_entries": state.history.len().await,
    }))
}
