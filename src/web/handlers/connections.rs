use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

use crate::db::registry::ConnectionInfo;
use crate::error::QueryError;
use crate::web::handlers::ApiResult;
use crate::web::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateConnectionRequest {
    pub connection_id: String,
    #[serde(default)]
    pub db_type: Option<String>,
    /// Path of the DuckDB file
    pub database: String,
}

pub async fn list_connections(State(state): State<Arc<AppState>>) -> Json<Vec<ConnectionInfo>> {
    Json(state.registry.list().await)
}

pub async fn create_connection(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreateConnectionRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<ConnectionInfo>)> {
    let Json(request) = payload?;

    if let Some(db_type) = request.db_type.as_deref() {
        if !db_type.eq_ignore_ascii_case("duckdb") {
            return Err(QueryError::InvalidRequest(format!("Unsupported database type: {}", db_type)).into());
        }
    }

    let info = state
        .registry
        .register(&request.connection_id, &request.database)
        .await?;

    // The connection is usable for raw SQL even if introspection fails
    if let Err(e) = state.schema_manager.refresh(&info.connection_id).await {
        warn!("Registered '{}' without a schema snapshot: {}", info.connection_id, e);
    }

    Ok((StatusCode::CREATED, Json(info)))
}

pub async fn delete_connection(
    State(state): State<Arc<AppState>>,
    Path(connection_id): Path<String>,
) -> ApiResult<Json<Value>> {
    state.registry.remove(&connection_id).await?;
    state.schema_manager.evict(&connection_id).await;
    state.history.forget_connection(&connection_id);
    Ok(Json(json!({
        "message": format!("Connection {} deleted successfully", connection_id)
    })))
}

pub async fn test_connection(
    State(state): State<Arc<AppState>>,
    Path(connection_id): Path<String>,
) -> ApiResult<Json<Value>> {
    if !state.registry.contains(&connection_id).await {
        return Err(QueryError::NotFound(format!("connection '{}'", connection_id)).into());
    }

    let connected = state.registry.test(&connection_id).await.unwrap_or(false);
    Ok(Json(json!({
        "connection_id": connection_id,
        "status": if connected { "connected" } else { "disconnected" }
    })))
}
