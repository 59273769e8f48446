use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use crate::history::QueryRecord;
use crate::llm::StatusReport;
use crate::pipeline::types::{QueryOutcome, QueryRequest};
use crate::web::handlers::ApiResult;
use crate::web::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RawSqlRequest {
    pub connection_id: String,
    pub sql: String,
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub connection_id: Option<String>,
    pub limit: Option<usize>,
}

pub async fn submit_query(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> ApiResult<Json<QueryOutcome>> {
    let Json(request) = payload?;
    Ok(Json(state.service.submit(request).await?))
}

pub async fn submit_sql(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RawSqlRequest>, JsonRejection>,
) -> ApiResult<Json<QueryOutcome>> {
    let Json(request) = payload?;
    info!("Executing raw SQL on '{}'", request.connection_id);
    Ok(Json(
        state
            .service
            .execute_raw(&request.connection_id, &request.sql)
            .await?,
    ))
}

pub async fn list_history(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HistoryParams>,
) -> Json<Vec<QueryRecord>> {
    let limit = params.limit.unwrap_or(state.config.history.default_limit);
    Json(state.history.list(params.connection_id.as_deref(), limit).await)
}

pub async fn get_query(
    State(state): State<Arc<AppState>>,
    Path(query_id): Path<String>,
) -> ApiResult<Json<QueryRecord>> {
    Ok(Json(state.history.get(&query_id).await?))
}

pub async fn rerun_query(
    State(state): State<Arc<AppState>>,
    Path(query_id): Path<String>,
) -> ApiResult<Json<QueryOutcome>> {
    Ok(Json(state.service.rerun(&query_id).await?))
}

pub async fn delete_query(
    State(state): State<Arc<AppState>>,
    Path(query_id): Path<String>,
) -> ApiResult<Json<Value>> {
    state.history.delete(&query_id).await?;
    Ok(Json(json!({ "message": format!("Query {} deleted successfully", query_id) })))
}

pub async fn ai_status(State(state): State<Arc<AppState>>) -> Json<StatusReport> {
    Json(state.llm.check_status().await)
}
