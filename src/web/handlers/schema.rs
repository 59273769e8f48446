use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::db::schema::{SchemaSnapshot, TableSchema};
use crate::error::QueryError;
use crate::web::handlers::ApiResult;
use crate::web::state::AppState;

pub async fn get_schema(
    State(state): State<Arc<AppState>>,
    Path(connection_id): Path<String>,
) -> ApiResult<Json<SchemaSnapshot>> {
    let snapshot = state.schema_manager.get_snapshot(&connection_id).await?;
    Ok(Json(snapshot.as_ref().clone()))
}

pub async fn list_tables(
    State(state): State<Arc<AppState>>,
    Path(connection_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let snapshot = state.schema_manager.get_snapshot(&connection_id).await?;
    let tables = snapshot.table_names();
    Ok(Json(json!({ "count": tables.len(), "tables": tables })))
}

pub async fn get_table(
    State(state): State<Arc<AppState>>,
    Path((connection_id, table_name)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let snapshot = state.schema_manager.get_snapshot(&connection_id).await?;
    let table: &TableSchema = snapshot
        .tables
        .get(&table_name)
        .ok_or_else(|| QueryError::NotFound(format!("table '{}'", table_name)))?;
    let foreign_keys: Vec<_> = snapshot.foreign_keys_for(&table_name).collect();
    let indexes: Vec<_> = snapshot
        .indexes
        .iter()
        .filter(|ix| ix.table == table_name)
        .collect();

    Ok(Json(json!({
        "table_name": table_name,
        "table_info": {
            "columns": table.columns,
            "foreign_keys": foreign_keys,
            "indexes": indexes,
        }
    })))
}

pub async fn refresh_schema(
    State(state): State<Arc<AppState>>,
    Path(connection_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let snapshot = state.schema_manager.refresh(&connection_id).await?;
    Ok(Json(json!({
        "message": format!("Schema for {} refreshed", connection_id),
        "tables": snapshot.tables.len(),
        "captured_at": snapshot.captured_at,
    })))
}
