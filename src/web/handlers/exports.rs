use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::info;

use crate::history::QueryRecord;
use crate::pipeline::types::ExecutionResult;
use crate::web::handlers::{ApiError, ApiResult};
use crate::web::state::AppState;

fn attachment_headers(content_type: &'static str, query_id: &str, extension: &str) -> HeaderMap {
    let short_id: String = query_id.chars().take(8).collect();
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    if let Ok(disposition) =
        HeaderValue::from_str(&format!("attachment; filename=query_{}.{}", short_id, extension))
    {
        headers.insert(header::CONTENT_DISPOSITION, disposition);
    }
    headers
}

fn csv_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Serializes rows as CSV, header first, in result column order.
pub fn write_csv(result: &ExecutionResult) -> Result<Vec<u8>, csv::Error> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(&result.columns)?;
    for row in &result.rows {
        writer.write_record(
            result
                .columns
                .iter()
                .map(|c| row.get(c).map(csv_cell).unwrap_or_default()),
        )?;
    }
    writer.flush()?;
    writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))
}

pub async fn export_csv(
    State(state): State<Arc<AppState>>,
    Path(query_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let (_, result) = state.service.fetch_for_export(&query_id).await?;
    if result.rows.is_empty() {
        return Err(ApiError::BadRequest("No data to export".to_string()));
    }

    let body = write_csv(&result).map_err(|e| ApiError::Internal(format!("CSV export failed: {}", e)))?;
    info!("Exported {} rows of {} as CSV", result.row_count, query_id);
    Ok((attachment_headers("text/csv", &query_id, "csv"), body))
}

#[derive(Debug, Serialize)]
struct QueryInfo<'a> {
    #[serde(flatten)]
    record: &'a QueryRecord,
    exported_row_count: usize,
    truncated: bool,
}

pub async fn export_json(
    State(state): State<Arc<AppState>>,
    Path(query_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let (record, result) = state.service.fetch_for_export(&query_id).await?;
    let document = json!({
        "query_info": QueryInfo {
            record: &record,
            exported_row_count: result.row_count,
            truncated: result.truncated,
        },
        "data": result.rows,
    });

    let body = serde_json::to_vec_pretty(&document)
        .map_err(|e| ApiError::Internal(format!("JSON export failed: {}", e)))?;
    info!("Exported {} rows of {} as JSON", result.row_count, query_id);
    Ok((attachment_headers("application/json", &query_id, "json"), body))
}

/// Canned questions offered to new users, grouped by category.
pub async fn query_templates() -> Json<Value> {
    const TEMPLATES: &[(&str, &str, &str, &str, &str)] = &[
        ("sales_by_month", "Sales by Month", "Show total sales by month for the last 12 months", "Sales Analytics", "line_chart"),
        ("top_products", "Top Products by Revenue", "What are the top 10 products by revenue?", "Product Analytics", "bar_chart"),
        ("customer_segments", "Customer Segments", "How many customers do we have by region?", "Customer Analytics", "pie_chart"),
        ("total_revenue", "Total Revenue", "What is the total revenue for this year?", "KPIs", "kpi"),
        ("customer_growth", "Customer Growth", "Show new customer registrations by month", "Growth Analytics", "line_chart"),
        ("inventory_levels", "Inventory Status", "Show current inventory levels by product", "Inventory Analytics", "table"),
    ];

    let templates: Vec<Map<String, Value>> = TEMPLATES
        .iter()
        .map(|(id, name, template, category, hint)| {
            let mut entry = Map::new();
            entry.insert("id".to_string(), json!(id));
            entry.insert("name".to_string(), json!(name));
            entry.insert("template".to_string(), json!(template));
            entry.insert("category".to_string(), json!(category));
            entry.insert("visualization_hint".to_string(), json!(hint));
            entry
        })
        .collect();

    let mut categories: Vec<&str> = TEMPLATES.iter().map(|t| t.3).collect();
    categories.sort_unstable();
    categories.dedup();

    Json(json!({ "templates": templates, "categories": categories }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::ValueKind;

    #[test]
    fn csv_keeps_column_order_and_blanks_nulls() {
        let result = ExecutionResult {
            columns: vec!["name".to_string(), "total".to_string()],
            column_kinds: vec![ValueKind::Text, ValueKind::Numeric],
            rows: vec![
                json!({"total": 3, "name": "North, East"}).as_object().cloned().unwrap(),
                json!({"total": null, "name": "South"}).as_object().cloned().unwrap(),
            ],
            row_count: 2,
            execution_time_ms: 1.0,
            truncated: false,
        };

        let csv = String::from_utf8(write_csv(&result).unwrap()).unwrap();
        assert_eq!(csv, "name,total\n\"North, East\",3\nSouth,\n");
    }
}
