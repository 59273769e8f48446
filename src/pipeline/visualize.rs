use crate::pipeline::types::{ExecutionResult, ValueKind};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Distinct first-column values up to which a category breakdown is a pie.
pub const DEFAULT_CATEGORY_THRESHOLD: usize = 8;

static NULL: Value = Value::Null;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisualizationIntent {
    Kpi,
    BarChart,
    LineChart,
    PieChart,
    Table,
}

impl VisualizationIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            VisualizationIntent::Kpi => "kpi",
            VisualizationIntent::BarChart => "bar_chart",
            VisualizationIntent::LineChart => "line_chart",
            VisualizationIntent::PieChart => "pie_chart",
            VisualizationIntent::Table => "table",
        }
    }
}

impl fmt::Display for VisualizationIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VisualizationIntent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "kpi" => Ok(VisualizationIntent::Kpi),
            "bar_chart" => Ok(VisualizationIntent::BarChart),
            "line_chart" => Ok(VisualizationIntent::LineChart),
            "pie_chart" => Ok(VisualizationIntent::PieChart),
            "table" => Ok(VisualizationIntent::Table),
            other => Err(format!("unknown visualization type: {}", other)),
        }
    }
}

/// Picks a display intent from the shape of a result. Column names are never
/// consulted, so the same data always yields the same intent.
pub fn classify(result: &ExecutionResult, category_threshold: usize) -> VisualizationIntent {
    if result.rows.is_empty() || result.columns.is_empty() {
        return VisualizationIntent::Table;
    }

    if result.rows.len() == 1 && result.columns.len() == 1 {
        return if is_numeric(result, 0) {
            VisualizationIntent::Kpi
        } else {
            VisualizationIntent::Table
        };
    }

    if result.columns.len() >= 2 && is_numeric(result, 1) {
        if is_temporal(result, 0) {
            return VisualizationIntent::LineChart;
        }
        if !is_numeric(result, 0) {
            let distinct: HashSet<String> = column_values(result, 0)
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect();
            return if distinct.len() <= category_threshold {
                VisualizationIntent::PieChart
            } else {
                VisualizationIntent::BarChart
            };
        }
    }

    VisualizationIntent::Table
}

fn column_values(result: &ExecutionResult, index: usize) -> impl Iterator<Item = &Value> {
    let name = &result.columns[index];
    result.rows.iter().map(move |row| row.get(name).unwrap_or(&NULL))
}

fn non_null_values(result: &ExecutionResult, index: usize) -> impl Iterator<Item = &Value> {
    column_values(result, index).filter(|v| !v.is_null())
}

fn declared_kind(result: &ExecutionResult, index: usize) -> Option<ValueKind> {
    result.column_kinds.get(index).copied()
}

fn is_numeric(result: &ExecutionResult, index: usize) -> bool {
    match declared_kind(result, index) {
        Some(ValueKind::Numeric) => true,
        Some(ValueKind::Other) | None => {
            let mut values = non_null_values(result, index).peekable();
            values.peek().is_some() && values.all(Value::is_number)
        }
        Some(_) => false,
    }
}

fn is_temporal(result: &ExecutionResult, index: usize) -> bool {
    if declared_kind(result, index) == Some(ValueKind::Temporal) {
        return true;
    }
    let mut values = non_null_values(result, index).peekable();
    values.peek().is_some()
        && values.all(|v| v.as_str().is_some_and(looks_like_date))
}

fn looks_like_date(s: &str) -> bool {
    let s = s.trim();
    const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d"];
    const DATETIME_FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
    ];

    DATE_FORMATS.iter().any(|f| NaiveDate::parse_from_str(s, f).is_ok())
        || DATETIME_FORMATS.iter().any(|f| NaiveDateTime::parse_from_str(s, f).is_ok())
        || DateTime::parse_from_rfc3339(s).is_ok()
        // YYYY-MM and "Jan 2024" month buckets
        || NaiveDate::parse_from_str(&format!("{}-01", s), "%Y-%m-%d").is_ok()
        || NaiveDate::parse_from_str(&format!("01 {}", s), "%d %b %Y").is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};

    fn result(columns: &[&str], kinds: Option<Vec<ValueKind>>, rows: Vec<Value>) -> ExecutionResult {
        let rows: Vec<Map<String, Value>> = rows
            .into_iter()
            .map(|r| r.as_object().cloned().unwrap())
            .collect();
        ExecutionResult {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            column_kinds: kinds.unwrap_or_default(),
            row_count: rows.len(),
            rows,
            execution_time_ms: 1.0,
            truncated: false,
        }
    }

    #[test]
    fn single_number_is_a_kpi() {
        let r = result(&["total"], None, vec![json!({"total": 42})]);
        assert_eq!(classify(&r, DEFAULT_CATEGORY_THRESHOLD), VisualizationIntent::Kpi);

        let r = result(&["name"], None, vec![json!({"name": "Alice"})]);
        assert_eq!(classify(&r, DEFAULT_CATEGORY_THRESHOLD), VisualizationIntent::Table);
    }

    #[test]
    fn month_strings_with_numbers_are_a_line_chart() {
        let rows = (1..=6)
            .map(|m| json!({"month": format!("2024-{:02}", m), "revenue": m * 100}))
            .collect();
        let r = result(&["month", "revenue"], None, rows);
        assert_eq!(classify(&r, DEFAULT_CATEGORY_THRESHOLD), VisualizationIntent::LineChart);
    }

    #[test]
    fn declared_temporal_kind_wins_over_value_sniffing() {
        let r = result(
            &["bucket", "n"],
            Some(vec![ValueKind::Temporal, ValueKind::Numeric]),
            vec![json!({"bucket": "week 1", "n": 3})],
        );
        assert_eq!(classify(&r, DEFAULT_CATEGORY_THRESHOLD), VisualizationIntent::LineChart);
    }

    #[test]
    fn category_count_decides_pie_or_bar() {
        let regions = ["North", "South", "East", "West"];
        let rows = regions
            .iter()
            .map(|r| json!({"region": r, "sales": 10}))
            .collect();
        let r = result(&["region", "sales"], None, rows);
        assert_eq!(classify(&r, DEFAULT_CATEGORY_THRESHOLD), VisualizationIntent::PieChart);

        let rows = (0..20)
            .map(|i| json!({"customer": format!("Customer {}", i), "sales": i}))
            .collect();
        let r = result(&["customer", "sales"], None, rows);
        assert_eq!(classify(&r, DEFAULT_CATEGORY_THRESHOLD), VisualizationIntent::BarChart);
        assert_eq!(classify(&r, 20), VisualizationIntent::PieChart);
    }

    #[test]
    fn empty_and_unshaped_results_are_tables() {
        let r = result(&["a", "b"], None, Vec::new());
        assert_eq!(classify(&r, DEFAULT_CATEGORY_THRESHOLD), VisualizationIntent::Table);

        let rows = vec![json!({"x": 1, "y": 2}), json!({"x": 2, "y": 3})];
        let r = result(&["x", "y"], None, rows);
        assert_eq!(classify(&r, DEFAULT_CATEGORY_THRESHOLD), VisualizationIntent::Table);

        let rows = vec![json!({"name": "a", "city": "b"})];
        let r = result(&["name", "city"], None, rows);
        assert_eq!(classify(&r, DEFAULT_CATEGORY_THRESHOLD), VisualizationIntent::Table);
    }

    #[test]
    fn column_names_do_not_matter() {
        let a = result(&["total"], None, vec![json!({"total": 7})]);
        let b = result(&["zzz"], None, vec![json!({"zzz": 7})]);
        assert_eq!(classify(&a, 8), classify(&b, 8));
        // Repeated calls agree
        assert_eq!(classify(&a, 8), classify(&a, 8));
    }

    #[test]
    fn date_formats() {
        for ok in ["2024-03-01", "2024/03/01", "2024-03", "Mar 2024", "2024-03-01 10:00:00", "2024-03-01T10:00:00Z"] {
            assert!(looks_like_date(ok), "{}", ok);
        }
        for bad in ["North", "42", "2024-13", ""] {
            assert!(!looks_like_date(bad), "{}", bad);
        }
    }

    #[test]
    fn intent_names_round_trip_through_serde() {
        assert_eq!(serde_json::to_string(&VisualizationIntent::PieChart).unwrap(), "\"pie_chart\"");
        assert_eq!("line_chart".parse::<VisualizationIntent>().unwrap(), VisualizationIntent::LineChart);
    }
}
