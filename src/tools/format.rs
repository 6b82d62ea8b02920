//! Output formatting utilities.
//!
//! This module provides the output format type and the renderers used to
//! turn result rows into text for chat transcripts or downloads.

use crate::error::{DbError, DbResult};
use crate::models::Row;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use unicode_width::UnicodeWidthStr;

/// Output format for query results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Structured rows only (default)
    #[default]
    Json,
    /// ASCII table (like psql)
    Table,
    /// Markdown table
    Markdown,
    /// Comma-separated values with a header row
    Csv,
}

pub fn format_value(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => "NULL".to_string(),
        JsonValue::Bool(b) => b.to_string(),
        JsonValue::Number(n) => n.to_string(),
        JsonValue::String(s) => s.clone(),
        JsonValue::Array(arr) => serde_json::to_string(arr).unwrap_or_default(),
        JsonValue::Object(obj) => serde_json::to_string(obj).unwrap_or_default(),
    }
}

/// Render rows in the requested format. `Json` yields no text.
pub fn render(
    format: OutputFormat,
    columns: &[String],
    rows: &[Row],
    execution_time_ms: u64,
) -> DbResult<Option<String>> {
    let text = match format {
        OutputFormat::Json => return Ok(None),
        OutputFormat::Table => format_as_table(columns, rows, execution_time_ms),
        OutputFormat::Markdown => format_as_markdown(columns, rows),
        OutputFormat::Csv => format_as_csv(columns, rows)?,
    };
    Ok(Some(text))
}

pub fn format_as_table(columns: &[String], rows: &[Row], execution_time_ms: u64) -> String {
    if columns.is_empty() {
        return "(0 rows)".to_string();
    }

    let mut widths: Vec<usize> = columns.iter().map(|c| c.width()).collect();
    for row in rows {
        for (i, col) in columns.iter().enumerate() {
            if let Some(value) = row.get(col) {
                widths[i] = widths[i].max(format_value(value).width());
            }
        }
    }

    let mut output = String::new();
    let separator: String = widths
        .iter()
        .map(|w| format!("+{}", "-".repeat(w + 2)))
        .collect::<String>()
        + "+\n";

    output.push_str(&separator);
    let header: String = columns
        .iter()
        .zip(&widths)
        .map(|(col, w)| format!("| {} ", pad_center(col, *w)))
        .collect::<String>()
        + "|\n";
    output.push_str(&header);
    output.push_str(&separator);

    for row in rows {
        let row_str: String = columns
            .iter()
            .zip(&widths)
            .map(|(col, w)| {
                let value = row.get(col).unwrap_or(&JsonValue::Null);
                let formatted = format_value(value);
                let padding = " ".repeat(w.saturating_sub(formatted.width()));
                if matches!(value, JsonValue::Number(_)) {
                    format!("| {}{} ", padding, formatted)
                } else {
                    format!("| {}{} ", formatted, padding)
                }
            })
            .collect::<String>()
            + "|\n";
        output.push_str(&row_str);
    }

    output.push_str(&separator);

    let row_text = if rows.len() == 1 { "row" } else { "rows" };
    output.push_str(&format!(
        "({} {}, {:.2} sec)\n",
        rows.len(),
        row_text,
        execution_time_ms as f64 / 1000.0
    ));

    output
}

/// Center text by display width so wide characters line up.
fn pad_center(text: &str, width: usize) -> String {
    let total = width.saturating_sub(text.width());
    let left = total / 2;
    format!("{}{}{}", " ".repeat(left), text, " ".repeat(total - left))
}

pub fn format_as_markdown(columns: &[String], rows: &[Row]) -> String {
    if columns.is_empty() {
        return "*No rows*".to_string();
    }

    let mut output = String::new();

    let header: String = columns
        .iter()
        .map(|c| format!("| {} ", escape_markdown(c)))
        .collect::<String>()
        + "|\n";
    output.push_str(&header);

    let sep: String = columns.iter().map(|_| "|---").collect::<String>() + "|\n";
    output.push_str(&sep);

    for row in rows {
        let row_str: String = columns
            .iter()
            .map(|col| {
                let value = row.get(col).unwrap_or(&JsonValue::Null);
                format!("| {} ", escape_markdown(&format_value(value)))
            })
            .collect::<String>()
            + "|\n";
        output.push_str(&row_str);
    }

    output.push_str(&format!("\n*{} rows*", rows.len()));

    output
}

fn escape_markdown(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

/// CSV export with a header row. NULL becomes an empty field.
pub fn format_as_csv(columns: &[String], rows: &[Row]) -> DbResult<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    let csv_error = |e: csv::Error| DbError::internal(format!("CSV export failed: {}", e));

    writer.write_record(columns).map_err(csv_error)?;
    for row in rows {
        let record = columns.iter().map(|col| match row.get(col) {
            None | Some(JsonValue::Null) => String::new(),
            Some(value) => format_value(value),
        });
        writer.write_record(record).map_err(csv_error)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| DbError::internal(format!("CSV export failed: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| DbError::internal(format!("CSV export failed: {}", e)))
}
