//! COPY text encoding.
//!
//! Rows are staged with `COPY ... FROM STDIN (FORMAT TEXT)`, so every value
//! is rendered in the text form PostgreSQL parses into the staging column's
//! type. The staging table copies the target's column types.

use serde_json::Value;

use crate::core::schema::ColumnInfo;
use crate::core::value::SqlValue;
use crate::timestamp::canonical;

/// Encode one row as a COPY text line, newline included.
pub fn encode_row(out: &mut String, columns: &[ColumnInfo], values: &[SqlValue]) {
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            out.push('\t');
        }
        match columns.get(i) {
            Some(col) => out.push_str(&value_to_text(value, col)),
            None => out.push_str("\\N"),
        }
    }
    out.push('\n');
}

/// Render a value for a column of the given type.
pub fn value_to_text(value: &SqlValue, column: &ColumnInfo) -> String {
    match value {
        SqlValue::Null => "\\N".to_string(),
        SqlValue::Bool(b) => if *b { "t" } else { "f" }.to_string(),
        SqlValue::Int(i) => i.to_string(),
        SqlValue::Float(f) if f.is_nan() => "NaN".to_string(),
        SqlValue::Float(f) if f.is_infinite() => {
            if f.is_sign_positive() { "Infinity" } else { "-Infinity" }.to_string()
        }
        SqlValue::Float(f) => f.to_string(),
        SqlValue::Text(s) => escape_copy_text(s),
        SqlValue::Bytes(b) => format!("\\\\x{}", hex::encode(b)),
        SqlValue::Timestamp(ts) => canonical(ts),
        SqlValue::Json(Value::Array(items)) if column.is_array() => {
            escape_copy_text(&array_literal(items))
        }
        SqlValue::Json(v) => escape_copy_text(&v.to_string()),
    }
}

/// Escape text for PostgreSQL COPY.
pub fn escape_copy_text(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '\t' => result.push_str("\\t"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            _ => result.push(c),
        }
    }
    result
}

/// A one-dimensional PostgreSQL array literal, e.g. `{"press","lathe"}`.
pub fn array_literal(items: &[Value]) -> String {
    let elements: Vec<String> = items
        .iter()
        .map(|item| match item {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            Value::String(s) => quote_element(s),
            nested => quote_element(&nested.to_string()),
        })
        .collect();
    format!("{{{}}}", elements.join(","))
}

fn quote_element(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}
