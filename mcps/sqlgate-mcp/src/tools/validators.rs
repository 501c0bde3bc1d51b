//! Admission checks applied by tool handlers before touching the database

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

use super::ToolError;

/// Longest accepted schema, table or index name
pub const MAX_IDENTIFIER_LEN: usize = 128;

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("Invalid identifier regex"));

// A destructive statement smuggled in after a separator
static STACKED_STATEMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i);\s*(drop\s+table|delete\s+from|truncate\s+table|alter\s+table|create\s+table|drop\s+database|shutdown)\b",
    )
    .expect("Invalid stacked statement regex")
});

/// Check a schema, table or index name
pub fn validate_identifier(kind: &str, value: &str) -> Result<(), ToolError> {
    if value.is_empty() {
        return Err(ToolError::Rejected(format!("{} must not be empty", kind)));
    }
    if value.len() > MAX_IDENTIFIER_LEN {
        return Err(ToolError::Rejected(format!(
            "{} must be at most {} characters",
            kind, MAX_IDENTIFIER_LEN
        )));
    }
    if !IDENTIFIER.is_match(value) {
        return Err(ToolError::Rejected(format!(
            "{} '{}' contains invalid characters",
            kind, value
        )));
    }
    Ok(())
}

/// Check SQL text before it is forwarded verbatim
pub fn validate_query(query: &str) -> Result<(), ToolError> {
    if query.trim().is_empty() {
        return Err(ToolError::Rejected("Query must not be empty".to_string()));
    }
    if STACKED_STATEMENT.is_match(query) {
        return Err(ToolError::Rejected(
            "Query contains a potentially dangerous stacked statement".to_string(),
        ));
    }
    Ok(())
}

/// Whether a statement only reads
pub fn is_read_only_query(query: &str) -> bool {
    let normalized = query.trim_start().to_uppercase();
    ["SELECT", "WITH", "EXPLAIN", "PRAGMA"]
        .iter()
        .any(|keyword| normalized.starts_with(keyword))
}

/// Positional parameters may not contain nulls
pub fn validate_parameters(params: &[Value]) -> Result<(), ToolError> {
    match params.iter().position(Value::is_null) {
        Some(i) => Err(ToolError::Rejected(format!(
            "Parameter at position {} is null",
            i
        ))),
        None => Ok(()),
    }
}
