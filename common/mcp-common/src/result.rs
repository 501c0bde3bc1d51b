//! Result helpers for MCP tool responses
//!
//! Tool results carry two views of the same value: the machine-readable
//! `structuredContent` and a pretty-printed JSON text block for display.

use rmcp::{
    model::{CallToolResult, Content},
    ErrorData as McpError,
};
use serde::Serialize;

use crate::error::ResultExt;

/// Create a successful response from any serializable data
///
/// The value is placed in `structuredContent` and mirrored, pretty-printed,
/// into a single text content block.
///
/// ```rust,ignore
/// use mcp_common::structured_success;
///
/// let result = structured_success(&serde_json::json!({"rows": 3}))?;
/// ```
pub fn structured_success<T: Serialize>(data: &T) -> Result<CallToolResult, McpError> {
    let value = serde_json::to_value(data).to_mcp_err()?;
    let text = serde_json::to_string_pretty(&value).to_mcp_err()?;
    let mut result = CallToolResult::success(vec![Content::text(text)]);
    result.structured_content = Some(value);
    Ok(result)
}
