//! Error handling utilities for MCP servers
//!
//! Provides the stable error-code enumeration used on the wire, constructors
//! for the Error Object (`rmcp::ErrorData`), and traits for converting
//! library errors into it.
//!
//! | Code     | Meaning        |
//! |----------|----------------|
//! | -32700   | ParseError     |
//! | -32600   | InvalidRequest |
//! | -32601   | MethodNotFound |
//! | -32602   | InvalidParams  |
//! | -32603   | InternalError  |
//! | -32001   | ToolNotFound   |

use rmcp::model::ErrorCode;
use rmcp::ErrorData as McpError;
use serde_json::Value;

/// Error codes a response envelope may carry
///
/// The numeric values are part of the wire contract and never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum RpcErrorCode {
    /// The payload was not valid JSON
    ParseError = -32700,
    /// The payload was JSON but not a valid request envelope
    InvalidRequest = -32600,
    /// The method is not in the routing table
    MethodNotFound = -32601,
    /// The method parameters were rejected
    InvalidParams = -32602,
    /// The request failed while executing
    InternalError = -32603,
    /// `tools/call` named a tool that is not registered
    ToolNotFound = -32001,
}

impl RpcErrorCode {
    /// Numeric wire value
    pub const fn code(self) -> i32 {
        self as i32
    }

    /// Map a wire value back to a known code
    pub fn from_code(code: i32) -> Option<Self> {
        [
            Self::ParseError,
            Self::InvalidRequest,
            Self::MethodNotFound,
            Self::InvalidParams,
            Self::InternalError,
            Self::ToolNotFound,
        ]
        .into_iter()
        .find(|c| c.code() == code)
    }

    /// Message used when the failure site supplies none
    pub const fn default_message(self) -> &'static str {
        match self {
            Self::ParseError => "Parse error",
            Self::InvalidRequest => "Invalid request",
            Self::MethodNotFound => "Method not found",
            Self::InvalidParams => "Invalid params",
            Self::InternalError => "Internal error",
            Self::ToolNotFound => "Tool not found",
        }
    }
}

impl From<RpcErrorCode> for ErrorCode {
    fn from(code: RpcErrorCode) -> Self {
        ErrorCode(code.code())
    }
}

/// Build an Error Object with an explicit code
pub fn rpc_error(code: RpcErrorCode, message: impl Into<String>) -> McpError {
    McpError::new(code.into(), message.into(), None)
}

/// Build an Error Object carrying diagnostic data
pub fn rpc_error_with_data(code: RpcErrorCode, message: impl Into<String>, data: Value) -> McpError {
    McpError::new(code.into(), message.into(), Some(data))
}

/// Read the code of an Error Object as a known enumeration value
pub fn error_code_of(error: &McpError) -> Option<RpcErrorCode> {
    RpcErrorCode::from_code(error.code.0)
}

/// Trait for converting errors into MCP-compatible errors
///
/// Implement this trait for external error types to enable the `?` operator
/// in tool implementations.
pub trait IntoMcpError {
    /// Convert this error into an MCP error
    fn into_mcp_error(self) -> McpError;
}

impl IntoMcpError for serde_json::Error {
    fn into_mcp_error(self) -> McpError {
        internal_error(format!("JSON error: {}", self))
    }
}

/// Extension trait for Result types to convert to MCP errors
///
/// ```rust,ignore
/// use mcp_common::ResultExt;
///
/// let value = serde_json::to_value(&data).to_mcp_err()?;
/// ```
pub trait ResultExt<T> {
    /// Convert the error to an MCP error
    fn to_mcp_err(self) -> Result<T, McpError>;
}

impl<T, E: IntoMcpError> ResultExt<T> for Result<T, E> {
    fn to_mcp_err(self) -> Result<T, McpError> {
        self.map_err(|e| e.into_mcp_error())
    }
}

/// The payload could not be decoded as JSON
pub fn parse_error(detail: impl Into<String>) -> McpError {
    rpc_error_with_data(
        RpcErrorCode::ParseError,
        RpcErrorCode::ParseError.default_message(),
        Value::String(detail.into()),
    )
}

/// The envelope is malformed
pub fn invalid_request(message: impl Into<String>) -> McpError {
    rpc_error(RpcErrorCode::InvalidRequest, message)
}

/// The method is not routable
pub fn method_not_found(method: &str) -> McpError {
    rpc_error(RpcErrorCode::MethodNotFound, format!("Method not found: {}", method))
}

/// Create an invalid params error with a message
pub fn invalid_params(message: impl Into<String>) -> McpError {
    rpc_error(RpcErrorCode::InvalidParams, message)
}

/// Create an internal error with a message
pub fn internal_error(message: impl Into<String>) -> McpError {
    rpc_error(RpcErrorCode::InternalError, message)
}

/// The requested tool is not registered
pub fn tool_not_found(name: &str) -> McpError {
    rpc_error(RpcErrorCode::ToolNotFound, format!("Tool not found: {}", name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(RpcErrorCode::ParseError.code(), -32700);
        assert_eq!(RpcErrorCode::InvalidRequest.code(), -32600);
        assert_eq!(RpcErrorCode::MethodNotFound.code(), -32601);
        assert_eq!(RpcErrorCode::InvalidParams.code(), -32602);
        assert_eq!(RpcErrorCode::InternalError.code(), -32603);
        assert_eq!(RpcErrorCode::ToolNotFound.code(), -32001);
    }

    #[test]
    fn test_from_code_roundtrips_known_values() {
        assert_eq!(RpcErrorCode::from_code(-32001), Some(RpcErrorCode::ToolNotFound));
        assert_eq!(RpcErrorCode::from_code(42), None);
    }

    #[test]
    fn test_tool_not_found_names_tool() {
        let err = tool_not_found("nope");
        assert_eq!(error_code_of(&err), Some(RpcErrorCode::ToolNotFound));
        assert!(err.message.contains("nope"));
    }

    #[test]
    fn test_parse_error_keeps_detail() {
        let err = parse_error("expected value at line 1");
        assert_eq!(err.message, "Parse error");
        assert_eq!(err.data, Some(Value::String("expected value at line 1".into())));
    }

    #[test]
    fn test_result_ext() {
        let result: Result<Value, serde_json::Error> = serde_json::from_str("{oops");
        let err = result.to_mcp_err().unwrap_err();
        assert_eq!(error_code_of(&err), Some(RpcErrorCode::InternalError));
        assert!(err.message.starts_with("JSON error:"));
    }

    #[test]
    fn test_error_object_serializes_without_empty_data() {
        let value = serde_json::to_value(invalid_params("Missing required parameters: query")).unwrap();
        assert_eq!(value["code"], -32602);
        assert_eq!(value["message"], "Missing required parameters: query");
        assert!(value.get("data").is_none());
    }
}
