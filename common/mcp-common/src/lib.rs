//! MCP Common - Shared utilities for MCP servers
//!
//! - **Envelopes**: JSON-RPC 2.0 request/response types ([`jsonrpc`])
//! - **Errors**: stable error codes and Error Object constructors
//! - **Results**: helpers for building `CallToolResult` responses
//! - **Initialization**: tracing and panic-logging setup
//!
//! # Example
//!
//! ```rust,ignore
//! use mcp_common::{jsonrpc::Response, structured_success, tool_not_found};
//!
//! let reply = match registry.get(name) {
//!     Some(tool) => Response::success(id, serde_json::to_value(structured_success(&value)?)?),
//!     None => Response::failure(id, tool_not_found(name)),
//! };
//! ```

pub mod error;
pub mod init;
pub mod jsonrpc;
pub mod result;

pub use error::{
    error_code_of, internal_error, invalid_params, invalid_request, method_not_found, parse_error,
    rpc_error, rpc_error_with_data, tool_not_found, IntoMcpError, ResultExt, RpcErrorCode,
};
pub use init::{init_tracing, install_panic_logger};
pub use result::structured_success;

// Re-export rmcp types that are commonly needed
pub use rmcp::{
    model::{CallToolResult, Content, JsonObject, Tool},
    ErrorData as McpError,
};
