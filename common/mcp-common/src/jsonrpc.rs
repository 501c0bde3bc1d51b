//! JSON-RPC 2.0 envelopes
//!
//! Requests are decoded from loosely-typed JSON so that every way an
//! envelope can be malformed is reported as a structured error rather than a
//! serde failure. Responses are strongly typed: exactly one of `result` or
//! `error` is ever serialized.

use rmcp::ErrorData as McpError;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{error_code_of, invalid_request, RpcErrorCode};

/// Protocol tag carried by every envelope
pub const JSONRPC_VERSION: &str = "2.0";

/// A validated request envelope
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Correlation id. `None` marks a notification; `Some(Value::Null)` is
    /// an explicit null id, which is still answered.
    pub id: Option<Value>,
    pub method: String,
    pub params: Value,
}

impl Request {
    /// Validate a decoded JSON value as a request envelope
    ///
    /// On failure returns the id to answer with (null unless a usable id was
    /// present) and the InvalidRequest error.
    pub fn from_value(value: Value) -> Result<Self, (Value, McpError)> {
        let Value::Object(mut obj) = value else {
            return Err((Value::Null, invalid_request("Invalid request: must be an object")));
        };

        let id = obj.remove("id");
        let reply_id = id.clone().filter(is_valid_id).unwrap_or(Value::Null);

        if obj.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
            return Err((reply_id, invalid_request("Invalid JSON-RPC version")));
        }

        if let Some(ref id) = id {
            if !is_valid_id(id) {
                return Err((Value::Null, invalid_request("Id must be a string, number or null")));
            }
        }

        let method = match obj.remove("method") {
            None | Some(Value::Null) => {
                return Err((reply_id, invalid_request("Missing method")));
            }
            Some(Value::String(m)) => m,
            Some(_) => return Err((reply_id, invalid_request("Method must be a string"))),
        };

        Ok(Self {
            id,
            method,
            params: obj.remove("params").unwrap_or(Value::Null),
        })
    }

    /// Notifications carry no id and are never answered
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    /// `params` as an object, or an empty one when absent or not an object
    pub fn params_object(&self) -> Map<String, Value> {
        match &self.params {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        }
    }
}

fn is_valid_id(id: &Value) -> bool {
    matches!(id, Value::String(_) | Value::Number(_) | Value::Null)
}

/// Either half of a response envelope
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Result(Value),
    Error(McpError),
}

/// A response envelope
#[derive(Debug, Clone, Serialize)]
pub struct Response {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl Response {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            outcome: Outcome::Result(result),
        }
    }

    pub fn failure(id: Value, error: McpError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            outcome: Outcome::Error(error),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, Outcome::Error(_))
    }

    /// Known error code, if this is an error response
    pub fn error_code(&self) -> Option<RpcErrorCode> {
        match &self.outcome {
            Outcome::Error(e) => error_code_of(e),
            Outcome::Result(_) => None,
        }
    }

    /// The result value, if this is a success response
    pub fn result(&self) -> Option<&Value> {
        match &self.outcome {
            Outcome::Result(v) => Some(v),
            Outcome::Error(_) => None,
        }
    }
}

/// A server-initiated notification (no id)
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub jsonrpc: &'static str,
    pub method: String,
    pub params: Value,
}

impl Notification {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method: method.into(),
            params,
        }
    }
}
