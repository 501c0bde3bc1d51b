//! Protocol dispatcher
//!
//! Every transport hands decoded envelopes to [`Dispatcher`]. Each request is
//! validated, routed by method name and answered with exactly one response
//! envelope, unless it is a notification.

use mcp_common::jsonrpc::{Request, Response};
use mcp_common::{
    internal_error, invalid_params, method_not_found, parse_error, structured_success,
    tool_not_found, JsonObject, McpError, ResultExt,
};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::tools::{RegistryError, ToolContext, ToolRegistry};

/// Name announced in `initialize`
pub const SERVER_NAME: &str = "sqlgate-mcp";

/// Protocol revisions this server speaks, oldest first
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2024-11-05", "2025-03-26", "2025-06-18"];

pub const LATEST_PROTOCOL_VERSION: &str = "2025-06-18";

/// Routes request envelopes to the tool registry
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    ctx: ToolContext,
}

impl Dispatcher {
    pub fn new(registry: ToolRegistry, ctx: ToolContext) -> Self {
        Self {
            registry: Arc::new(registry),
            ctx,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn context(&self) -> &ToolContext {
        &self.ctx
    }

    /// Decode raw JSON text and dispatch it
    ///
    /// Undecodable input is answered with ParseError and a null id.
    pub async fn handle_text(&self, text: &str) -> Option<Response> {
        match serde_json::from_str::<Value>(text) {
            Ok(value) => self.handle_value(value).await,
            Err(e) => {
                tracing::debug!("Rejecting undecodable message: {}", e);
                Some(Response::failure(Value::Null, parse_error(e.to_string())))
            }
        }
    }

    /// Validate a decoded value as an envelope and dispatch it
    pub async fn handle_value(&self, value: Value) -> Option<Response> {
        match Request::from_value(value) {
            Ok(request) => self.dispatch(request).await,
            Err((id, error)) => {
                tracing::debug!("Rejecting invalid envelope: {}", error.message);
                Some(Response::failure(id, error))
            }
        }
    }

    /// Route a validated request; `None` when no reply is owed
    pub async fn dispatch(&self, request: Request) -> Option<Response> {
        tracing::debug!(method = %request.method, id = ?request.id, "Dispatching request");
        let outcome = self.route(&request).await;

        if request.is_notification() || request.method == "notifications/initialized" {
            if let Err(e) = outcome {
                tracing::debug!("Notification {} failed: {}", request.method, e.message);
            }
            return None;
        }

        let id = request.id.unwrap_or(Value::Null);
        Some(match outcome {
            Ok(result) => Response::success(id, result),
            Err(error) => Response::failure(id, error),
        })
    }

    async fn route(&self, request: &Request) -> Result<Value, McpError> {
        match request.method.as_str() {
            "initialize" => Ok(self.initialize(&request.params)),
            "tools/list" => Ok(self.list_tools()),
            "tools/call" => self.call_tool(request.params_object()).await,
            "notifications/initialized" => {
                tracing::info!("Client initialized");
                Ok(Value::Null)
            }
            "prompts/list" => Ok(prompts()),
            other => Err(method_not_found(other)),
        }
    }

    fn initialize(&self, params: &Value) -> Value {
        let version = params
            .get("protocolVersion")
            .and_then(Value::as_str)
            .filter(|v| SUPPORTED_PROTOCOL_VERSIONS.contains(v))
            .unwrap_or(LATEST_PROTOCOL_VERSION);
        let mode = if self.ctx.config.profile.allow_writes {
            "read-write"
        } else {
            "read-only"
        };

        json!({
            "protocolVersion": version,
            "capabilities": {
                "tools": {"listChanged": false},
                "prompts": {"listChanged": false},
            },
            "serverInfo": {
                "name": SERVER_NAME,
                "version": env!("CARGO_PKG_VERSION"),
            },
            "instructions": format!(
                "SQL database MCP server. Currently in {} mode. \
                Use db_list_tables and db_describe_table to explore the schema, \
                db_execute_query to run queries and db_explain_query to analyze query plans.",
                mode
            ),
        })
    }

    fn list_tools(&self) -> Value {
        let tools: Vec<_> = self
            .registry
            .list_tools()
            .iter()
            .map(|t| t.to_tool())
            .collect();
        json!({ "tools": tools })
    }

    async fn call_tool(&self, params: JsonObject) -> Result<Value, McpError> {
        let name = match params.get("name") {
            Some(Value::String(name)) => name.clone(),
            _ => return Err(invalid_params("Tool name is required and must be a string")),
        };
        if !self.registry.has_tool(&name) {
            return Err(tool_not_found(&name));
        }

        let supplied = match params.get("arguments") {
            None | Some(Value::Null) => JsonObject::new(),
            Some(Value::Object(args)) => args.clone(),
            Some(_) => return Err(invalid_params("Tool arguments must be an object")),
        };

        let args = self
            .registry
            .filter_arguments(&name, &supplied)
            .map_err(registry_error)?;
        self.registry.validate(&name, &args).map_err(registry_error)?;

        tracing::debug!("Calling tool {}", name);
        let value = self
            .registry
            .execute(&name, &self.ctx, args)
            .await
            .map_err(registry_error)?;

        serde_json::to_value(structured_success(&value)?).to_mcp_err()
    }
}

fn registry_error(error: RegistryError) -> McpError {
    match error {
        RegistryError::UnknownTool(name) => tool_not_found(&name),
        RegistryError::MissingParameters(_) => invalid_params(error.to_string()),
        RegistryError::Execution(message) => internal_error(message),
    }
}

/// Static prompt templates
fn prompts() -> Value {
    json!({
        "prompts": [
            {
                "name": "query_builder",
                "description": "Build a SQL query for a described goal, checking table structure first",
                "arguments": [
                    {"name": "goal", "description": "What the query should return", "required": true},
                    {"name": "schema_name", "description": "Schema to work in", "required": false}
                ]
            },
            {
                "name": "schema_explorer",
                "description": "Walk through the tables, columns and indexes of a schema",
                "arguments": [
                    {"name": "schema_name", "description": "Schema to explore", "required": false}
                ]
            },
            {
                "name": "connection_test",
                "description": "Check configuration and verify the database connection",
                "arguments": []
            }
        ]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::tools::tests::context_with;
    use crate::tools::{ToolDescriptor, ToolError, ToolHandler};
    use async_trait::async_trait;
    use mcp_common::RpcErrorCode;
    use serde_json::json;

    struct Greet;

    #[async_trait]
    impl ToolHandler for Greet {
        async fn call(&self, _ctx: &ToolContext, args: JsonObject) -> Result<Value, ToolError> {
            match args.get("name").and_then(Value::as_str) {
                Some("boom") => Err(ToolError::Rejected("cannot greet boom".into())),
                Some(name) => Ok(json!({"greeting": format!("hello {}", name), "seen": args.len()})),
                None => Ok(Value::Null),
            }
        }
    }

    fn dispatcher() -> Dispatcher {
        let schema = match json!({
            "type": "object",
            "properties": {"name": {"type": "string"}, "polite": {"type": "boolean"}},
            "required": ["name"]
        }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        let registry = ToolRegistry::new().with(ToolDescriptor::new(
            "greet",
            "Say hello",
            schema,
            Arc::new(Greet),
        ));
        Dispatcher::new(registry, context_with(ServerConfig::default()))
    }

    async fn call(d: &Dispatcher, value: Value) -> Response {
        d.handle_value(value).await.expect("expected a response")
    }

    #[tokio::test]
    async fn test_parse_error_has_null_id() {
        let response = dispatcher().handle_text("{not json").await.unwrap();
        assert_eq!(response.id, Value::Null);
        assert_eq!(response.error_code(), Some(RpcErrorCode::ParseError));
    }

    #[tokio::test]
    async fn test_malformed_envelopes() {
        let d = dispatcher();
        for bad in [
            json!("just a string"),
            json!({"jsonrpc": "1.0", "id": 1, "method": "tools/list"}),
            json!({"jsonrpc": "2.0", "id": 1}),
            json!({"jsonrpc": "2.0", "id": 1, "method": 7}),
        ] {
            let response = call(&d, bad).await;
            assert_eq!(response.error_code(), Some(RpcErrorCode::InvalidRequest));
        }
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let response = call(&dispatcher(), json!({"jsonrpc": "2.0", "id": 3, "method": "resources/list"})).await;
        assert_eq!(response.error_code(), Some(RpcErrorCode::MethodNotFound));
        assert_eq!(response.id, json!(3));
    }

    #[tokio::test]
    async fn test_notifications_are_never_answered() {
        let d = dispatcher();
        assert!(d
            .handle_value(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
            .await
            .is_none());
        assert!(d
            .handle_value(json!({"jsonrpc": "2.0", "id": 9, "method": "notifications/initialized"}))
            .await
            .is_none());
        // Unknown methods sent as notifications stay silent too
        assert!(d
            .handle_value(json!({"jsonrpc": "2.0", "method": "nope"}))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_initialize_negotiates_version() {
        let d = dispatcher();
        let response = call(
            &d,
            json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {"protocolVersion": "2024-11-05"}}),
        )
        .await;
        let result = response.result().unwrap();
        assert_eq!(result["protocolVersion"], "2024-11-05");
        assert_eq!(result["serverInfo"]["name"], SERVER_NAME);
        assert_eq!(result["capabilities"]["tools"]["listChanged"], false);

        let response = call(
            &d,
            json!({"jsonrpc": "2.0", "id": 2, "method": "initialize", "params": {"protocolVersion": "1999-01-01"}}),
        )
        .await;
        assert_eq!(response.result().unwrap()["protocolVersion"], LATEST_PROTOCOL_VERSION);
    }

    #[tokio::test]
    async fn test_list_tools_and_prompts() {
        let d = dispatcher();
        let tools = call(&d, json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"})).await;
        let tools = tools.result().unwrap()["tools"].as_array().unwrap().clone();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["name"], "greet");
        assert_eq!(tools[0]["inputSchema"]["required"], json!(["name"]));

        let prompts = call(&d, json!({"jsonrpc": "2.0", "id": 2, "method": "prompts/list"})).await;
        assert_eq!(prompts.result().unwrap()["prompts"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_call_unknown_tool() {
        let response = call(
            &dispatcher(),
            json!({"jsonrpc": "2.0", "id": 2, "method": "tools/call", "params": {"name": "nope", "arguments": {"name": "x"}}}),
        )
        .await;
        assert_eq!(response.error_code(), Some(RpcErrorCode::ToolNotFound));
    }

    #[tokio::test]
    async fn test_call_without_name() {
        let response = call(
            &dispatcher(),
            json!({"jsonrpc": "2.0", "id": 2, "method": "tools/call", "params": {"arguments": {}}}),
        )
        .await;
        assert_eq!(response.error_code(), Some(RpcErrorCode::InvalidParams));
    }

    #[tokio::test]
    async fn test_call_filters_then_validates() {
        let d = dispatcher();
        let response = call(
            &d,
            json!({"jsonrpc": "2.0", "id": 4, "method": "tools/call",
                   "params": {"name": "greet", "arguments": {"name": "ada", "extra": 1, "polite": true}}}),
        )
        .await;
        let result = response.result().unwrap();
        assert_eq!(result["structuredContent"], json!({"greeting": "hello ada", "seen": 2}));
        let text: Value = serde_json::from_str(result["content"][0]["text"].as_str().unwrap()).unwrap();
        assert_eq!(text, result["structuredContent"]);

        // A required key supplied only under an undeclared name is still missing
        let response = call(
            &d,
            json!({"jsonrpc": "2.0", "id": 5, "method": "tools/call",
                   "params": {"name": "greet", "arguments": {"Name": "ada"}}}),
        )
        .await;
        assert_eq!(response.error_code(), Some(RpcErrorCode::InvalidParams));
        let wire = serde_json::to_value(&response).unwrap();
        assert_eq!(wire["error"]["message"], "Missing required parameters: name");
    }

    #[tokio::test]
    async fn test_handler_failure_is_internal_error_with_message() {
        let response = call(
            &dispatcher(),
            json!({"jsonrpc": "2.0", "id": "x", "method": "tools/call",
                   "params": {"name": "greet", "arguments": {"name": "boom"}}}),
        )
        .await;
        assert_eq!(response.id, json!("x"));
        assert_eq!(response.error_code(), Some(RpcErrorCode::InternalError));
        let wire = serde_json::to_value(&response).unwrap();
        assert_eq!(wire["error"]["message"], "cannot greet boom");
    }

    #[tokio::test]
    async fn test_builtin_tool_without_database_reports_configuration() {
        let d = Dispatcher::new(ToolRegistry::builtin(), context_with(ServerConfig::default()));
        let response = call(
            &d,
            json!({"jsonrpc": "2.0", "id": 1, "method": "tools/call", "params": {"name": "db_list_schemas"}}),
        )
        .await;
        assert_eq!(response.error_code(), Some(RpcErrorCode::InternalError));
        let wire = serde_json::to_value(&response).unwrap();
        assert!(wire["error"]["message"].as_str().unwrap().contains("DB_PATH"));
    }
}
