//! Tool registry
//!
//! A fixed table from tool name to input schema and handler, built once at
//! startup. The registry narrows caller arguments to the declared schema,
//! checks required fields, and runs handlers on their own task.

pub mod handlers;
pub mod params;
pub mod validators;

use async_trait::async_trait;
use mcp_common::{JsonObject, Tool};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::config::ServerConfig;
use crate::db::{ConnectionError, ConnectionManager, DbError};

pub use handlers::BuiltinTool;

/// Everything a handler may touch
#[derive(Clone)]
pub struct ToolContext {
    pub connections: ConnectionManager,
    pub config: Arc<ServerConfig>,
}

/// Errors raised inside tool handlers
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("{0}")]
    Rejected(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Database(#[from] DbError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A tool implementation
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, ctx: &ToolContext, args: JsonObject) -> Result<Value, ToolError>;
}

/// Registry-level failures, mapped onto wire error codes by the dispatcher
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistryError {
    #[error("Tool not found: {0}")]
    UnknownTool(String),

    #[error("Missing required parameters: {}", .0.join(", "))]
    MissingParameters(Vec<String>),

    #[error("{0}")]
    Execution(String),
}

/// Name, schema and handler of one tool
#[derive(Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Arc<JsonObject>,
    handler: Arc<dyn ToolHandler>,
}

impl ToolDescriptor {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: JsonObject,
        handler: Arc<dyn ToolHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: Arc::new(input_schema),
            handler,
        }
    }

    /// Declared property names
    pub fn properties(&self) -> Vec<&str> {
        self.input_schema
            .get("properties")
            .and_then(Value::as_object)
            .map(|props| props.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Required subset of the declared properties
    pub fn required(&self) -> Vec<&str> {
        self.input_schema
            .get("required")
            .and_then(Value::as_array)
            .map(|req| req.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    /// Wire representation for `tools/list`
    pub fn to_tool(&self) -> Tool {
        Tool::new(
            self.name.clone(),
            self.description.clone(),
            Arc::clone(&self.input_schema),
        )
    }
}

/// Tool lookup table; order of registration is the listing order
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<ToolDescriptor>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in database tool
    pub fn builtin() -> Self {
        BuiltinTool::ALL
            .iter()
            .fold(Self::new(), |registry, tool| registry.with(tool.descriptor()))
    }

    /// Add a tool, replacing any earlier tool of the same name
    pub fn with(mut self, descriptor: ToolDescriptor) -> Self {
        match self.index.get(&descriptor.name) {
            Some(&i) => self.tools[i] = descriptor,
            None => {
                self.index.insert(descriptor.name.clone(), self.tools.len());
                self.tools.push(descriptor);
            }
        }
        self
    }

    pub fn list_tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.index.get(name).map(|&i| &self.tools[i])
    }

    /// Keep only the keys the tool's schema declares
    pub fn filter_arguments(&self, name: &str, args: &JsonObject) -> Result<JsonObject, RegistryError> {
        let tool = self
            .get(name)
            .ok_or_else(|| RegistryError::UnknownTool(name.to_string()))?;
        let declared = tool.properties();

        Ok(args
            .iter()
            .filter(|(key, _)| declared.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    /// Check that every required field is present and non-empty
    ///
    /// Presence only: types are left to the handler.
    pub fn validate(&self, name: &str, args: &JsonObject) -> Result<(), RegistryError> {
        let tool = self
            .get(name)
            .ok_or_else(|| RegistryError::UnknownTool(name.to_string()))?;

        let missing: Vec<String> = tool
            .required()
            .into_iter()
            .filter(|field| match args.get(*field) {
                None | Some(Value::Null) => true,
                Some(Value::String(s)) => s.is_empty(),
                Some(_) => false,
            })
            .map(str::to_string)
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(RegistryError::MissingParameters(missing))
        }
    }

    /// Run a tool's handler on its own task
    ///
    /// The call runs to completion even if the returned future is dropped.
    pub async fn execute(
        &self,
        name: &str,
        ctx: &ToolContext,
        args: JsonObject,
    ) -> Result<Value, RegistryError> {
        let tool = self
            .get(name)
            .ok_or_else(|| RegistryError::UnknownTool(name.to_string()))?;

        let handler = Arc::clone(&tool.handler);
        let ctx = ctx.clone();
        let task = tokio::spawn(async move { handler.call(&ctx, args).await });

        match task.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                tracing::warn!("Tool {} failed: {}", name, e);
                Err(RegistryError::Execution(e.to_string()))
            }
            Err(e) => {
                tracing::error!("Tool {} panicked: {}", name, e);
                Err(RegistryError::Execution(format!("Tool {} panicked", name)))
            }
        }
    }
}
