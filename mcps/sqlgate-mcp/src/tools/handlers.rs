//! Built-in database tools

use async_trait::async_trait;
use mcp_common::JsonObject;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::params::{
    input_schema, parse, DescribeIndexParams, DescribeTableParams, ExecuteQueryParams,
    ExplainQueryParams, ListIndexesParams, ListTablesParams, NoParams,
};
use super::validators::{
    is_read_only_query, validate_identifier, validate_parameters, validate_query,
};
use super::{ToolContext, ToolDescriptor, ToolError, ToolHandler};
use crate::config::environment_snapshot;
use crate::db::QueryResult;

// ============================================================================
// Response Types
// ============================================================================

/// Column schema info
#[derive(Debug, Serialize)]
pub struct ColumnInfo {
    pub cid: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    pub notnull: bool,
    pub default_value: Option<String>,
    pub pk: bool,
}

/// Table description
#[derive(Debug, Serialize)]
pub struct TableDescription {
    pub schema: String,
    pub table: String,
    pub columns: Vec<ColumnInfo>,
    pub sql: Option<String>,
}

/// One column of an index
#[derive(Debug, Serialize)]
pub struct IndexColumn {
    pub seqno: i64,
    pub cid: i64,
    pub name: Option<String>,
}

/// Index description
#[derive(Debug, Serialize)]
pub struct IndexDescription {
    pub schema: String,
    pub index: String,
    pub table: Option<String>,
    pub columns: Vec<IndexColumn>,
    pub sql: Option<String>,
}

/// Explain query plan result
#[derive(Debug, Serialize)]
pub struct ExplainResult {
    pub query: String,
    pub plan: Vec<ExplainStep>,
}

/// Single step in query execution plan
#[derive(Debug, Serialize)]
pub struct ExplainStep {
    pub id: i64,
    pub parent: i64,
    pub detail: String,
}

// ============================================================================
// Tool Catalogue
// ============================================================================

/// The database tools every server exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinTool {
    ShowConfig,
    TestConnection,
    ShowEnvVars,
    ListSchemas,
    ListTables,
    DescribeTable,
    ListIndexes,
    DescribeIndex,
    ExecuteQuery,
    ExplainQuery,
}

impl BuiltinTool {
    pub const ALL: [BuiltinTool; 10] = [
        BuiltinTool::ShowConfig,
        BuiltinTool::TestConnection,
        BuiltinTool::ShowEnvVars,
        BuiltinTool::ListSchemas,
        BuiltinTool::ListTables,
        BuiltinTool::DescribeTable,
        BuiltinTool::ListIndexes,
        BuiltinTool::DescribeIndex,
        BuiltinTool::ExecuteQuery,
        BuiltinTool::ExplainQuery,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BuiltinTool::ShowConfig => "db_show_config",
            BuiltinTool::TestConnection => "db_test_connection",
            BuiltinTool::ShowEnvVars => "db_show_env_vars",
            BuiltinTool::ListSchemas => "db_list_schemas",
            BuiltinTool::ListTables => "db_list_tables",
            BuiltinTool::DescribeTable => "db_describe_table",
            BuiltinTool::ListIndexes => "db_list_indexes",
            BuiltinTool::DescribeIndex => "db_describe_index",
            BuiltinTool::ExecuteQuery => "db_execute_query",
            BuiltinTool::ExplainQuery => "db_explain_query",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            BuiltinTool::ShowConfig => "Show the active database configuration and connection status. Nothing secret is included.",
            BuiltinTool::TestConnection => "Open (or reuse) the database connection and run a trivial round-trip query.",
            BuiltinTool::ShowEnvVars => "Show the environment variables that configure this server.",
            BuiltinTool::ListSchemas => "List the schemas (attached databases) visible on the connection.",
            BuiltinTool::ListTables => "List tables and views in a schema. Optionally filter by name pattern using SQL LIKE syntax (e.g., 'user%').",
            BuiltinTool::DescribeTable => "Get the column definitions of a table along with its CREATE statement.",
            BuiltinTool::ListIndexes => "List the indexes defined on a table.",
            BuiltinTool::DescribeIndex => "Get the columns, owning table and CREATE statement of an index.",
            BuiltinTool::ExecuteQuery => "Execute a SQL query with optional positional parameters. Returns column names and rows as JSON. In read-only mode (default), only SELECT, WITH, EXPLAIN, and PRAGMA statements are allowed.",
            BuiltinTool::ExplainQuery => "Get the execution plan for a SQL query. Useful for understanding query performance and optimization.",
        }
    }

    fn schema(self) -> JsonObject {
        match self {
            BuiltinTool::ShowConfig
            | BuiltinTool::TestConnection
            | BuiltinTool::ShowEnvVars
            | BuiltinTool::ListSchemas => input_schema::<NoParams>(),
            BuiltinTool::ListTables => input_schema::<ListTablesParams>(),
            BuiltinTool::DescribeTable => input_schema::<DescribeTableParams>(),
            BuiltinTool::ListIndexes => input_schema::<ListIndexesParams>(),
            BuiltinTool::DescribeIndex => input_schema::<DescribeIndexParams>(),
            BuiltinTool::ExecuteQuery => input_schema::<ExecuteQueryParams>(),
            BuiltinTool::ExplainQuery => input_schema::<ExplainQueryParams>(),
        }
    }

    pub fn descriptor(self) -> ToolDescriptor {
        ToolDescriptor::new(self.name(), self.description(), self.schema(), Arc::new(self))
    }
}

#[async_trait]
impl ToolHandler for BuiltinTool {
    async fn call(&self, ctx: &ToolContext, args: JsonObject) -> Result<Value, ToolError> {
        match self {
            BuiltinTool::ShowConfig => show_config(ctx),
            BuiltinTool::TestConnection => test_connection(ctx).await,
            BuiltinTool::ShowEnvVars => Ok(serde_json::to_value(environment_snapshot())?),
            BuiltinTool::ListSchemas => list_schemas(ctx).await,
            BuiltinTool::ListTables => list_tables(ctx, parse(args)?).await,
            BuiltinTool::DescribeTable => describe_table(ctx, parse(args)?).await,
            BuiltinTool::ListIndexes => list_indexes(ctx, parse(args)?).await,
            BuiltinTool::DescribeIndex => describe_index(ctx, parse(args)?).await,
            BuiltinTool::ExecuteQuery => execute_query(ctx, parse(args)?).await,
            BuiltinTool::ExplainQuery => explain_query(ctx, parse(args)?).await,
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

fn show_config(ctx: &ToolContext) -> Result<Value, ToolError> {
    Ok(json!({
        "config": ctx.config.display(),
        "connection": ctx.connections.get_status(),
    }))
}

async fn test_connection(ctx: &ToolContext) -> Result<Value, ToolError> {
    let test = ctx.connections.test_connection().await;
    let mut value = serde_json::to_value(test)?;
    value["status"] = serde_json::to_value(ctx.connections.get_status())?;
    Ok(value)
}

async fn list_schemas(ctx: &ToolContext) -> Result<Value, ToolError> {
    let result = query(ctx, "SELECT seq, name, file FROM pragma_database_list ORDER BY seq", vec![]).await?;
    Ok(json!({
        "schemas": result.records(),
        "count": result.row_count,
    }))
}

async fn list_tables(ctx: &ToolContext, params: ListTablesParams) -> Result<Value, ToolError> {
    let schema = resolve_schema(ctx, params.schema_name)?;
    let pattern = params.pattern.unwrap_or_else(|| "%".to_string());

    let result = query(
        ctx,
        r"SELECT name, type, ncol FROM pragma_table_list
          WHERE schema = ?1 AND type IN ('table', 'view')
            AND name NOT LIKE 'sqlite\_%' ESCAPE '\'
            AND name LIKE ?2
          ORDER BY name",
        vec![json!(schema), json!(pattern)],
    )
    .await?;

    Ok(json!({
        "schema": schema,
        "tables": result.records(),
        "count": result.row_count,
    }))
}

async fn describe_table(ctx: &ToolContext, params: DescribeTableParams) -> Result<Value, ToolError> {
    validate_identifier("table_name", &params.table_name)?;
    let schema = resolve_schema(ctx, params.schema_name)?;

    let result = query(
        ctx,
        r#"SELECT cid, name, type, "notnull", dflt_value, pk FROM pragma_table_info(?1, ?2) ORDER BY cid"#,
        vec![json!(params.table_name), json!(schema)],
    )
    .await?;

    let columns: Vec<ColumnInfo> = result
        .rows
        .iter()
        .map(|row| ColumnInfo {
            cid: int(&row[0]),
            name: text(&row[1]).unwrap_or_default(),
            data_type: text(&row[2]).unwrap_or_default(),
            notnull: int(&row[3]) != 0,
            default_value: text(&row[4]),
            pk: int(&row[5]) != 0,
        })
        .collect();

    if columns.is_empty() {
        return Err(ToolError::NotFound(format!(
            "Table '{}.{}' not found",
            schema, params.table_name
        )));
    }

    // Identifier already validated, safe to splice
    let sql = query(
        ctx,
        &format!(
            "SELECT sql FROM \"{}\".sqlite_master WHERE type IN ('table', 'view') AND name = ?1",
            schema
        ),
        vec![json!(params.table_name)],
    )
    .await?
    .scalar()
    .and_then(text);

    Ok(serde_json::to_value(TableDescription {
        schema,
        table: params.table_name,
        columns,
        sql,
    })?)
}

async fn list_indexes(ctx: &ToolContext, params: ListIndexesParams) -> Result<Value, ToolError> {
    validate_identifier("table_name", &params.table_name)?;
    let schema = resolve_schema(ctx, params.schema_name)?;

    let result = query(
        ctx,
        r#"SELECT name, "unique", origin, partial FROM pragma_index_list(?1, ?2) ORDER BY name"#,
        vec![json!(params.table_name), json!(schema)],
    )
    .await?;

    let indexes: Vec<Value> = result
        .rows
        .iter()
        .map(|row| {
            json!({
                "name": row[0],
                "unique": int(&row[1]) != 0,
                "origin": row[2],
                "partial": int(&row[3]) != 0,
            })
        })
        .collect();

    Ok(json!({
        "schema": schema,
        "table": params.table_name,
        "count": indexes.len(),
        "indexes": indexes,
    }))
}

async fn describe_index(ctx: &ToolContext, params: DescribeIndexParams) -> Result<Value, ToolError> {
    validate_identifier("index_name", &params.index_name)?;
    let schema = resolve_schema(ctx, params.schema_name)?;

    let result = query(
        ctx,
        "SELECT seqno, cid, name FROM pragma_index_info(?1, ?2) ORDER BY seqno",
        vec![json!(params.index_name), json!(schema)],
    )
    .await?;

    let columns: Vec<IndexColumn> = result
        .rows
        .iter()
        .map(|row| IndexColumn {
            seqno: int(&row[0]),
            cid: int(&row[1]),
            name: text(&row[2]),
        })
        .collect();

    if columns.is_empty() {
        return Err(ToolError::NotFound(format!(
            "Index '{}.{}' not found",
            schema, params.index_name
        )));
    }

    let owner = query(
        ctx,
        &format!(
            "SELECT tbl_name, sql FROM \"{}\".sqlite_master WHERE type = 'index' AND name = ?1",
            schema
        ),
        vec![json!(params.index_name)],
    )
    .await?;
    let (table, sql) = owner
        .rows
        .first()
        .map(|row| (text(&row[0]), text(&row[1])))
        .unwrap_or_default();

    Ok(serde_json::to_value(IndexDescription {
        schema,
        index: params.index_name,
        table,
        columns,
        sql,
    })?)
}

async fn execute_query(ctx: &ToolContext, params: ExecuteQueryParams) -> Result<Value, ToolError> {
    validate_query(&params.query)?;

    if !ctx.config.profile.allow_writes && !is_read_only_query(&params.query) {
        return Err(ToolError::Rejected(
            "Write operations are disabled. Set allow_writes=true in the profile to enable.".to_string(),
        ));
    }

    let parameters = params.parameters.unwrap_or_default();
    validate_parameters(&parameters)?;

    tracing::debug!("Executing query with {} parameter(s)", parameters.len());
    let result = query(ctx, &params.query, parameters).await?;
    Ok(serde_json::to_value(result)?)
}

async fn explain_query(ctx: &ToolContext, params: ExplainQueryParams) -> Result<Value, ToolError> {
    validate_query(&params.query)?;

    let result = query(ctx, &format!("EXPLAIN QUERY PLAN {}", params.query), vec![]).await?;
    let plan = result
        .rows
        .iter()
        .map(|row| ExplainStep {
            id: int(&row[0]),
            parent: int(&row[1]),
            detail: text(&row[3]).unwrap_or_default(),
        })
        .collect();

    Ok(serde_json::to_value(ExplainResult {
        query: params.query,
        plan,
    })?)
}

// ============================================================================
// Helpers
// ============================================================================

async fn query(ctx: &ToolContext, sql: &str, params: Vec<Value>) -> Result<QueryResult, ToolError> {
    let session = ctx.connections.get_connection().await?;
    Ok(session.query(sql, params).await?)
}

fn resolve_schema(ctx: &ToolContext, requested: Option<String>) -> Result<String, ToolError> {
    let schema = requested.unwrap_or_else(|| ctx.config.profile.schema().to_string());
    validate_identifier("schema_name", &schema)?;
    Ok(schema)
}

fn int(value: &Value) -> i64 {
    value.as_i64().unwrap_or_default()
}

fn text(value: &Value) -> Option<String> {
    value.as_str().map(str::to_string)
}
