//! Tool parameter types
//!
//! Input schemas are generated from these structs; arguments are decoded
//! into them after the registry has filtered and presence-checked them.

use mcp_common::JsonObject;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use super::ToolError;

/// Tools that take no arguments
#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct NoParams {}

/// Parameters for db_list_tables
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListTablesParams {
    /// Schema to list tables from. Defaults to the profile's schema.
    pub schema_name: Option<String>,
    /// Optional pattern to filter table names (SQL LIKE pattern, e.g., 'user%')
    pub pattern: Option<String>,
}

/// Parameters for db_describe_table
#[derive(Debug, Deserialize, JsonSchema)]
pub struct DescribeTableParams {
    /// Name of the table to describe
    pub table_name: String,
    /// Schema containing the table. Defaults to the profile's schema.
    pub schema_name: Option<String>,
}

/// Parameters for db_list_indexes
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListIndexesParams {
    /// Name of the table whose indexes to list
    pub table_name: String,
    /// Schema containing the table. Defaults to the profile's schema.
    pub schema_name: Option<String>,
}

/// Parameters for db_describe_index
#[derive(Debug, Deserialize, JsonSchema)]
pub struct DescribeIndexParams {
    /// Name of the index to describe
    pub index_name: String,
    /// Schema containing the index. Defaults to the profile's schema.
    pub schema_name: Option<String>,
}

/// Parameters for db_execute_query
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ExecuteQueryParams {
    /// SQL statement to execute. In read-only mode only SELECT, WITH, EXPLAIN and PRAGMA are allowed.
    pub query: String,
    /// Positional parameters bound to `?` placeholders
    pub parameters: Option<Vec<Value>>,
}

/// Parameters for db_explain_query
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ExplainQueryParams {
    /// SQL query to explain
    pub query: String,
}

/// JSON schema object for a parameter type
pub fn input_schema<T: JsonSchema>() -> JsonObject {
    let mut schema = match serde_json::to_value(schemars::schema_for!(T)) {
        Ok(Value::Object(map)) => map,
        _ => JsonObject::new(),
    };
    schema.remove("$schema");
    schema.remove("title");
    schema
        .entry("type")
        .or_insert_with(|| Value::String("object".to_string()));
    schema
        .entry("properties")
        .or_insert_with(|| Value::Object(JsonObject::new()));
    schema
}

/// Decode filtered arguments into a parameter struct
pub fn parse<T: DeserializeOwned>(args: JsonObject) -> Result<T, ToolError> {
    serde_json::from_value(Value::Object(args)).map_err(|e| ToolError::InvalidArguments(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_schema_declares_required_fields() {
        let schema = input_schema::<DescribeTableParams>();
        assert_eq!(schema["type"], json!("object"));
        assert_eq!(schema["required"], json!(["table_name"]));
        assert!(schema["properties"].get("schema_name").is_some());
        assert!(schema.get("$schema").is_none());
    }

    #[test]
    fn test_empty_params_still_declare_properties() {
        let schema = input_schema::<NoParams>();
        assert_eq!(schema["properties"], json!({}));
    }

    #[test]
    fn test_parse_reports_type_errors() {
        let args = match json!({"query": "SELECT 1", "parameters": "oops"}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        let err = parse::<ExecuteQueryParams>(args).unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
