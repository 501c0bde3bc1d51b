//! Downstream database access
//!
//! The server talks to exactly one database session at a time. Drivers plug
//! in through [`Connector`] and [`Session`]; [`ConnectionManager`] owns the
//! session and hides transient connect failures behind bounded retries.

mod manager;
mod sqlite;

pub use manager::{
    ConnectionError, ConnectionManager, ConnectionState, ConnectionStatus, ConnectionTest,
    RetryPolicy, ROUND_TRIP_QUERY,
};
pub use sqlite::{SqliteConnector, SqliteSession};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::config::ConnectionProfile;

/// Errors raised by a database driver
#[derive(Debug, Error)]
pub enum DbError {
    #[error("database path is not configured")]
    NotConfigured,

    #[error("database file {0:?} does not exist")]
    MissingFile(PathBuf),

    #[error("failed to open database at {path:?}: {source}")]
    Open {
        path: PathBuf,
        source: rusqlite::Error,
    },

    #[error("Query failed: {0}")]
    Query(#[from] rusqlite::Error),

    #[error("unsupported parameter at position {index}: {reason}")]
    Parameter { index: usize, reason: String },

    #[error("session is closed")]
    Closed,

    #[error("database worker failed: {0}")]
    Worker(String),
}

/// Rows returned by a statement
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResult {
    /// Column names
    pub columns: Vec<String>,
    /// Rows as arrays of values
    pub rows: Vec<Vec<Value>>,
    /// Number of rows returned
    pub row_count: usize,
}

impl QueryResult {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            row_count: rows.len(),
            columns,
            rows,
        }
    }

    /// Rows as column-keyed objects
    pub fn records(&self) -> Vec<Map<String, Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect()
            })
            .collect()
    }

    /// First value of the first row
    pub fn scalar(&self) -> Option<&Value> {
        self.rows.first().and_then(|row| row.first())
    }
}

/// An open database session
#[async_trait]
pub trait Session: Send + Sync {
    /// Execute a statement with positional parameters
    async fn query(&self, sql: &str, params: Vec<Value>) -> Result<QueryResult, DbError>;

    /// Release the session; later queries fail with [`DbError::Closed`]
    async fn close(&self) -> Result<(), DbError>;

    fn is_closed(&self) -> bool;
}

/// Opens sessions from a connection profile
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, profile: &ConnectionProfile) -> Result<Arc<dyn Session>, DbError>;
}
