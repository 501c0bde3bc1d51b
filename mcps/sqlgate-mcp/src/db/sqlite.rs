//! SQLite driver

use async_trait::async_trait;
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OpenFlags};
use serde_json::Value;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use super::{Connector, DbError, QueryResult, Session};
use crate::config::ConnectionProfile;

/// Opens SQLite database files
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteConnector;

#[async_trait]
impl Connector for SqliteConnector {
    async fn connect(&self, profile: &ConnectionProfile) -> Result<Arc<dyn Session>, DbError> {
        let path = profile.path.clone().ok_or(DbError::NotConfigured)?;
        let allow_writes = profile.allow_writes;
        let timeout = Duration::from_secs(profile.busy_timeout_secs);

        let conn = tokio::task::spawn_blocking(move || open(&path, allow_writes, timeout))
            .await
            .map_err(|e| DbError::Worker(e.to_string()))??;

        Ok(Arc::new(SqliteSession::new(conn)))
    }
}

fn open(path: &Path, allow_writes: bool, timeout: Duration) -> Result<Connection, DbError> {
    // Never create: a missing file is a connect failure
    if !path.exists() {
        return Err(DbError::MissingFile(path.to_path_buf()));
    }

    let mode = if allow_writes {
        OpenFlags::SQLITE_OPEN_READ_WRITE
    } else {
        OpenFlags::SQLITE_OPEN_READ_ONLY
    };
    let flags = mode | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX;

    let conn = Connection::open_with_flags(path, flags).map_err(|source| DbError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    conn.busy_timeout(timeout)?;

    tracing::debug!(
        "Opened {:?} ({})",
        path,
        if allow_writes { "read-write" } else { "read-only" }
    );
    Ok(conn)
}

/// A single SQLite connection
///
/// Statements run on the blocking pool one at a time; the mutex is the only
/// way in, so overlapping tool calls queue behind each other.
pub struct SqliteSession {
    conn: Arc<Mutex<Option<Connection>>>,
    closed: AtomicBool,
}

impl SqliteSession {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(Some(conn))),
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Session for SqliteSession {
    async fn query(&self, sql: &str, params: Vec<Value>) -> Result<QueryResult, DbError> {
        if self.is_closed() {
            return Err(DbError::Closed);
        }
        let conn = Arc::clone(&self.conn);
        let sql = sql.to_string();

        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
            let conn = guard.as_ref().ok_or(DbError::Closed)?;
            run_query(conn, &sql, &params)
        })
        .await
        .map_err(|e| DbError::Worker(e.to_string()))?
    }

    async fn close(&self) -> Result<(), DbError> {
        self.closed.store(true, Ordering::SeqCst);
        let conn = Arc::clone(&self.conn);

        tokio::task::spawn_blocking(move || {
            let taken = conn.lock().unwrap_or_else(PoisonError::into_inner).take();
            match taken {
                Some(c) => c.close().map_err(|(_, e)| DbError::Query(e)),
                None => Ok(()),
            }
        })
        .await
        .map_err(|e| DbError::Worker(e.to_string()))?
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

fn run_query(conn: &Connection, sql: &str, params: &[Value]) -> Result<QueryResult, DbError> {
    let bound = params
        .iter()
        .enumerate()
        .map(|(index, value)| to_sql_value(index, value))
        .collect::<Result<Vec<_>, _>>()?;

    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
    let width = columns.len();

    let rows = stmt
        .query_map(rusqlite::params_from_iter(bound), |row| {
            (0..width)
                .map(|i| row.get::<_, SqlValue>(i).map(from_sql_value))
                .collect::<Result<Vec<_>, _>>()
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(QueryResult::new(columns, rows))
}

fn to_sql_value(index: usize, value: &Value) -> Result<SqlValue, DbError> {
    Ok(match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => SqlValue::Integer(i),
            (None, Some(f)) => SqlValue::Real(f),
            (None, None) => {
                return Err(DbError::Parameter {
                    index,
                    reason: format!("number {} is out of range", n),
                })
            }
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        // Nested values are bound as their JSON text
        Value::Array(_) | Value::Object(_) => SqlValue::Text(value.to_string()),
    })
}

fn from_sql_value(value: SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(i) => serde_json::json!(i),
        SqlValue::Real(f) => serde_json::json!(f),
        SqlValue::Text(s) => Value::String(s),
        SqlValue::Blob(b) => Value::String(format!("<blob {} bytes>", b.len())),
    }
}
