//! Connection manager for the single downstream session
//!
//! Callers ask for a ready session with [`ConnectionManager::get_connection`].
//! When none is open, exactly one connect sequence runs on its own task and
//! every concurrent caller waits on the same outcome through a watch channel.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::AbortHandle;

use super::{Connector, Session};
use crate::config::ServerConfig;

/// Round-trip statement used by [`ConnectionManager::test_connection`]
pub const ROUND_TRIP_QUERY: &str = "SELECT 1 AS TEST_VALUE";

/// Errors surfaced to callers waiting for a session
///
/// `Clone` so that every waiter of one connect sequence gets the same value.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConnectionError {
    #[error("Database configuration incomplete: missing {0}")]
    Configuration(String),

    #[error("Database connection unavailable after {attempts} attempt(s): {message}")]
    Unavailable { attempts: u32, message: String },
}

/// How hard to try before giving up on a connect sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per sequence
    pub max_retries: u32,
    /// Wait between consecutive attempts
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Diagnostic snapshot of the manager
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub connected: bool,
    pub retry_count: u32,
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub last_attempt: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub profile: String,
}

/// Outcome of the round-trip check
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionTest {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

type Outcome = Result<Arc<dyn Session>, ConnectionError>;

/// The connect sequence currently in flight
struct Pending {
    rx: watch::Receiver<Option<Outcome>>,
    generation: u64,
    task: AbortHandle,
}

struct Inner {
    session: Option<Arc<dyn Session>>,
    pending: Option<Pending>,
    state: ConnectionState,
    retry_count: u32,
    last_attempt: Option<DateTime<Utc>>,
    last_error: Option<String>,
    /// Bumped by reset/disconnect; a sequence from an older generation
    /// must not touch the state
    generation: u64,
}

struct Shared {
    connector: Arc<dyn Connector>,
    config: Arc<ServerConfig>,
    policy: RetryPolicy,
    inner: Mutex<Inner>,
}

/// Handle to the downstream connection; clones share one session
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>, config: Arc<ServerConfig>) -> Self {
        Self::with_policy(connector, config, RetryPolicy::default())
    }

    pub fn with_policy(
        connector: Arc<dyn Connector>,
        config: Arc<ServerConfig>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                connector,
                config,
                policy,
                inner: Mutex::new(Inner {
                    session: None,
                    pending: None,
                    state: ConnectionState::Disconnected,
                    retry_count: 0,
                    last_attempt: None,
                    last_error: None,
                    generation: 0,
                }),
            }),
        }
    }

    // Never held across an await
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.shared.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the open session, joining or starting a connect sequence
    pub async fn get_connection(&self) -> Result<Arc<dyn Session>, ConnectionError> {
        let (mut rx, generation) = {
            let mut inner = self.lock();

            if let Some(session) = &inner.session {
                if !session.is_closed() {
                    return Ok(Arc::clone(session));
                }
                tracing::warn!("Database session was closed underneath us, reconnecting");
                inner.session = None;
                inner.state = ConnectionState::Disconnected;
            }

            let joined = inner
                .pending
                .as_ref()
                .map(|p| (p.rx.clone(), p.generation));
            match joined {
                Some(joined) => joined,
                None => {
                    let missing = self.shared.config.profile.missing_fields();
                    if !missing.is_empty() {
                        return Err(ConnectionError::Configuration(missing.join(", ")));
                    }

                    let (tx, rx) = watch::channel(None);
                    let generation = inner.generation;
                    inner.state = ConnectionState::Connecting;
                    inner.retry_count = 0;
                    inner.last_error = None;

                    // Detached so a dropped caller never cancels the sequence
                    let task = tokio::spawn(self.clone().connect(tx, generation));
                    inner.pending = Some(Pending {
                        rx: rx.clone(),
                        generation,
                        task: task.abort_handle(),
                    });
                    (rx, generation)
                }
            }
        };

        let outcome = rx.wait_for(Option::is_some).await.map(|v| (*v).clone());
        match outcome {
            Ok(Some(outcome)) => outcome,
            _ => {
                // The connect task ended without publishing: aborted by a
                // reset, or it panicked
                let mut inner = self.lock();
                let message = if inner.generation == generation {
                    inner.pending = None;
                    inner.state = ConnectionState::Disconnected;
                    "connection attempt was abandoned"
                } else {
                    "connection was reset while connecting"
                };
                Err(ConnectionError::Unavailable {
                    attempts: inner.retry_count,
                    message: message.to_string(),
                })
            }
        }
    }

    /// Retry loop run by the sole attempter
    async fn connect(self, tx: watch::Sender<Option<Outcome>>, generation: u64) {
        let policy = self.shared.policy;
        let profile = &self.shared.config.profile;
        let mut attempt = 0;

        let outcome: Outcome = loop {
            attempt += 1;
            {
                let mut inner = self.lock();
                if inner.generation != generation {
                    tracing::debug!("Dropping stale connect sequence");
                    return;
                }
                inner.last_attempt = Some(Utc::now());
            }
            tracing::info!(attempt, max = policy.max_retries, "Connecting to database");

            match self.shared.connector.connect(profile).await {
                Ok(session) => break Ok(session),
                Err(e) => {
                    {
                        let mut inner = self.lock();
                        if inner.generation != generation {
                            return;
                        }
                        inner.retry_count = attempt;
                        inner.last_error = Some(e.to_string());
                    }
                    if attempt >= policy.max_retries {
                        tracing::error!(
                            "Giving up on database connection after {} attempts: {}",
                            attempt,
                            e
                        );
                        break Err(ConnectionError::Unavailable {
                            attempts: attempt,
                            message: e.to_string(),
                        });
                    }
                    tracing::warn!(
                        "Connection attempt {} failed: {}. Retrying in {:?}",
                        attempt,
                        e,
                        policy.backoff
                    );
                    tokio::time::sleep(policy.backoff).await;
                }
            }
        };

        let current = {
            let mut inner = self.lock();
            let current = inner.generation == generation;
            if current {
                inner.pending = None;
                match &outcome {
                    Ok(session) => {
                        inner.session = Some(Arc::clone(session));
                        inner.state = ConnectionState::Connected;
                        inner.retry_count = 0;
                        inner.last_error = None;
                        tracing::info!("Database connection established");
                    }
                    Err(_) => inner.state = ConnectionState::Disconnected,
                }
            }
            current
        };

        let outcome = if current {
            outcome
        } else {
            // Reset while connecting: release waiters with an error and
            // discard the fresh session
            if let Ok(session) = outcome {
                close_quietly(session).await;
            }
            Err(ConnectionError::Unavailable {
                attempts: attempt,
                message: "connection was reset while connecting".to_string(),
            })
        };

        tx.send_replace(Some(outcome));
    }

    /// Obtain a session and run the round-trip check
    pub async fn test_connection(&self) -> ConnectionTest {
        let result = match self.get_connection().await {
            Ok(session) => session
                .query(ROUND_TRIP_QUERY, Vec::new())
                .await
                .map(|r| r.scalar().cloned().unwrap_or(Value::Null))
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        match result {
            Ok(value) => ConnectionTest {
                success: true,
                value: Some(value),
                error: None,
            },
            Err(error) => {
                tracing::warn!("Connection test failed: {}", error);
                ConnectionTest {
                    success: false,
                    value: None,
                    error: Some(error),
                }
            }
        }
    }

    /// Drop the current session and clear the retry count
    pub async fn reset_connection(&self) {
        tracing::info!("Resetting database connection");
        self.disconnect().await;
        self.lock().retry_count = 0;
    }

    /// Best-effort close; state is cleared whether or not close succeeds
    ///
    /// A connect sequence in flight is aborted and its waiters fail.
    pub async fn disconnect(&self) {
        let session = {
            let mut inner = self.lock();
            inner.generation += 1;
            if let Some(pending) = inner.pending.take() {
                pending.task.abort();
            }
            inner.state = ConnectionState::Disconnected;
            inner.session.take()
        };

        if let Some(session) = session {
            close_quietly(session).await;
            tracing::info!("Database connection closed");
        }
    }

    /// Snapshot for diagnostics; takes only a short synchronous lock
    pub fn get_status(&self) -> ConnectionStatus {
        let inner = self.lock();
        let policy = self.shared.policy;
        ConnectionStatus {
            state: inner.state,
            connected: inner.state == ConnectionState::Connected,
            retry_count: inner.retry_count,
            max_retries: policy.max_retries,
            backoff_ms: u64::try_from(policy.backoff.as_millis()).unwrap_or(u64::MAX),
            last_attempt: inner.last_attempt,
            last_error: inner.last_error.clone(),
            profile: self.shared.config.profile_name.clone(),
        }
    }
}

async fn close_quietly(session: Arc<dyn Session>) {
    if let Err(e) = session.close().await {
        tracing::warn!("Error closing database session: {}", e);
    }
}
