//! Server lifecycle
//!
//! Uninitialized → Initializing → Running → ShuttingDown → Terminated.
//!
//! The lifecycle owns the connection manager and the transports. Only a
//! termination signal or an explicit [`Lifecycle::request_shutdown`] ends
//! the process; failures inside transports and request tasks are logged.

use anyhow::Context;
use serde::Serialize;
use serde_json::json;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::BufReader;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::{ServerConfig, TransportKind};
use crate::db::{ConnectionManager, ConnectionStatus, Connector};
use crate::dispatcher::Dispatcher;
use crate::tools::{ToolContext, ToolRegistry};
use crate::transport::{http, stdio, HttpState, StdioExit};

/// How long shutdown waits for each transport to wind down
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Uninitialized,
    Initializing,
    Running,
    ShuttingDown,
    Terminated,
}

/// Snapshot returned by [`Lifecycle::status`]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleStatus {
    pub state: LifecycleState,
    pub transport: TransportKind,
    pub push_clients: usize,
    pub connection: ConnectionStatus,
}

/// Supervisor for the transports and the downstream connection
pub struct Lifecycle {
    config: Arc<ServerConfig>,
    connections: ConnectionManager,
    http: HttpState,
    state: Mutex<LifecycleState>,
    tasks: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
    shutdown_started: AtomicBool,
    /// Tells transports to stop
    shutdown_tx: watch::Sender<bool>,
    /// Asks [`Lifecycle::run`] to begin shutdown
    requested_tx: watch::Sender<bool>,
}

impl Lifecycle {
    pub fn new(config: ServerConfig, connector: Arc<dyn Connector>) -> Self {
        let config = Arc::new(config);
        let connections = ConnectionManager::new(connector, Arc::clone(&config));
        let ctx = ToolContext {
            connections: connections.clone(),
            config: Arc::clone(&config),
        };
        let dispatcher = Dispatcher::new(ToolRegistry::builtin(), ctx);

        Self {
            http: HttpState::new(dispatcher, Arc::clone(&config)),
            config,
            connections,
            state: Mutex::new(LifecycleState::Uninitialized),
            tasks: Mutex::new(Vec::new()),
            shutdown_started: AtomicBool::new(false),
            shutdown_tx: watch::channel(false).0,
            requested_tx: watch::channel(false).0,
        }
    }

    fn state_guard(&self) -> MutexGuard<'_, LifecycleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: LifecycleState) {
        let mut state = self.state_guard();
        tracing::info!("Lifecycle {:?} -> {:?}", *state, next);
        *state = next;
    }

    pub fn state(&self) -> LifecycleState {
        *self.state_guard()
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.http.dispatcher
    }

    pub fn http_state(&self) -> &HttpState {
        &self.http
    }

    /// Validate configuration; problems are logged, never fatal
    pub fn initialize(&self) -> anyhow::Result<()> {
        let state = self.state();
        if state != LifecycleState::Uninitialized {
            anyhow::bail!("cannot initialize from state {:?}", state);
        }
        self.set_state(LifecycleState::Initializing);

        let report = self.config.validate();
        for warning in &report.warnings {
            tracing::warn!("Configuration: {}", warning);
        }
        if report.is_valid() {
            let shown = self.config.display();
            tracing::info!(
                "Profile '{}' → {} ({})",
                shown.profile,
                shown.database_path,
                shown.mode
            );
        } else {
            tracing::warn!(
                "Configuration incomplete ({}); database tools will report a configuration error until it is fixed",
                report.errors.join(", ")
            );
        }
        Ok(())
    }

    /// Start the configured transport
    ///
    /// Failing to bind the HTTP listener is the one fatal startup error.
    pub async fn start(&self) -> anyhow::Result<()> {
        if self.state() == LifecycleState::Uninitialized {
            self.initialize()?;
        }
        let state = self.state();
        if state != LifecycleState::Initializing {
            anyhow::bail!("cannot start from state {:?}", state);
        }

        match self.config.transport {
            TransportKind::Http => {
                let addr = self.config.bind_addr();
                let listener = TcpListener::bind(&addr)
                    .await
                    .with_context(|| format!("failed to bind HTTP listener on {}", addr))?;
                let state = self.http.clone();
                let shutdown = self.shutdown_tx.subscribe();
                self.supervise("http", async move {
                    if let Err(e) = http::serve(listener, state, shutdown).await {
                        tracing::error!("HTTP transport failed: {}", e);
                    }
                });
            }
            TransportKind::Stdio => {
                let dispatcher = self.http.dispatcher.clone();
                let shutdown = self.shutdown_tx.subscribe();
                self.supervise("stdio", async move {
                    let reader = BufReader::new(tokio::io::stdin());
                    match stdio::serve(dispatcher, reader, tokio::io::stdout(), shutdown).await {
                        Ok(StdioExit::InputClosed) => {
                            tracing::info!("stdin closed; staying up until a termination signal")
                        }
                        Ok(StdioExit::Shutdown) => {}
                        Err(e) => tracing::error!("stdio transport failed: {}", e),
                    }
                });
            }
        }

        self.set_state(LifecycleState::Running);
        Ok(())
    }

    fn supervise<F>(&self, name: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task);
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((name, handle));
    }

    /// Initialize, start, then block until a signal or shutdown request
    pub async fn run(&self) -> anyhow::Result<()> {
        self.initialize()?;
        self.start().await?;

        let mut requested = self.requested_tx.subscribe();
        tokio::select! {
            _ = termination_signal() => {}
            _ = requested.wait_for(|r| *r) => tracing::info!("Shutdown requested"),
        }

        self.shutdown().await;
        Ok(())
    }

    /// Ask [`Lifecycle::run`] to shut down
    pub fn request_shutdown(&self) {
        self.requested_tx.send_replace(true);
    }

    /// Tear everything down once; returns false if shutdown already began
    pub async fn shutdown(&self) -> bool {
        if self.shutdown_started.swap(true, Ordering::SeqCst) {
            tracing::debug!("Shutdown already in progress");
            return false;
        }
        self.set_state(LifecycleState::ShuttingDown);

        self.shutdown_tx.send_replace(true);

        self.http
            .stream
            .broadcast("shutdown", json!({"reason": "server shutting down"}));
        let closed = self.http.events.close_all() + self.http.stream.close_all();
        tracing::info!("Closed {} push client(s)", closed);

        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for (name, mut task) in tasks {
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await {
                Ok(Ok(())) => tracing::debug!("{} transport stopped", name),
                Ok(Err(e)) => tracing::error!("{} transport task failed: {}", name, e),
                Err(_) => {
                    tracing::warn!("{} transport did not stop within {:?}, aborting", name, SHUTDOWN_GRACE);
                    task.abort();
                }
            }
        }

        self.connections.disconnect().await;
        self.set_state(LifecycleState::Terminated);
        true
    }

    pub fn status(&self) -> LifecycleStatus {
        LifecycleStatus {
            state: self.state(),
            transport: self.config.transport,
            push_clients: self.http.events.client_count() + self.http.stream.client_count(),
            connection: self.connections.get_status(),
        }
    }
}

/// Resolves on SIGINT or, on unix, SIGTERM
async fn termination_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("SIGINT received, initiating shutdown"),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                tracing::info!("SIGTERM received, initiating shutdown");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
