//! SQLGate MCP Library
//!
//! A JSON-RPC tool server in front of one SQL database session.
//!
//! # Usage as Library
//!
//! ```rust,ignore
//! use sqlgate_mcp::{config::ServerConfig, db::SqliteConnector, Lifecycle};
//!
//! let lifecycle = Lifecycle::new(ServerConfig::default(), Arc::new(SqliteConnector));
//! lifecycle.run().await?;
//! ```

pub mod config;
pub mod db;
pub mod dispatcher;
pub mod lifecycle;
pub mod profiles;
pub mod tools;
pub mod transport;

pub use config::{ConfigOverrides, ServerConfig, TransportKind};
pub use db::{ConnectionManager, SqliteConnector};
pub use dispatcher::Dispatcher;
pub use lifecycle::{Lifecycle, LifecycleState, LifecycleStatus};
pub use profiles::{ProfileStore, TomlProfileStore};
pub use tools::{ToolContext, ToolRegistry};
