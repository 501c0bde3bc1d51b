//! Configuration for the SQL gateway
//!
//! Configuration is resolved once at startup, lowest priority first:
//! 1. Built-in defaults
//! 2. The TOML config file (`SQLGATE_CONFIG_PATH` or `~/.sqlgate/config.toml`)
//! 3. CLI flags / environment variables
//!
//! The file holds server settings plus any number of named connection
//! profiles; one of them is active.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name used when no profile is selected anywhere
pub const DEFAULT_PROFILE: &str = "default";

/// Schema queried when a profile does not name one
pub const FALLBACK_SCHEMA: &str = "main";

/// Environment variables that influence the server, in display order
pub const ENV_VARS: &[&str] = &[
    "MCP_TRANSPORT",
    "MCP_HOST",
    "MCP_PORT",
    "SQLGATE_CONFIG_PATH",
    "DB_PROFILE",
    "DB_PATH",
    "DB_ALLOW_WRITES",
    "DB_BUSY_TIMEOUT",
    "DB_SCHEMA",
    "LOG_LEVEL",
    "LOG_FORMAT",
];

/// Errors from loading or persisting configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine home directory")]
    NoHomeDir,

    #[error("failed to read config from {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write config to {path:?}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config from {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Which front end serves requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// One JSON object per line on stdin/stdout
    Stdio,
    /// HTTP unary + SSE + NDJSON push streams
    #[default]
    Http,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Stdio => write!(f, "stdio"),
            TransportKind::Http => write!(f, "http"),
        }
    }
}

/// A named set of parameters for opening the downstream database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionProfile {
    /// Path to the SQLite database file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Whether to allow write operations (INSERT, UPDATE, DELETE, etc.)
    /// Default: false (read-only)
    #[serde(default)]
    pub allow_writes: bool,

    /// How long a statement waits on a locked database, in seconds
    /// Default: 30
    #[serde(default = "default_timeout")]
    pub busy_timeout_secs: u64,

    /// Schema used when a tool call does not name one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_schema: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_timeout() -> u64 {
    30
}

impl Default for ConnectionProfile {
    fn default() -> Self {
        Self {
            path: None,
            allow_writes: false,
            busy_timeout_secs: default_timeout(),
            default_schema: None,
            description: None,
        }
    }
}

impl ConnectionProfile {
    /// Create a read-only profile pointing at a database file
    pub fn with_database(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Whether enough is known to attempt a connection
    pub fn is_complete(&self) -> bool {
        self.missing_fields().is_empty()
    }

    /// Settings that must be provided before connecting
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self
            .path
            .as_ref()
            .map(|p| p.as_os_str().is_empty())
            .unwrap_or(true)
        {
            missing.push("DB_PATH");
        }
        missing
    }

    /// Schema to use when a caller does not name one
    pub fn schema(&self) -> &str {
        self.default_schema.as_deref().unwrap_or(FALLBACK_SCHEMA)
    }
}

/// `[server]` table of the config file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default)]
    pub transport: TransportKind,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            transport: TransportKind::default(),
            host: default_host(),
            port: default_port(),
        }
    }
}

/// On-disk configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_profile: Option<String>,
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub profiles: BTreeMap<String, ConnectionProfile>,
}

impl ConfigFile {
    /// Config file location
    ///
    /// Looks for:
    /// 1. `SQLGATE_CONFIG_PATH` environment variable
    /// 2. `~/.sqlgate/config.toml`
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        if let Ok(path) = std::env::var("SQLGATE_CONFIG_PATH") {
            return Ok(PathBuf::from(path));
        }
        Ok(dirs::home_dir()
            .ok_or(ConfigError::NoHomeDir)?
            .join(".sqlgate")
            .join("config.toml"))
    }

    /// Load from a path; a missing file yields the defaults
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("Config file {:?} not found, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write to a path, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: path.to_path_buf(),
                source,
            })?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Values supplied on the command line or through the environment
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub transport: Option<TransportKind>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub profile: Option<String>,
    pub db_path: Option<PathBuf>,
    pub allow_writes: Option<bool>,
    pub busy_timeout_secs: Option<u64>,
    pub default_schema: Option<String>,
}

/// Fully resolved configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub transport: TransportKind,
    pub host: String,
    pub port: u16,
    /// Name of the active connection profile
    pub profile_name: String,
    pub profile: ConnectionProfile,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::resolve(ConfigFile::default(), ConfigOverrides::default())
    }
}

/// Outcome of configuration validation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    /// Problems that prevent connecting
    pub errors: Vec<String>,
    /// Recommendations that do not block anything
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Redacted view of the active configuration, safe to hand to clients
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayConfig {
    pub profile: String,
    pub database_path: String,
    pub mode: &'static str,
    pub busy_timeout_secs: u64,
    pub default_schema: String,
    pub transport: String,
    pub listen: String,
    pub description: Option<String>,
}

impl ServerConfig {
    /// Load the config file and apply overrides
    pub fn load(config_path: Option<&Path>, overrides: ConfigOverrides) -> Result<Self, ConfigError> {
        let path = match config_path {
            Some(p) => p.to_path_buf(),
            None => ConfigFile::default_path()?,
        };
        let file = ConfigFile::load_from(&path)?;
        Ok(Self::resolve(file, overrides))
    }

    /// Merge a config file with overrides
    pub fn resolve(file: ConfigFile, overrides: ConfigOverrides) -> Self {
        let profile_name = overrides
            .profile
            .or(file.active_profile)
            .unwrap_or_else(|| DEFAULT_PROFILE.to_string());

        let mut profile = match file.profiles.get(&profile_name) {
            Some(p) => p.clone(),
            None => {
                if !file.profiles.is_empty() {
                    tracing::warn!("Profile '{}' not found in config file", profile_name);
                }
                ConnectionProfile::default()
            }
        };

        if let Some(path) = overrides.db_path {
            profile.path = Some(path);
        }
        if let Some(allow) = overrides.allow_writes {
            profile.allow_writes = allow;
        }
        if let Some(timeout) = overrides.busy_timeout_secs {
            profile.busy_timeout_secs = timeout;
        }
        if let Some(schema) = overrides.default_schema {
            profile.default_schema = Some(schema);
        }

        Self {
            transport: overrides.transport.unwrap_or(file.server.transport),
            host: overrides.host.unwrap_or(file.server.host),
            port: overrides.port.unwrap_or(file.server.port),
            profile_name,
            profile,
        }
    }

    /// Check the active profile; never fails, only reports
    pub fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::default();
        for field in self.profile.missing_fields() {
            report.errors.push(format!("{} is required", field));
        }
        if let Some(path) = &self.profile.path {
            if self.profile.is_complete() && !path.exists() {
                report
                    .warnings
                    .push(format!("database file {:?} does not exist yet", path));
            }
        }
        if self.profile.default_schema.is_none() {
            report.warnings.push(format!(
                "DB_SCHEMA is recommended; falling back to '{}'",
                FALLBACK_SCHEMA
            ));
        }
        report
    }

    /// Address the HTTP listener binds to
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// URL announced to event-stream clients for posting requests
    pub fn endpoint_url(&self) -> String {
        format!("http://localhost:{}/mcp", self.port)
    }

    pub fn display(&self) -> DisplayConfig {
        DisplayConfig {
            profile: self.profile_name.clone(),
            database_path: self
                .profile
                .path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "NOT SET".to_string()),
            mode: if self.profile.allow_writes {
                "read-write"
            } else {
                "read-only"
            },
            busy_timeout_secs: self.profile.busy_timeout_secs,
            default_schema: self.profile.schema().to_string(),
            transport: self.transport.to_string(),
            listen: self.bind_addr(),
            description: self.profile.description.clone(),
        }
    }
}

/// Current values of the variables in [`ENV_VARS`]
pub fn environment_snapshot() -> BTreeMap<String, String> {
    ENV_VARS
        .iter()
        .map(|name| {
            let value = std::env::var(name).unwrap_or_else(|_| "NOT SET".to_string());
            (name.to_string(), value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const SAMPLE: &str = r#"
active_profile = "replica"

[server]
transport = "stdio"
port = 4100

[profiles.replica]
path = "/data/replica.db"
default_schema = "main"

[profiles.scratch]
path = "/tmp/scratch.db"
allow_writes = true
busy_timeout_secs = 5
"#;

    #[test]
    fn test_parse_file_and_select_active_profile() {
        let file: ConfigFile = toml::from_str(SAMPLE).unwrap();
        let config = ServerConfig::resolve(file, ConfigOverrides::default());

        assert_eq!(config.transport, TransportKind::Stdio);
        assert_eq!(config.port, 4100);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.profile_name, "replica");
        assert_eq!(config.profile.path, Some(PathBuf::from("/data/replica.db")));
        assert!(!config.profile.allow_writes);
        assert_eq!(config.profile.busy_timeout_secs, 30);
    }

    #[test]
    fn test_overrides_win_over_file() {
        let file: ConfigFile = toml::from_str(SAMPLE).unwrap();
        let overrides = ConfigOverrides {
            transport: Some(TransportKind::Http),
            port: Some(8080),
            profile: Some("scratch".to_string()),
            db_path: Some(PathBuf::from("/elsewhere.db")),
            ..Default::default()
        };
        let config = ServerConfig::resolve(file, overrides);

        assert_eq!(config.transport, TransportKind::Http);
        assert_eq!(config.port, 8080);
        assert_eq!(config.profile_name, "scratch");
        assert_eq!(config.profile.path, Some(PathBuf::from("/elsewhere.db")));
        assert!(config.profile.allow_writes);
        assert_eq!(config.profile.busy_timeout_secs, 5);
    }

    #[test]
    fn test_defaults_are_incomplete_but_valid_to_start() {
        let config = ServerConfig::default();
        assert_eq!(config.transport, TransportKind::Http);
        assert_eq!(config.port, 3000);
        assert!(!config.profile.is_complete());

        let report = config.validate();
        assert!(!report.is_valid());
        assert_eq!(report.errors, vec!["DB_PATH is required".to_string()]);
    }

    #[test]
    fn test_missing_file_loads_defaults() {
        let dir = tempdir().unwrap();
        let file = ConfigFile::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(file, ConfigFile::default());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let file: ConfigFile = toml::from_str(SAMPLE).unwrap();
        file.save_to(&path).unwrap();
        assert_eq!(ConfigFile::load_from(&path).unwrap(), file);
    }

    #[test]
    fn test_malformed_file_is_a_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "server = [").unwrap();
        assert!(matches!(
            ConfigFile::load_from(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_display_redacts_nothing_it_should_not_have() {
        let config = ServerConfig::resolve(
            ConfigFile::default(),
            ConfigOverrides {
                db_path: Some(PathBuf::from("/data/app.db")),
                ..Default::default()
            },
        );
        let display = config.display();
        assert_eq!(display.database_path, "/data/app.db");
        assert_eq!(display.mode, "read-only");
        assert_eq!(display.default_schema, FALLBACK_SCHEMA);
        assert_eq!(config.endpoint_url(), "http://localhost:3000/mcp");
    }

    #[test]
    fn test_environment_snapshot_lists_every_variable() {
        let snapshot = environment_snapshot();
        for name in ENV_VARS {
            assert!(snapshot.contains_key(*name));
        }
    }
}
