//! SQLGate MCP Server
//!
//! Serves database tools over stdio or HTTP.
//!
//! Usage:
//!   sqlgate-mcp --db-path ./app.db
//!   sqlgate-mcp --transport stdio --profile replica
//!   sqlgate-mcp profiles list
//!   sqlgate-mcp profiles show replica

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

use sqlgate_mcp::config::{ConfigFile, ConfigOverrides, ConnectionProfile, ServerConfig, TransportKind};
use sqlgate_mcp::profiles::{ProfileStore, TomlProfileStore};
use sqlgate_mcp::{Lifecycle, SqliteConnector};

#[derive(Parser)]
#[command(name = "sqlgate-mcp")]
#[command(about = "MCP server exposing a SQL database as tools")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file (default: SQLGATE_CONFIG_PATH or ~/.sqlgate/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Transport to serve
    #[arg(long, env = "MCP_TRANSPORT", global = true, value_enum)]
    transport: Option<TransportKind>,

    /// HTTP listen host
    #[arg(long, env = "MCP_HOST", global = true)]
    host: Option<String>,

    /// HTTP listen port
    #[arg(long, env = "MCP_PORT", global = true)]
    port: Option<u16>,

    /// Connection profile to use
    #[arg(long, env = "DB_PROFILE", global = true)]
    profile: Option<String>,

    /// Database file, overriding the profile
    #[arg(long, env = "DB_PATH", global = true)]
    db_path: Option<PathBuf>,

    /// Allow statements that modify the database.
    /// `--allow-writes` enables, `--allow-writes=false` forces read-only
    #[arg(
        long,
        env = "DB_ALLOW_WRITES",
        global = true,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true"
    )]
    allow_writes: Option<bool>,

    /// Seconds to wait on a locked database
    #[arg(long, env = "DB_BUSY_TIMEOUT", global = true)]
    busy_timeout: Option<u64>,

    /// Schema used when a tool call names none
    #[arg(long, env = "DB_SCHEMA", global = true)]
    schema: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the server (default)
    Serve,
    /// Manage connection profiles in the config file
    Profiles {
        #[command(subcommand)]
        command: ProfileCommands,
    },
}

#[derive(Subcommand)]
enum ProfileCommands {
    /// List profile names
    List,
    /// Show one profile
    Show {
        /// Profile name
        name: String,
    },
    /// Add or replace a profile
    Add {
        /// Profile name
        name: String,
        /// Database file
        #[arg(long)]
        path: PathBuf,
        /// Allow statements that modify the database
        #[arg(long)]
        writable: bool,
        /// Default schema
        #[arg(long)]
        default_schema: Option<String>,
        /// Free-form description
        #[arg(long)]
        description: Option<String>,
    },
    /// Remove a profile
    Remove {
        /// Profile name
        name: String,
    },
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            transport: self.transport,
            host: self.host.clone(),
            port: self.port,
            profile: self.profile.clone(),
            db_path: self.db_path.clone(),
            allow_writes: self.allow_writes,
            busy_timeout_secs: self.busy_timeout,
            default_schema: self.schema.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    mcp_common::init_tracing("sqlgate_mcp")?;
    mcp_common::install_panic_logger();

    match cli.command {
        None | Some(Commands::Serve) => serve(&cli).await,
        Some(Commands::Profiles { ref command }) => {
            let path = match &cli.config {
                Some(path) => path.clone(),
                None => ConfigFile::default_path()?,
            };
            run_profiles_command(&TomlProfileStore::new(path), command)
        }
    }
}

async fn serve(cli: &Cli) -> Result<()> {
    let config = ServerConfig::load(cli.config.as_deref(), cli.overrides())?;
    tracing::info!(
        "Starting {} v{} ({} transport)",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        config.transport
    );

    let transport = config.transport;
    let lifecycle = Lifecycle::new(config, Arc::new(SqliteConnector));
    lifecycle.run().await?;

    tracing::info!("Server stopped");
    if transport == TransportKind::Stdio {
        // A blocking stdin read cannot be cancelled and would keep the
        // runtime from shutting down while the host holds stdin open
        std::process::exit(0);
    }
    Ok(())
}

fn run_profiles_command(store: &dyn ProfileStore, command: &ProfileCommands) -> Result<()> {
    match command {
        ProfileCommands::List => {
            let names = store.list()?;
            if names.is_empty() {
                println!("No profiles configured");
            }
            for name in names {
                println!("{}", name);
            }
        }
        ProfileCommands::Show { name } => match store.get(name)? {
            Some(profile) => println!("{}", toml::to_string_pretty(&profile)?),
            None => anyhow::bail!("Profile '{}' not found", name),
        },
        ProfileCommands::Add {
            name,
            path,
            writable,
            default_schema,
            description,
        } => {
            let profile = ConnectionProfile {
                allow_writes: *writable,
                default_schema: default_schema.clone(),
                description: description.clone(),
                ..ConnectionProfile::with_database(path.clone())
            };
            store.set(name, profile)?;
            println!("Saved profile '{}'", name);
        }
        ProfileCommands::Remove { name } => {
            if store.delete(name)? {
                println!("Removed profile '{}'", name);
            } else {
                anyhow::bail!("Profile '{}' not found", name);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_allow_writes_flag_forms() {
        let cli = Cli::try_parse_from(["sqlgate-mcp", "--allow-writes"]).unwrap();
        assert_eq!(cli.overrides().allow_writes, Some(true));

        let cli = Cli::try_parse_from(["sqlgate-mcp", "--allow-writes=false"]).unwrap();
        assert_eq!(cli.overrides().allow_writes, Some(false));

        let cli = Cli::try_parse_from(["sqlgate-mcp", "serve"]).unwrap();
        assert_eq!(cli.overrides().allow_writes, None);

        // A bare flag before a subcommand must not swallow it
        let cli = Cli::try_parse_from(["sqlgate-mcp", "--allow-writes", "profiles", "list"]).unwrap();
        assert_eq!(cli.overrides().allow_writes, Some(true));
        assert!(matches!(
            cli.command,
            Some(Commands::Profiles {
                command: ProfileCommands::List
            })
        ));
    }

    #[test]
    fn test_profile_add_writable_flag() {
        let cli = Cli::try_parse_from([
            "sqlgate-mcp",
            "profiles",
            "add",
            "replica",
            "--path",
            "replica.db",
            "--writable",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Profiles {
                command: ProfileCommands::Add { name, writable, .. },
            }) => {
                assert_eq!(name, "replica");
                assert!(writable);
            }
            _ => panic!("expected profiles add"),
        }
    }
}
