//! Server initialization utilities
//!
//! Standardized tracing setup and panic logging for MCP servers.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing/logging for MCP servers
///
/// Logs go to stderr (stdout is reserved for the stdio binding) with:
/// - Formatted output without ANSI colors
/// - `RUST_LOG` filtering when set
/// - Otherwise `<crate_name>=<LOG_LEVEL>`, where `LOG_LEVEL` defaults to `info`
///
/// Set `LOG_FORMAT=json` for structured JSON output.
///
/// ```rust,ignore
/// mcp_common::init_tracing("my_mcp")?;
/// ```
pub fn init_tracing(crate_name: &str) -> anyhow::Result<()> {
    let filter = match std::env::var("RUST_LOG") {
        Ok(_) => EnvFilter::from_default_env(),
        Err(_) => {
            let level = std::env::var("LOG_LEVEL")
                .map(|l| l.to_ascii_lowercase())
                .unwrap_or_else(|_| "info".to_string());
            EnvFilter::new(default_directive(crate_name, &level))
        }
    };

    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);

    if use_json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()?;
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(false),
            )
            .try_init()?;
    }

    Ok(())
}

/// Route panics from any task into the log instead of bare stderr
///
/// Tokio isolates a panicking task from the rest of the runtime; this hook
/// makes sure the failure is still visible in structured logs.
pub fn install_panic_logger() {
    std::panic::set_hook(Box::new(|info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_else(|| "unknown".to_string());
        let payload = info
            .payload()
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        tracing::error!(%location, "Unhandled panic: {}", payload);
    }));
}

fn default_directive(crate_name: &str, level: &str) -> String {
    let level = match level {
        "trace" | "debug" | "info" | "warn" | "error" | "off" => level,
        "warning" => "warn",
        _ => "info",
    };
    format!("{}={}", crate_name, level)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive_levels() {
        assert_eq!(default_directive("sqlgate_mcp", "debug"), "sqlgate_mcp=debug");
        assert_eq!(default_directive("sqlgate_mcp", "warning"), "sqlgate_mcp=warn");
        assert_eq!(default_directive("sqlgate_mcp", "loud"), "sqlgate_mcp=info");
    }
}
