//! Logging utilities for the host and for module processes
//!
//! - Respects RUST_LOG environment variable
//! - Falls back to the configured filter, then to "info"
//! - Writes to stderr; module processes use stdout for the protocol
//!
//! # Usage
//!
//! ## Host
//! ```no_run
//! use module_host::utils::init_logging;
//!
//! init_logging(None); // Uses RUST_LOG or defaults to "info"
//! ```
//!
//! ## Module process
//! ```no_run
//! use module_host::utils::init_module_logging;
//!
//! init_module_logging("my_module", None);
//! ```

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Pick the filter directive: RUST_LOG, then `configured`, then `fallback`
fn resolve_filter(rust_log: Option<String>, configured: Option<&str>, fallback: &str) -> String {
    rust_log
        .filter(|s| !s.trim().is_empty())
        .or_else(|| configured.map(str::to_string))
        .unwrap_or_else(|| fallback.to_string())
}

fn env_filter(configured: Option<&str>, fallback: &str) -> EnvFilter {
    let directive = resolve_filter(std::env::var("RUST_LOG").ok(), configured, fallback);
    EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new(fallback))
}

fn ansi_enabled() -> bool {
    std::env::var("NO_COLOR").is_err()
}

/// Initialize logging for the host
///
/// # Arguments
/// * `filter` - Optional log filter from config (e.g., "info", "module_host=debug").
///   RUST_LOG takes precedence; without either the level is "info".
pub fn init_logging(filter: Option<&str>) {
    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false)
                .with_ansi(ansi_enabled()),
        )
        .with(env_filter(filter, "info"))
        .try_init();
}

/// Initialize logging inside a module process
///
/// Output goes to stderr, which the host forwards into its own log.
/// Default filter: `{module_name}=info,module_host=info`.
pub fn init_module_logging(module_name: &str, filter: Option<&str>) {
    let default_filter = format!("{}=info,module_host=info", module_name.replace('-', "_"));
    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false)
                .with_ansi(false),
        )
        .with(env_filter(filter, &default_filter))
        .try_init();
}

/// Initialize logging with JSON output (for log aggregation)
#[cfg(feature = "json-logging")]
pub fn init_json_logging(filter: Option<&str>) {
    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_current_span(true)
                .with_span_list(true),
        )
        .with(env_filter(filter, "info"))
        .try_init();
}

/// Initialize logging from the `[logging]` config section
///
/// `json_format` without the `json-logging` feature falls back to text.
pub fn init_logging_from_config(config: &crate::config::LoggingConfig) {
    let filter = config.filter.as_deref();

    if config.json_format {
        #[cfg(feature = "json-logging")]
        {
            init_json_logging(filter);
        }
        #[cfg(not(feature = "json-logging"))]
        {
            init_logging(filter);
        }
    } else {
        init_logging(filter);
    }
}
