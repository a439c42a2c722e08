//! Logging setup using `tracing` + `tracing-subscriber`.
//!
//! Priority for determining the filter:
//! 1. the `level` argument (if provided)
//! 2. `RUNVISOR_LOG` environment variable (e.g. "info", "runvisor=debug")
//! 3. default to `info`
//!
//! Logs are sent to STDERR so that stdout stays free for payload output.

use anyhow::{Result, anyhow};
use tracing_subscriber::{EnvFilter, fmt};

/// Environment variable consulted when no explicit level is given.
pub const LOG_ENV: &str = "RUNVISOR_LOG";

/// Initialise the global logging subscriber.
///
/// Fails if the filter does not parse or a global subscriber is already set.
pub fn init_logging(level: Option<&str>) -> Result<()> {
    let filter = resolve_filter(level, std::env::var(LOG_ENV).ok().as_deref())?;

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!("logging already initialised: {e}"))
}

fn resolve_filter(level: Option<&str>, env: Option<&str>) -> Result<EnvFilter> {
    let directives = level
        .or(env.filter(|s| !s.trim().is_empty()))
        .unwrap_or("info");
    EnvFilter::try_new(directives.trim())
        .map_err(|e| anyhow!("invalid log filter {directives:?}: {e}"))
}
