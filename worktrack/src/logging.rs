//! Log subscriber setup for the `worktrack` binary.
//!
//! Logs go to stderr so command output on stdout stays scriptable.
//! `RUST_LOG` wins over the `--verbose` default when set.

use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;

/// Default filter directive for the given verbosity
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "worktrack=debug,worktrack_lib=debug,warn"
    } else {
        "worktrack=info,worktrack_lib=warn,warn"
    }
}

/// Install the global fmt subscriber. Call once, at process start.
pub fn init(verbose: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow!("Failed to install log subscriber: {}", e))
}
