//! Logging setup for the CLI.
//!
//! Structured `tracing` events go to stderr so stdout stays reserved for
//! the `output` module. `RUST_LOG` overrides the default level.

use std::io;
use tracing_subscriber::EnvFilter;

/// Default filter directive: `debug` with `--verbose`, `info` otherwise.
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose { "debug" } else { "info" }
}

/// Install the global subscriber. A second call is a no-op.
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init()
        .ok();
}
