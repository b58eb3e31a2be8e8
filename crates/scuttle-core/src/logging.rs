//! Console logging setup shared by binaries and tests.
//!
//! ```ignore
//! scuttle_core::logging::init_tracing(1)?; // info and above
//! ```
//!
//! `RUST_LOG` takes precedence over the verbosity level when set.

use crate::error::{ReplicationError, ReplicationResult};
use tracing_subscriber::EnvFilter;

/// Default filter directive for a `-v` count.
pub fn filter_for(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Install a global `fmt` subscriber.
///
/// Fails if a global subscriber is already installed.
pub fn init_tracing(verbosity: u8) -> ReplicationResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_for(verbosity)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| ReplicationError::Config(format!("failed to install tracing subscriber: {}", e)))
}
