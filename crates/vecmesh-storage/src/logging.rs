//! Structured logging setup.
//!
//! Centralized `tracing` configuration. The filter is read from the
//! `VECMESH_LOG` environment variable:
//!
//! - `VECMESH_LOG=info`: default level
//! - `VECMESH_LOG=vecmesh_storage::gossip=debug`: module-specific
//! - `VECMESH_LOG=warn,vecmesh_storage::coordinator=trace`: combined filters

use tracing_subscriber::{fmt, EnvFilter};

/// Initializes the global tracing subscriber with default settings.
///
/// Call once at startup; repeated calls are ignored.
pub fn init() {
    init_with_default("info");
}

/// Initializes the global tracing subscriber with a custom default level
/// used when `VECMESH_LOG` is not set.
pub fn init_with_default(default_level: &str) {
    let filter =
        EnvFilter::try_from_env("VECMESH_LOG").unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .compact();

    let _ = subscriber.try_init();
}
