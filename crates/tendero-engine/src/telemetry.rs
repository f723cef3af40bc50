//! Tracing subscriber setup for binaries.
//!
//! `RUST_LOG` overrides the default filter, e.g.
//! `RUST_LOG=info,tendero_engine=debug,sqlx=warn`.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,tendero_engine=debug,tendero_db=debug,sqlx=warn";

/// Installs a global fmt subscriber. Safe to call more than once; later
/// calls are ignored.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
