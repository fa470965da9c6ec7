//! Logging setup for binaries

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install a fmt subscriber. `RUST_LOG` wins over `level` when set.
pub fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    // A second call (tests, embedding) keeps the first subscriber
    let _ = tracing_subscriber::registry().with(fmt::layer()).with(filter).try_init();
}
