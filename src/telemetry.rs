//! Log output for the binary.

use tracing_subscriber::EnvFilter;

/// Log to stderr, filtered by `FEEDSYNC_LOG` (falling back to `RUST_LOG`, then `info`).
pub fn init() {
    let filter = EnvFilter::try_from_env("FEEDSYNC_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
