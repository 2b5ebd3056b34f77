//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

/// Install the global subscriber: `RUST_LOG` filtering (default `info`),
/// written to stderr so command output on stdout stays clean. A second
/// call is a no-op.
pub fn init() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
