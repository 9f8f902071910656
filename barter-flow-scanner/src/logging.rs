use tracing_subscriber::EnvFilter;

/// Initialise the global `tracing` subscriber, filtered by `RUST_LOG` (default: info).
///
/// Output goes to stderr so stdout stays free for piped market data.
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}
