use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};

/// Default filter for the CLI: pipeline at info, sqlx and HTTP internals quiet.
pub const DEFAULT_FILTER: &str = "info,gamestats_ingest=debug,sqlx=warn,hyper=warn,reqwest=warn";

/// Sets up the global tracing subscriber with a fmt formatter and env filter.
///
/// `RUST_LOG` wins over `default_filter`. Calling this twice returns an error
/// instead of panicking, so tests and binaries can share it.
pub fn init_tracing(default_filter: &str) -> Result<(), anyhow::Error> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    SubscriberBuilder::default()
        .with_env_filter(filter)
        .with_target(true)
        .with_line_number(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {}", e))
}
