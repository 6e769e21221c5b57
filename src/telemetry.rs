use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// Installs the global fmt subscriber. `RUST_LOG` wins over `default_filter`
/// when set. Calling this again once a subscriber exists does nothing.
pub fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
