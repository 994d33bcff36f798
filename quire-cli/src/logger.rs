//! Logging setup for the `quire` binary.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const DEBUG_FILTER: &str = "quire_cli=debug,quire_core=debug,quire_dev_server=debug";
const DEFAULT_FILTER: &str = "quire_cli=info,quire_core=info,quire_dev_server=info";

/// Install the global subscriber.
///
/// `debug` wins over `RUST_LOG`, which wins over the default info level for
/// quire crates.
pub fn init_logger(debug: bool) {
    tracing_subscriber::registry()
        .with(filter(debug))
        .with(fmt::layer().with_target(false).compact())
        .init();
}

fn filter(debug: bool) -> EnvFilter {
    if debug {
        EnvFilter::new(DEBUG_FILTER)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    }
}
