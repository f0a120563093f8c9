//! Tracing subscriber setup for the CLI and daemon.

use color_eyre::eyre::{Result, eyre};
use std::io::IsTerminal;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber. `RUST_LOG` wins over `default_level`.
///
/// Output goes to stderr, which the background daemon redirects to its log
/// file; colors are only used when stderr is a terminal.
pub fn init(default_level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| eyre!("invalid log level {default_level:?}: {e}"))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(std::io::stderr().is_terminal())
                .with_target(false),
        )
        .try_init()
        .map_err(|e| eyre!("failed to install log subscriber: {e}"))
}
