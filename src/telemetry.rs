use std::io::{self, IsTerminal};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Installs the global subscriber: human-readable logs on stderr, filtered by
/// `RUST_LOG` (default `info`). Stdout stays free for command output.
///
/// Calling it twice is harmless; the second installation is ignored.
pub fn init() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            fmt::layer()
                .with_writer(io::stderr)
                .with_ansi(io::stderr().is_terminal()),
        )
        .try_init();
}
