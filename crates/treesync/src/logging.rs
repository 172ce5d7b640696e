//! Subscriber setup for processes embedding a mirror.
//!
//! All treesync events use targets under `treesync.` (`treesync.mirror`,
//! `treesync.throttle`, `treesync.indicator`, ...), so one directive such
//! as `treesync=debug` covers the whole stack.
//!
//! # Priority (highest to lowest)
//!
//! 1. `TREESYNC_LOG` env var
//! 2. `RUST_LOG` env var
//! 3. the `default_directives` argument

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::util::TryInitError;

/// Project-specific filter variable.
pub const LOG_ENV: &str = "TREESYNC_LOG";

/// Install a global fmt subscriber writing to stderr.
///
/// With the `tracing-json` feature the output is one JSON object per line.
/// Fails if a global subscriber is already set.
pub fn init_tracing(default_directives: &str) -> Result<(), TryInitError> {
    let filter = build_env_filter(default_directives);
    let registry = tracing_subscriber::registry().with(filter);

    #[cfg(feature = "tracing-json")]
    {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    }

    #[cfg(not(feature = "tracing-json"))]
    {
        let ansi = std::io::IsTerminal::is_terminal(&std::io::stderr());
        registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(ansi)
                    .with_target(true)
                    .with_thread_names(true),
            )
            .try_init()
    }
}

fn build_env_filter(default_directives: &str) -> EnvFilter {
    if let Ok(directives) = std::env::var(LOG_ENV)
        && let Ok(filter) = EnvFilter::try_new(&directives)
    {
        return filter;
    }
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    EnvFilter::try_new(default_directives).unwrap_or_else(|_| EnvFilter::new("warn"))
}
