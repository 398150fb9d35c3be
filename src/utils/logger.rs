use tracing_subscriber::{EnvFilter, fmt};

pub const LOG_ENV: &str = "REUSECACHE_LOG";

/// Installs the global subscriber. `REUSECACHE_LOG` takes precedence over
/// the verbosity flag; calling this twice is harmless.
pub fn init_logging(verbose: bool) {
    let fallback = if verbose { "reusecache=debug" } else { "warn" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(fallback));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
