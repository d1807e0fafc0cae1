//! Logging init: stderr with an env-driven filter.

use tracing_subscriber::EnvFilter;

/// Initialize structured logging to stderr. `verbose` lowers the default
/// filter to debug for this crate; `RUST_LOG` overrides everything.
pub fn init_logging(verbose: bool) {
    let default = if verbose {
        "info,dmscrape_core=debug,dmscrape_cli=debug"
    } else {
        "info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}
