//! Subscriber bootstrap for the binary. Library code only emits events.

use tracing_subscriber::EnvFilter;

/// Environment variable holding the filter directive, e.g. `glitchlab=debug`.
pub const LOG_ENV: &str = "GLITCHLAB_LOG";

/// Install a stderr fmt subscriber. `verbose` raises the default level to
/// debug; an explicit `GLITCHLAB_LOG` always wins. Safe to call twice.
pub fn init(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
