//! Logging setup for the CLI.
//!
//! Installs a global tracing subscriber writing to stderr. The filter comes
//! from `ALCD_LOG` when set, otherwise `info` (or `debug` with `-v`).

use tracing_subscriber::{fmt, EnvFilter};

pub const LOG_ENV: &str = "ALCD_LOG";

fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "debug"
    } else {
        "info"
    }
}

/// Install the subscriber. Subsequent calls are no-ops.
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive() {
        assert_eq!(default_directive(false), "info");
        assert_eq!(default_directive(true), "debug");
    }
}
