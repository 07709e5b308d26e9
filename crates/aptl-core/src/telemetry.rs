//! Centralised tracing initialisation for the `aptl` binary.
//!
//! Library modules only emit through `tracing` macros; installing a
//! subscriber is left to the binary. Tests scope their own subscriber with
//! `tracing::subscriber::with_default`.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Crates whose events follow the requested level; everything else is
/// held at `warn`.
const LAB_TARGETS: [&str; 2] = ["aptl_core", "aptl"];

/// Default filter directives for `level`, e.g. `warn,aptl_core=info,aptl=info`.
pub fn default_directives(level: Level) -> String {
    let mut directives = vec!["warn".to_string()];
    let level = level.as_str().to_ascii_lowercase();
    directives.extend(LAB_TARGETS.iter().map(|t| format!("{t}={level}")));
    directives.join(",")
}

/// Initialise the global tracing subscriber.
///
/// * `json` - emit newline-delimited JSON log lines with the current span
///   list, so every line of a start carries its `run_id`.
/// * `level` - verbosity of the lab crates when `RUST_LOG` is not set.
///
/// Only the first call takes effect.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));
    let registry = tracing_subscriber::registry().with(env_filter);

    if json {
        registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .json()
                    .with_span_list(true)
                    .with_current_span(false),
            )
            .try_init()
            .ok();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
            .try_init()
            .ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives_scope_lab_crates() {
        assert_eq!(
            default_directives(Level::DEBUG),
            "warn,aptl_core=debug,aptl=debug"
        );
        assert!(EnvFilter::try_new(default_directives(Level::INFO)).is_ok());
    }

    #[test]
    fn test_init_tracing_is_idempotent() {
        init_tracing(false, Level::INFO);
        init_tracing(true, Level::DEBUG);
    }
}
