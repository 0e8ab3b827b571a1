//! Tracing initialisation for host sessions.

use enrichments_config::LoggingConfig;
use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber filtered by `RUST_LOG`, or by the configured
/// level when `RUST_LOG` is unset.
///
/// Returns `false` if a global subscriber was already installed; the
/// existing one is kept.
pub fn init_tracing(config: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_a_no_op() {
        let config = LoggingConfig {
            level: "debug".into(),
        };
        init_tracing(&config);
        assert!(!init_tracing(&config));
    }

    #[test]
    fn invalid_level_falls_back() {
        let config = LoggingConfig {
            level: "not a [valid filter".into(),
        };
        // Must not panic whether or not a subscriber is already installed
        init_tracing(&config);
    }
}
