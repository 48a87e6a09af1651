//! Telemetry
//!
//! Sets up `tracing-subscriber`. Logs go to stderr so they never interleave
//! with the conversation on stdout.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is not set
pub fn default_filter(log_level: &str) -> String {
    format!("{},wren_engine={}", log_level, log_level)
}

/// Initialize the tracing subscriber.
///
/// Priority: `RUST_LOG` > `log_level` (from `--log`, `WREN_LOG` or config).
/// Debug builds print pretty output, release builds print JSON.
/// Calling this twice is a no-op.
pub fn init_telemetry_with_level(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(log_level)));

    #[cfg(debug_assertions)]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .pretty()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .ok();
    }

    #[cfg(not(debug_assertions))]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_names_the_crate() {
        assert_eq!(default_filter("debug"), "debug,wren_engine=debug");
    }

    #[test]
    fn test_double_init_is_harmless() {
        init_telemetry_with_level("warn");
        init_telemetry_with_level("debug");
    }
}
