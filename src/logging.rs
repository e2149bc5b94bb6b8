//! Subscriber setup for the `grove` binary
//!
//! The library only emits `tracing` events; installing a subscriber is left to the binary.
//! The filter comes from `GROVE_LOG` when set (any `EnvFilter` directive, e.g.
//! `grove::artifacts::merge=debug`), otherwise from the `[logging]` section of the working
//! copy's configuration. Events go to stderr so they never mix with command output.

use crate::config::LoggingConfig;
use anyhow::Context;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::{EnvFilter, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub const LOG_ENV: &str = "GROVE_LOG";

/// Install the global subscriber
///
/// Fails when the level is not a valid filter or a subscriber is already installed.
pub fn init(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = env_filter(config)?;
    let registry = Registry::default().with(filter);

    let installed = if config.format.eq_ignore_ascii_case("json") {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_writer(std::io::stderr),
            )
            .try_init()
    };

    installed.context("failed to install the log subscriber")
}

fn env_filter(config: &LoggingConfig) -> anyhow::Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_env(LOG_ENV) {
        return Ok(filter);
    }

    EnvFilter::try_new(&config.level)
        .with_context(|| format!("invalid log level {:?}", config.level))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::plain("debug")]
    #[case::per_module("warn,grove::artifacts::merge=trace")]
    #[case::off("off")]
    fn configured_levels_make_filters(#[case] level: &str) {
        let config = LoggingConfig {
            level: level.to_string(),
            ..Default::default()
        };

        assert!(EnvFilter::try_new(&config.level).is_ok());
    }
}
