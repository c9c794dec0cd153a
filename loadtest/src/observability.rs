//! Logging setup for the command line tool.
//!
//! Log events go to stderr so they never interleave with the report on stdout.

use std::env;

use tracing::Level;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, prelude::*};

/// Directives applied when `RUST_LOG` holds a plain level.
///
/// The driver logs at full detail, HTTP internals only when they go wrong.
const DEFAULT_DIRECTIVES: &str = "INFO,hyper=WARN,reqwest=WARN,loadtest=TRACE";

/// Installs the global tracing subscriber.
pub fn init_tracing() {
    let (level, env_filter) = parse_rust_log();
    let format = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);

    tracing_subscriber::registry()
        .with(format.with_filter(LevelFilter::from(level)))
        .with(env_filter)
        .init();
}

/// Derives the verbosity and per-crate filter from `RUST_LOG`.
///
/// An unset variable means `INFO`. A bare level such as `debug` caps the output of
/// [`DEFAULT_DIRECTIVES`]. Anything else is taken as a complete filter and used unchanged.
pub fn parse_rust_log() -> (Level, EnvFilter) {
    let Ok(value) = env::var(EnvFilter::DEFAULT_ENV) else {
        return (Level::INFO, EnvFilter::new(DEFAULT_DIRECTIVES));
    };

    match value.parse::<Level>() {
        Ok(level) => (level, EnvFilter::new(DEFAULT_DIRECTIVES)),
        Err(_) => (Level::TRACE, EnvFilter::new(value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rust_log_as_level_or_filter() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("RUST_LOG", "debug");
            let (level, filter) = parse_rust_log();
            assert_eq!(level, Level::DEBUG);
            assert!(filter.to_string().to_lowercase().contains("loadtest=trace"), "{filter}");

            jail.set_env("RUST_LOG", "loadtest=warn");
            let (level, filter) = parse_rust_log();
            assert_eq!(level, Level::TRACE);
            assert_eq!(filter.to_string().to_lowercase(), "loadtest=warn");

            Ok(())
        });
    }
}
