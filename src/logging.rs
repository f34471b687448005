//! Logging setup.
//!
//! Everything logs through `tracing`. The subscriber is a registry with an
//! `EnvFilter` and a compact fmt layer.

use tracing_subscriber::{
    layer::SubscriberExt, util::SubscriberInitExt, util::TryInitError, EnvFilter,
};

const DEFAULT_FILTER: &str = "shell_bridge=info";

type InitResult = Result<(), TryInitError>;

fn install(filter: EnvFilter) -> InitResult {
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().compact())
        .try_init()
}

/// Install the subscriber using `RUST_LOG`, or `shell_bridge=info` when unset.
///
/// Fails if a global subscriber is already installed.
pub fn try_init() -> InitResult {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    install(filter)
}

/// Install the subscriber with a configured level or filter directive.
///
/// A bare level such as `debug` is scoped to this crate; anything else is
/// parsed as a full `EnvFilter` directive. Unparseable input falls back to
/// the default filter.
pub fn init_with_filter(level: &str) -> InitResult {
    let filter = EnvFilter::try_new(filter_directive(level))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    install(filter)
}

fn filter_directive(level: &str) -> String {
    match level.trim().to_ascii_lowercase().as_str() {
        lvl @ ("error" | "warn" | "info" | "debug" | "trace") => format!("shell_bridge={lvl}"),
        "" => DEFAULT_FILTER.to_string(),
        _ => level.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_install_is_rejected_quietly() {
        let _ = try_init();
        assert!(init_with_filter("debug").is_err());
        tracing::info!("still logging after a failed install");
    }

    #[test]
    fn test_filter_directive() {
        assert_eq!(filter_directive("debug"), "shell_bridge=debug");
        assert_eq!(filter_directive(" WARN "), "shell_bridge=warn");
        assert_eq!(filter_directive("  "), DEFAULT_FILTER);
        assert_eq!(
            filter_directive("shell_bridge=trace,axum=info"),
            "shell_bridge=trace,axum=info"
        );
    }
}
