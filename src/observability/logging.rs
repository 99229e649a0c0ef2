//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber once per process
//! - Pick the filter from `RUST_LOG`, falling back to the configured level

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter directive for `level`.
pub fn default_directive(level: &str) -> String {
    format!("netrelay={level}")
}

/// Install the global subscriber writing to stderr.
///
/// Calling it again is a no-op.
pub fn init(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(level)));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directive_scopes_to_crate() {
        assert_eq!(default_directive("debug"), "netrelay=debug");
    }

    #[test]
    fn init_twice_is_harmless() {
        init("warn");
        init("debug");
    }
}
