//! Structured logging.
//!
//! The library only emits `tracing` events; binaries and tests decide where
//! they go. Secret material is never passed to a log macro.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a global fmt subscriber.
///
/// `RUST_LOG` wins when set; otherwise `default_directive` is used, e.g.
/// `"wallet_core=info"`. Calling it twice is harmless: the second call
/// returns `false`.
pub fn init_logging(default_directive: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_rejected_quietly() {
        init_logging("wallet_core=debug");
        assert!(!init_logging("wallet_core=debug"));
    }
}
