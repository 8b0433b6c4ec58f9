//! Subscriber setup for the `stewardgate` binary.
//!
//! The library only emits `tracing` events; installing a subscriber is left to
//! whoever embeds it. Log lines go to stderr so command output stays clean.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `log_level`. Debug builds print human-readable lines,
/// release builds print JSON. Calling this twice is a no-op.
pub fn init(log_level: &str) {
    let default_filter = format!("warn,stewardgate={}", log_level);
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&default_filter));

    #[cfg(debug_assertions)]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
            .ok();
    }

    #[cfg(not(debug_assertions))]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
            .ok();
    }
}
