//! Tracing setup for the `polyci` binary.
//!
//! Logs always go to stderr so that stdout stays free for command output
//! (including `--output json`). `RUST_LOG` wins over the configured
//! `log_level` when set.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use crate::config::LogLevel;

/// Install the global subscriber. Only the first call in a process has any effect.
pub fn init_tracing(json: bool, level: LogLevel) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.tracing_level().as_str()));

    let output = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);
    let output = if json {
        output.json().with_current_span(false).boxed()
    } else {
        output.compact().boxed()
    };

    tracing_subscriber::registry()
        .with(output)
        .with(filter)
        .try_init()
        .ok();
}
