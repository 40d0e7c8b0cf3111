//! Process-wide logging setup.
//!
//! `log` records from the library are bridged into `tracing`, so a single
//! subscriber renders both the `log::` macros and the scan spans.

use std::sync::OnceLock;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::{LogFormat, LoggingConfig};

static INITIALIZED: OnceLock<()> = OnceLock::new();

/// Installs the global subscriber. `RUST_LOG` overrides the configured level.
/// Calling it again is a no-op.
pub fn init_logging(config: &LoggingConfig) {
    INITIALIZED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&config.level))
            .unwrap_or_else(|_| EnvFilter::new("info"));

        let fmt_layer = match config.format {
            LogFormat::Text => tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .boxed(),
            LogFormat::Json => tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_writer(std::io::stderr)
                .boxed(),
        };

        let subscriber = tracing_subscriber::registry().with(filter).with(fmt_layer);

        if let Err(e) = tracing_log::LogTracer::init() {
            eprintln!("log bridge already installed: {}", e);
        }
        if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
            eprintln!("global subscriber already installed: {}", e);
        }
    });
}
