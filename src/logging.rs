//! Tracing setup for vspace.
//!
//! Library code only emits events. A host installs a subscriber once, either
//! with `init_tracing` / `init_tracing_json` or from a `LoggingConfig`;
//! `RUST_LOG` overrides the configured level when set.

use std::sync::Once;
use tracing::info;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::LoggingConfig;

static INIT: Once = Once::new();

fn install(config: &LoggingConfig) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));
        let fmt_layer = fmt::layer()
            .with_span_events(FmtSpan::CLOSE)
            .with_target(true)
            .with_thread_names(true)
            .with_line_number(true);

        // a host application may already own the global subscriber
        let installed = if config.json {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer.json().with_current_span(true))
                .try_init()
        } else {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .try_init()
        };
        if installed.is_ok() {
            info!(level = %config.level, json = config.json, "vspace tracing initialized");
        }
    });
}

/// Human-readable output at `info` unless `RUST_LOG` says otherwise.
pub fn init_tracing() {
    install(&LoggingConfig::default());
}

/// JSON lines, one object per event.
pub fn init_tracing_json() {
    install(&LoggingConfig {
        json: true,
        ..LoggingConfig::default()
    });
}

/// Install the subscriber described by the `logging` section of a config.
/// Only the first call in a process has any effect.
pub fn init_from_config(config: &LoggingConfig) {
    install(config);
}

/// Span around an address-space operation
#[macro_export]
macro_rules! span_trace {
    ($name:expr) => {
        tracing::info_span!($name)
    };
    ($name:expr, $($field:tt)*) => {
        tracing::info_span!($name, $($field)*)
    };
}

/// Log an error at the failure site and hand it back
#[macro_export]
macro_rules! log_error {
    ($err:expr) => {{
        let e = $err;
        tracing::error!(error = %e, "Operation failed");
        e
    }};
    ($err:expr, $msg:expr) => {{
        let e = $err;
        tracing::error!(error = %e, message = $msg, "Operation failed");
        e
    }};
}
