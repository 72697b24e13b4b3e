//! Telemetry and structured logging setup.
//!
//! Log verbosity is driven by `RUST_LOG`; every session line carries the
//! watcher namespace so several watchers can share one log stream.

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

const DEFAULT_FILTER: &str = "info,chain_watcher=debug";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Initializes compact human-readable logging.
///
/// Example RUST_LOG values:
/// - `info` - All info and above
/// - `chain_watcher=trace,tokio_tungstenite=warn` - Trace for us, warn for the socket
pub fn init_telemetry() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .init();
}

/// Initializes telemetry with JSON output (for log aggregation).
pub fn init_telemetry_json() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().json().with_span_events(FmtSpan::CLOSE))
        .init();
}

/// Picks the output format from `LOG_FORMAT` (`json` or anything else for compact).
pub fn init_from_env() {
    match std::env::var("LOG_FORMAT").as_deref() {
        Ok("json") => init_telemetry_json(),
        _ => init_telemetry(),
    }
}
