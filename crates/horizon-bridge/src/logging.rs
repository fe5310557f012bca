//! Logging facilities for the bridge.
//!
//! The bridge reports through the `tracing` crate. Applications that want
//! those diagnostics next to their own output can route them into a
//! [`LogSink`] with [`install_sink_subscriber`]:
//!
//! ```ignore
//! use std::sync::Arc;
//! use horizon_bridge::logging;
//! use horizon_bridge::sink::DocumentSink;
//!
//! let sink = Arc::new(DocumentSink::new("target"));
//! logging::install_sink_subscriber(sink.clone(), "horizon_bridge=warn");
//! ```

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use crate::sink::{LogSink, SinkMakeWriter};

/// Target names for log filtering.
///
/// Use these with `tracing` directives to filter logs by subsystem.
pub mod targets {
    /// Crate-wide target.
    pub const BRIDGE: &str = "horizon_bridge";
    /// Trust anchor and credential setup.
    pub const TLS: &str = "horizon_bridge::tls";
    /// Channel open, reconnect and close.
    pub const CHANNEL: &str = "horizon_bridge::channel";
    /// Per-call lifecycle.
    pub const CALL: &str = "horizon_bridge::call";
    /// Status detail decoding.
    pub const STATUS: &str = "horizon_bridge::status";
    /// Text forwarded by [`TracingSink`](crate::sink::TracingSink).
    pub const SINK: &str = "horizon_bridge::sink";
}

/// Install a global fmt subscriber that writes into `sink`.
///
/// `directives` uses `EnvFilter` syntax and is overridden by `RUST_LOG` when
/// that is set. Returns false if a global subscriber was already installed.
pub fn install_sink_subscriber(sink: Arc<dyn LogSink>, directives: &str) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .without_time()
        .with_writer(SinkMakeWriter::new(sink))
        .try_init()
        .is_ok()
}
