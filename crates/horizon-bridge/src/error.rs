//! Error types for the bridge.
//!
//! Only *local* failures live here. A status reported by the remote end is a
//! normal outcome of a call and travels as [`Status`](crate::grpc::Status)
//! inside a [`CallOutcome`](crate::grpc::CallOutcome) instead.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Boxed error produced by a request encoder or response decoder.
pub type CodecError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Local failures raised by the bridge.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Bad or missing trust material, or an unusable channel configuration.
    ///
    /// Fatal at startup; nothing at runtime can repair it.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The transport to the remote endpoint could not be established.
    #[error("failed to connect to {target}: {source}")]
    Connection {
        /// The `host:port` that was dialed.
        target: String,
        /// What went wrong underneath.
        #[source]
        source: ConnectError,
    },

    /// The request could not be encoded. Nothing was sent.
    #[error("failed to serialize request for {method}: {source}")]
    Serialization {
        /// Path of the method being called.
        method: String,
        /// The encoder's error.
        #[source]
        source: CodecError,
    },
}

impl BridgeError {
    /// Returns true for configuration errors.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    /// Returns true for connection errors.
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }

    /// Returns true for serialization errors.
    pub fn is_serialization(&self) -> bool {
        matches!(self, Self::Serialization { .. })
    }
}

/// The underlying cause of a [`BridgeError::Connection`].
#[derive(Error, Debug)]
pub enum ConnectError {
    /// The target host could not be resolved.
    #[error("DNS resolution failed: {0}")]
    Resolve(#[source] io::Error),

    /// No resolved address accepted a TCP connection.
    #[error("TCP connect failed: {0}")]
    Tcp(#[source] io::Error),

    /// The TLS handshake failed, including certificate verification.
    #[error("TLS handshake failed: {0}")]
    Handshake(#[source] io::Error),

    /// Establishing the connection took longer than the connect timeout.
    #[error("connection attempt timed out after {0:?}")]
    Timeout(Duration),

    /// The HTTP/2 layer refused the established stream.
    #[error("HTTP/2 transport setup failed: {0}")]
    Transport(#[source] tonic::transport::Error),
}

/// A specialized Result type for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;
