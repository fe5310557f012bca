//! RPC bridge for Horizon applications.
//!
//! This crate connects an application to one remote gRPC service over a
//! certificate-pinned TLS channel:
//!
//! - **Trust Store**: a fixed set of trusted CAs parsed from PEM ([`tls`])
//! - **Channel**: one verified HTTP/2 connection, shared by concurrent calls
//! - **Call Dispatch**: unary and server-streaming calls with deadlines and
//!   cancellation
//! - **Status Decoding**: failures carry their code, message and typed
//!   `google.rpc` details
//! - **Log Sinks**: outcomes and diagnostics go wherever the application
//!   points them ([`sink`])
//!
//! # Opening a channel
//!
//! ```ignore
//! use horizon_bridge::grpc::{Channel, ChannelConfig};
//! use horizon_bridge::tls::{TransportCredentials, TrustAnchor};
//!
//! let anchor = TrustAnchor::from_pem(include_bytes!("server.pem"))?;
//! let credentials = TransportCredentials::from_trust_anchor(&anchor)?;
//! let channel = Channel::open(ChannelConfig::new("localhost:10000", credentials)).await?;
//! ```
//!
//! # Errors
//!
//! [`BridgeError`] covers local failures only: bad configuration, a
//! connection that could not be established, a request that could not be
//! encoded. Anything the remote side decides is a
//! [`CallOutcome::Failure`](grpc::CallOutcome::Failure) carrying a
//! [`Status`](grpc::Status).
//!
//! # Testing
//!
//! The `mock` feature enables `grpc::MockTransport`, a scripted in-memory
//! transport that plugs into [`Channel::from_transport`](grpc::Channel::from_transport).

mod error;
pub mod grpc;
pub mod logging;
pub mod sink;
pub mod tls;

pub use error::{BridgeError, CodecError, ConnectError, Result};
pub use logging::targets;

// Re-export commonly used types at the crate root
pub use grpc::{
    CallOptions, CallOutcome, Channel, ChannelConfig, Status, StatusCode, StreamHandle,
};
pub use sink::{DocumentSink, LogSink};
pub use tls::{TransportCredentials, TrustAnchor};
