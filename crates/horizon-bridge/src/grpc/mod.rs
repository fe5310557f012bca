//! gRPC client support.
//!
//! This module provides the client side of a single TLS-verified channel:
//! - Unary calls
//! - Server streaming
//! - Structured status details (`google.rpc` error model)
//! - Metadata (similar to HTTP headers)
//! - Deadlines and cancellation
//!
//! # Example
//!
//! ```ignore
//! use horizon_bridge::grpc::{CallOptions, CallOutcome, Channel, ChannelConfig};
//! use horizon_bridge::tls::{TransportCredentials, TrustAnchor};
//!
//! let anchor = TrustAnchor::from_pem(include_bytes!("server.pem"))?;
//! let credentials = TransportCredentials::from_trust_anchor(&anchor)?;
//! let channel = Channel::open(
//!     ChannelConfig::new("localhost:10000", credentials).server_name("x.test.example.com"),
//! )
//! .await?;
//!
//! match channel.call_unary(&get_user, &request, CallOptions::new()).await? {
//!     CallOutcome::Success(user) => println!("{:?}", user),
//!     CallOutcome::Failure(status) => println!("{}", status),
//! }
//! ```
//!
//! # Streaming
//!
//! ```ignore
//! let mut users = channel.call_stream(&get_users, &request, CallOptions::new()).await?;
//! while let Some(item) = users.next().await {
//!     match item {
//!         Ok(user) => println!("{:?}", user),
//!         Err(status) => println!("{}", status),
//!     }
//! }
//! ```

mod call;
mod channel;
mod details;
mod metadata;
mod method;
#[cfg(any(test, feature = "mock"))]
mod mock;
mod status;
mod transport;

pub use call::{CallOptions, CallOutcome, StreamHandle};
pub use channel::{Channel, ChannelConfig, DEFAULT_CONNECT_TIMEOUT};
pub use details::{
    BadRequest, CustomDetail, DebugInfo, DetailRegistry, ErrorDetail, ErrorInfo, FieldViolation,
    Help, HelpLink, LocalizedMessage, PreconditionFailure, PreconditionViolation, QuotaFailure,
    QuotaViolation, RequestInfo, ResourceInfo, RetryInfo, RpcStatus, TYPE_URL_PREFIX,
    type_name_of,
};
pub use metadata::GrpcMetadata;
pub use method::{
    DecodeFn, EncodeFn, MethodDescriptor, ServerStreaming, StreamingMethod, Unary, UnaryMethod,
};
#[cfg(any(test, feature = "mock"))]
pub use mock::{MockTransport, MockTransportBuilder};
pub use status::{Status, StatusCode, StatusDecoder};
pub use transport::{RawRequest, ResponseStream, Transport};

// Re-export tonic types for advanced usage
pub use tonic;
