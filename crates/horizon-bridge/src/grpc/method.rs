//! RPC method descriptors.
//!
//! The bridge knows nothing about a service beyond what a descriptor tells
//! it: the method path and how to turn a request into bytes and bytes into a
//! response. Generated stubs or hand-written message types plug in here.
//!
//! ```ignore
//! use horizon_bridge::grpc::{MethodDescriptor, StreamingMethod, UnaryMethod};
//!
//! let get_user: UnaryMethod<GetUserRequest, User> =
//!     MethodDescriptor::prost_unary("/web.Backend/GetUser");
//! let get_users: StreamingMethod<GetUsersRequest, User> =
//!     MethodDescriptor::prost_server_streaming("/web.Backend/GetUsers");
//! ```

use std::fmt;
use std::marker::PhantomData;

use bytes::Bytes;
use http::uri::PathAndQuery;

use crate::error::CodecError;

/// Marker for single-request, single-response methods.
#[derive(Debug, Clone, Copy)]
pub enum Unary {}

/// Marker for single-request, streamed-response methods.
#[derive(Debug, Clone, Copy)]
pub enum ServerStreaming {}

/// Request encoder.
pub type EncodeFn<Req> = fn(&Req) -> Result<Bytes, CodecError>;

/// Response decoder.
pub type DecodeFn<Resp> = fn(Bytes) -> Result<Resp, CodecError>;

/// Everything the dispatcher needs to call one remote method.
pub struct MethodDescriptor<Req, Resp, Kind> {
    path: PathAndQuery,
    encode: EncodeFn<Req>,
    decode: DecodeFn<Resp>,
    _kind: PhantomData<fn() -> Kind>,
}

/// A unary method descriptor.
pub type UnaryMethod<Req, Resp> = MethodDescriptor<Req, Resp, Unary>;

/// A server-streaming method descriptor.
pub type StreamingMethod<Req, Resp> = MethodDescriptor<Req, Resp, ServerStreaming>;

impl<Req, Resp, Kind> MethodDescriptor<Req, Resp, Kind> {
    /// Build a descriptor from a static path and codec functions.
    ///
    /// # Panics
    ///
    /// Panics if `path` is not a valid URI path, like `http`'s `from_static`
    /// constructors. Paths are compile-time constants in practice.
    pub fn new(path: &'static str, encode: EncodeFn<Req>, decode: DecodeFn<Resp>) -> Self {
        Self {
            path: PathAndQuery::from_static(path),
            encode,
            decode,
            _kind: PhantomData,
        }
    }

    /// Build a descriptor from a runtime path, validating it.
    pub fn from_path(
        path: &str,
        encode: EncodeFn<Req>,
        decode: DecodeFn<Resp>,
    ) -> crate::Result<Self> {
        let valid = path.starts_with('/') && path[1..].split('/').count() == 2;
        let parsed = path.parse::<PathAndQuery>().ok().filter(|_| valid);
        let path = parsed.ok_or_else(|| {
            crate::BridgeError::Configuration(format!(
                "invalid method path '{}', expected /package.Service/Method",
                path
            ))
        })?;
        Ok(Self {
            path,
            encode,
            decode,
            _kind: PhantomData,
        })
    }

    /// The HTTP/2 path, `/package.Service/Method`.
    pub fn path(&self) -> &PathAndQuery {
        &self.path
    }

    /// The fully-qualified service name.
    pub fn service(&self) -> &str {
        self.path
            .path()
            .trim_start_matches('/')
            .split('/')
            .next()
            .unwrap_or_default()
    }

    /// The bare method name.
    pub fn method(&self) -> &str {
        self.path.path().rsplit('/').next().unwrap_or_default()
    }

    pub(crate) fn encode(&self, request: &Req) -> Result<Bytes, CodecError> {
        (self.encode)(request)
    }

    pub(crate) fn decode(&self, payload: Bytes) -> Result<Resp, CodecError> {
        (self.decode)(payload)
    }

    pub(crate) fn decoder(&self) -> DecodeFn<Resp> {
        self.decode
    }
}

impl<Req, Resp> MethodDescriptor<Req, Resp, Unary>
where
    Req: prost::Message,
    Resp: prost::Message + Default,
{
    /// A unary method exchanging prost messages.
    pub fn prost_unary(path: &'static str) -> Self {
        Self::new(path, encode_prost::<Req>, decode_prost::<Resp>)
    }
}

impl<Req, Resp> MethodDescriptor<Req, Resp, ServerStreaming>
where
    Req: prost::Message,
    Resp: prost::Message + Default,
{
    /// A server-streaming method exchanging prost messages.
    pub fn prost_server_streaming(path: &'static str) -> Self {
        Self::new(path, encode_prost::<Req>, decode_prost::<Resp>)
    }
}

impl<Req, Resp, Kind> Clone for MethodDescriptor<Req, Resp, Kind> {
    fn clone(&self) -> Self {
        Self {
            path: self.path.clone(),
            encode: self.encode,
            decode: self.decode,
            _kind: PhantomData,
        }
    }
}

impl<Req, Resp, Kind> fmt::Debug for MethodDescriptor<Req, Resp, Kind> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDescriptor")
            .field("path", &self.path.as_str())
            .finish()
    }
}

fn encode_prost<M: prost::Message>(message: &M) -> Result<Bytes, CodecError> {
    Ok(Bytes::from(message.encode_to_vec()))
}

fn decode_prost<M: prost::Message + Default>(payload: Bytes) -> Result<M, CodecError> {
    M::decode(payload).map_err(Into::into)
}
