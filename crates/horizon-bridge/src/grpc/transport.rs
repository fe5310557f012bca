//! The wire behind a [`Channel`](super::Channel).
//!
//! A [`Transport`] moves already-encoded request bytes to the remote end and
//! hands back encoded responses or a raw `tonic::Status`. Encoding, status
//! decoding, cancellation and deadlines are handled above it, so an
//! implementation only has to deal with bytes.

use std::time::Duration;

use bytes::{Buf, BufMut, Bytes};
use futures_util::StreamExt;
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use http::uri::PathAndQuery;
use parking_lot::RwLock;
use tonic::client::Grpc;
use tonic::codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder};
use tonic::metadata::MetadataMap;

use crate::targets;

/// Stream of encoded responses from a server-streaming call.
pub type ResponseStream = BoxStream<'static, Result<Bytes, tonic::Status>>;

/// One encoded request on its way to the wire.
#[derive(Debug, Clone)]
pub struct RawRequest {
    /// The method path, `/package.Service/Method`.
    pub path: PathAndQuery,
    /// The encoded request message.
    pub payload: Bytes,
    /// Metadata to send as request headers.
    pub metadata: MetadataMap,
    /// Deadline to advertise to the server as `grpc-timeout`.
    pub timeout: Option<Duration>,
}

impl RawRequest {
    /// A request with no metadata and no advertised deadline.
    pub fn new(path: PathAndQuery, payload: Bytes) -> Self {
        Self {
            path,
            payload,
            metadata: MetadataMap::new(),
            timeout: None,
        }
    }

    fn into_parts(self) -> (PathAndQuery, tonic::Request<Bytes>) {
        let mut request = tonic::Request::new(self.payload);
        *request.metadata_mut() = self.metadata;
        if let Some(timeout) = self.timeout {
            request.set_timeout(timeout);
        }
        (self.path, request)
    }
}

/// Moves encoded calls to a remote endpoint.
///
/// Implementations must accept concurrent calls from many tasks. Dropping a
/// returned future or stream must abandon the exchange and release whatever
/// it holds.
pub trait Transport: Send + Sync + 'static {
    /// Send one request and wait for one response.
    fn unary(&self, request: RawRequest) -> BoxFuture<'static, Result<Bytes, tonic::Status>>;

    /// Send one request and wait for the response headers.
    fn server_streaming(
        &self,
        request: RawRequest,
    ) -> BoxFuture<'static, Result<ResponseStream, tonic::Status>>;

    /// Release transport resources. Later calls fail with `Cancelled`.
    fn close(&self) {}
}

/// Pass-through codec: the payload is already encoded.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct RawCodec;

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct RawEncoder;

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct RawDecoder;

impl Codec for RawCodec {
    type Encode = Bytes;
    type Decode = Bytes;
    type Encoder = RawEncoder;
    type Decoder = RawDecoder;

    fn encoder(&mut self) -> Self::Encoder {
        RawEncoder
    }

    fn decoder(&mut self) -> Self::Decoder {
        RawDecoder
    }
}

impl Encoder for RawEncoder {
    type Item = Bytes;
    type Error = tonic::Status;

    fn encode(&mut self, item: Self::Item, dst: &mut EncodeBuf<'_>) -> Result<(), Self::Error> {
        dst.put(item);
        Ok(())
    }
}

impl Decoder for RawDecoder {
    type Item = Bytes;
    type Error = tonic::Status;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Option<Self::Item>, Self::Error> {
        Ok(Some(src.copy_to_bytes(src.remaining())))
    }
}

/// [`Transport`] over a tonic HTTP/2 channel.
pub(crate) struct TonicTransport {
    channel: RwLock<Option<tonic::transport::Channel>>,
}

impl TonicTransport {
    pub(crate) fn new(channel: tonic::transport::Channel) -> Self {
        Self {
            channel: RwLock::new(Some(channel)),
        }
    }

    fn client(&self) -> Result<Grpc<tonic::transport::Channel>, tonic::Status> {
        self.channel
            .read()
            .clone()
            .map(Grpc::new)
            .ok_or_else(|| tonic::Status::cancelled("channel closed"))
    }
}

impl Transport for TonicTransport {
    fn unary(&self, request: RawRequest) -> BoxFuture<'static, Result<Bytes, tonic::Status>> {
        let client = self.client();
        Box::pin(async move {
            let mut client = client?;
            client.ready().await.map_err(|e| {
                tonic::Status::unavailable(format!("channel not ready: {}", e))
            })?;
            let (path, request) = request.into_parts();
            let response = client.unary(request, path, RawCodec).await?;
            Ok(response.into_inner())
        })
    }

    fn server_streaming(
        &self,
        request: RawRequest,
    ) -> BoxFuture<'static, Result<ResponseStream, tonic::Status>> {
        let client = self.client();
        Box::pin(async move {
            let mut client = client?;
            client.ready().await.map_err(|e| {
                tonic::Status::unavailable(format!("channel not ready: {}", e))
            })?;
            let (path, request) = request.into_parts();
            let response = client.server_streaming(request, path, RawCodec).await?;
            Ok(response.into_inner().boxed())
        })
    }

    fn close(&self) {
        if self.channel.write().take().is_some() {
            tracing::debug!(target: targets::CHANNEL, "Released HTTP/2 channel");
        }
    }
}
