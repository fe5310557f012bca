//! A scripted in-memory [`Transport`].
//!
//! Handlers are registered per method path and work on prost messages, so a
//! test server is a handful of closures:
//!
//! ```ignore
//! let transport = MockTransport::builder()
//!     .unary("/web.Backend/GetUser", |req: GetUserRequest| {
//!         if req.user_id == "1234" {
//!             Ok(User { id: req.user_id })
//!         } else {
//!             Err(Status::not_found("no such user"))
//!         }
//!     })
//!     .server_streaming("/web.Backend/GetUsers", |req: GetUsersRequest| {
//!         Ok((0..req.num_users).map(|i| Ok(User { id: i.to_string() })).collect())
//!     })
//!     .build();
//! let channel = Channel::from_transport("mock:0", transport.clone(), NullSink);
//! ```
//!
//! Failures returned by handlers go through the same wire encoding a real
//! server would use, details included.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use prost::Message;

use super::status::Status;
use super::transport::{RawRequest, ResponseStream, Transport};

type UnaryHandler = Arc<dyn Fn(Bytes) -> Result<Bytes, tonic::Status> + Send + Sync>;

type StreamingHandler =
    Arc<dyn Fn(Bytes) -> Result<Vec<Result<Bytes, tonic::Status>>, tonic::Status> + Send + Sync>;

#[derive(Default)]
struct MockStats {
    calls: AtomicUsize,
    active_streams: AtomicUsize,
    last_request: Mutex<Option<RawRequest>>,
}

/// Keeps a stream counted as active until dropped.
struct ActiveStream(Arc<MockStats>);

impl ActiveStream {
    fn new(stats: &Arc<MockStats>) -> Self {
        stats.active_streams.fetch_add(1, Ordering::SeqCst);
        Self(stats.clone())
    }
}

impl Drop for ActiveStream {
    fn drop(&mut self) {
        self.0.active_streams.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Builder for [`MockTransport`].
#[derive(Default)]
pub struct MockTransportBuilder {
    unary: HashMap<String, UnaryHandler>,
    streaming: HashMap<String, StreamingHandler>,
    latency: Option<Duration>,
}

impl MockTransportBuilder {
    /// Answer unary calls on `path` with `handler`.
    pub fn unary<Req, Resp, F>(mut self, path: &str, handler: F) -> Self
    where
        Req: Message + Default,
        Resp: Message,
        F: Fn(Req) -> Result<Resp, Status> + Send + Sync + 'static,
    {
        self.unary.insert(
            path.to_string(),
            Arc::new(move |payload: Bytes| {
                let request = decode_request::<Req>(payload)?;
                handler(request)
                    .map(|response| Bytes::from(response.encode_to_vec()))
                    .map_err(tonic::Status::from)
            }),
        );
        self
    }

    /// Answer server-streaming calls on `path` with `handler`.
    ///
    /// An `Err` from the handler rejects the call before any item is sent.
    /// An `Err` inside the returned list ends the stream at that point.
    pub fn server_streaming<Req, Resp, F>(mut self, path: &str, handler: F) -> Self
    where
        Req: Message + Default,
        Resp: Message,
        F: Fn(Req) -> Result<Vec<Result<Resp, Status>>, Status> + Send + Sync + 'static,
    {
        self.streaming.insert(
            path.to_string(),
            Arc::new(move |payload: Bytes| {
                let request = decode_request::<Req>(payload)?;
                let items = handler(request).map_err(tonic::Status::from)?;
                Ok(items
                    .into_iter()
                    .map(|item| {
                        item.map(|response| Bytes::from(response.encode_to_vec()))
                            .map_err(tonic::Status::from)
                    })
                    .collect())
            }),
        );
        self
    }

    /// Delay every response, and every streamed item, by `latency`.
    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Finish the transport.
    pub fn build(self) -> MockTransport {
        MockTransport {
            inner: Arc::new(MockInner {
                unary: self.unary,
                streaming: self.streaming,
                latency: self.latency,
                stats: Arc::new(MockStats::default()),
                closed: AtomicBool::new(false),
            }),
        }
    }
}

struct MockInner {
    unary: HashMap<String, UnaryHandler>,
    streaming: HashMap<String, StreamingHandler>,
    latency: Option<Duration>,
    stats: Arc<MockStats>,
    closed: AtomicBool,
}

/// Scripted [`Transport`] for tests and offline runs.
///
/// Clones share handlers and counters, so a test can keep one clone to
/// inspect after handing another to a channel.
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<MockInner>,
}

impl MockTransport {
    /// Start building a transport.
    pub fn builder() -> MockTransportBuilder {
        MockTransportBuilder::default()
    }

    /// Number of calls received, rejected ones included.
    pub fn calls(&self) -> usize {
        self.inner.stats.calls.load(Ordering::SeqCst)
    }

    /// Number of response streams not yet dropped.
    pub fn active_streams(&self) -> usize {
        self.inner.stats.active_streams.load(Ordering::SeqCst)
    }

    /// The most recent request, as it reached the wire.
    pub fn last_request(&self) -> Option<RawRequest> {
        self.inner.stats.last_request.lock().clone()
    }

    /// Returns true once the owning channel closed the transport.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn record(&self, request: &RawRequest) -> Result<(), tonic::Status> {
        self.inner.stats.calls.fetch_add(1, Ordering::SeqCst);
        *self.inner.stats.last_request.lock() = Some(request.clone());
        if self.is_closed() {
            return Err(tonic::Status::cancelled("channel closed"));
        }
        Ok(())
    }
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("unary", &self.inner.unary.len())
            .field("streaming", &self.inner.streaming.len())
            .field("latency", &self.inner.latency)
            .field("calls", &self.calls())
            .finish()
    }
}

impl Transport for MockTransport {
    fn unary(&self, request: RawRequest) -> BoxFuture<'static, Result<Bytes, tonic::Status>> {
        let recorded = self.record(&request);
        let handler = self.inner.unary.get(request.path.as_str()).cloned();
        let latency = self.inner.latency;
        Box::pin(async move {
            recorded?;
            let handler = handler.ok_or_else(|| unknown_method(&request))?;
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }
            handler(request.payload)
        })
    }

    fn server_streaming(
        &self,
        request: RawRequest,
    ) -> BoxFuture<'static, Result<ResponseStream, tonic::Status>> {
        let recorded = self.record(&request);
        let handler = self.inner.streaming.get(request.path.as_str()).cloned();
        let latency = self.inner.latency;
        let stats = self.inner.stats.clone();
        Box::pin(async move {
            recorded?;
            let handler = handler.ok_or_else(|| unknown_method(&request))?;
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }
            let items = handler(request.payload)?;

            let active = ActiveStream::new(&stats);
            let stream = futures_util::stream::iter(items)
                .then(move |item| async move {
                    if let Some(latency) = latency {
                        tokio::time::sleep(latency).await;
                    }
                    item
                })
                .map(move |item| {
                    let _active = &active;
                    item
                });
            Ok(stream.boxed())
        })
    }

    fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
    }
}

fn decode_request<M: Message + Default>(payload: Bytes) -> Result<M, tonic::Status> {
    M::decode(payload)
        .map_err(|e| tonic::Status::internal(format!("failed to decode request: {}", e)))
}

fn unknown_method(request: &RawRequest) -> tonic::Status {
    tonic::Status::unimplemented(format!("unknown method {}", request.path))
}
