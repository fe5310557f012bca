//! Call dispatch: unary and server-streaming invocations on a [`Channel`].
//!
//! Every call races its exchange against three interrupts: the channel being
//! closed, the caller's cancellation token and the call deadline. Losing the
//! race drops the exchange, which resets the HTTP/2 stream underneath.

use std::future::pending;
use std::mem;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use http::uri::PathAndQuery;
use tokio::time::Sleep;
use tokio_util::sync::CancellationToken;

use super::channel::Channel;
use super::metadata::GrpcMetadata;
use super::method::{DecodeFn, StreamingMethod, UnaryMethod};
use super::status::{Status, StatusCode, StatusDecoder};
use super::transport::{RawRequest, ResponseStream};
use crate::error::{BridgeError, CodecError, Result};
use crate::targets;

/// Per-call settings.
///
/// ```ignore
/// let options = CallOptions::new()
///     .timeout(Duration::from_secs(5))
///     .cancel_token(shutdown.child_token());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Deadline for the whole call, including every item of a stream.
    pub timeout: Option<Duration>,
    /// External cancellation.
    pub cancel: Option<CancellationToken>,
    /// Request headers.
    pub metadata: GrpcMetadata,
}

impl CallOptions {
    /// Options with no deadline, no cancellation and no metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the call deadline.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Cancel the call when `token` is cancelled.
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Send `metadata` as request headers.
    pub fn metadata(mut self, metadata: GrpcMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// What a completed call produced.
///
/// A failure reported by the server is an ordinary outcome, not an error.
#[derive(Debug, Clone)]
pub enum CallOutcome<T> {
    /// The decoded response.
    Success(T),
    /// The decoded failure status.
    Failure(Status),
}

impl<T> CallOutcome<T> {
    /// Returns true for `Success`.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Returns true for `Failure`.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    /// The status code, `Ok` on success.
    pub fn code(&self) -> StatusCode {
        match self {
            Self::Success(_) => StatusCode::Ok,
            Self::Failure(status) => status.code,
        }
    }

    /// The response, if the call succeeded.
    pub fn success(self) -> Option<T> {
        match self {
            Self::Success(value) => Some(value),
            Self::Failure(_) => None,
        }
    }

    /// The failure status, if the call failed.
    pub fn failure(&self) -> Option<&Status> {
        match self {
            Self::Success(_) => None,
            Self::Failure(status) => Some(status),
        }
    }

    /// Convert into a `Result`.
    pub fn into_result(self) -> std::result::Result<T, Status> {
        match self {
            Self::Success(value) => Ok(value),
            Self::Failure(status) => Err(status),
        }
    }

    /// Map the response value.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CallOutcome<U> {
        match self {
            Self::Success(value) => CallOutcome::Success(f(value)),
            Self::Failure(status) => CallOutcome::Failure(status),
        }
    }
}

impl<T> From<std::result::Result<T, Status>> for CallOutcome<T> {
    fn from(result: std::result::Result<T, Status>) -> Self {
        match result {
            Ok(value) => Self::Success(value),
            Err(status) => Self::Failure(status),
        }
    }
}

/// Counts a call as in flight on its channel until dropped.
struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

enum Interrupt {
    Cancelled,
    DeadlineExceeded,
}

/// The interrupts one call is raced against.
struct CallScope {
    /// Child of the channel's shutdown token, cancelled by either.
    token: CancellationToken,
    channel_token: CancellationToken,
    caller: Option<CancellationToken>,
    deadline: Option<Pin<Box<Sleep>>>,
    timeout: Option<Duration>,
    in_flight: Option<InFlight>,
}

impl CallScope {
    fn new(channel: &Channel, options: &CallOptions) -> Self {
        let channel_token = channel.shutdown_token().clone();
        Self {
            token: channel_token.child_token(),
            channel_token,
            caller: options.cancel.clone(),
            deadline: options.timeout.map(|t| Box::pin(tokio::time::sleep(t))),
            timeout: options.timeout,
            in_flight: Some(InFlight::new(channel.in_flight_counter())),
        }
    }

    /// Resolves when any interrupt fires.
    async fn interrupted(&mut self) -> Status {
        let reason = {
            let CallScope {
                token,
                caller,
                deadline,
                ..
            } = self;
            tokio::select! {
                biased;
                _ = token.cancelled() => Interrupt::Cancelled,
                _ = wait_cancelled(caller.as_ref()) => Interrupt::Cancelled,
                _ = wait_deadline(deadline) => Interrupt::DeadlineExceeded,
            }
        };
        self.status_for(reason)
    }

    fn status_for(&self, reason: Interrupt) -> Status {
        match reason {
            Interrupt::Cancelled if self.channel_token.is_cancelled() => {
                Status::cancelled("channel closed")
            }
            Interrupt::Cancelled => Status::cancelled("call cancelled"),
            Interrupt::DeadlineExceeded => match self.timeout {
                Some(timeout) => {
                    Status::deadline_exceeded(format!("deadline of {:?} exceeded", timeout))
                }
                None => Status::deadline_exceeded("deadline exceeded"),
            },
        }
    }

    fn release(&mut self) {
        self.in_flight = None;
    }
}

async fn wait_cancelled(token: Option<&CancellationToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => pending().await,
    }
}

async fn wait_deadline(deadline: &mut Option<Pin<Box<Sleep>>>) {
    match deadline {
        Some(sleep) => sleep.as_mut().await,
        None => pending().await,
    }
}

impl Channel {
    /// Invoke a unary method.
    ///
    /// Returns `Err` only for local failures: the request could not be
    /// encoded. Everything the server (or the call's own deadline and
    /// cancellation) decides arrives as a [`CallOutcome`].
    pub async fn call_unary<Req, Resp>(
        &self,
        method: &UnaryMethod<Req, Resp>,
        request: &Req,
        options: CallOptions,
    ) -> Result<CallOutcome<Resp>> {
        let payload = encode_request(method.path(), method.encode(request))?;
        let mut scope = CallScope::new(self, &options);
        let exchange = self
            .transport()
            .unary(raw_request(method.path(), payload, &options));

        tracing::debug!(target: targets::CALL, "Calling {}", method.path());

        let result = tokio::select! {
            biased;
            status = scope.interrupted() => Err(status),
            result = exchange => Ok(result),
        };

        let outcome = match result {
            Err(status) => CallOutcome::Failure(status),
            Ok(Ok(payload)) => match method.decode(payload) {
                Ok(response) => CallOutcome::Success(response),
                Err(e) => CallOutcome::Failure(decode_failure(method.path(), e)),
            },
            Ok(Err(raw)) => CallOutcome::Failure(self.fail(method.path(), &raw)),
        };

        tracing::debug!(
            target: targets::CALL,
            "{} finished with {}",
            method.path(),
            outcome.code()
        );
        Ok(outcome)
    }

    /// Invoke a server-streaming method.
    ///
    /// Waits for the response headers. A call the server rejects outright
    /// still returns a handle; its first pull yields the failure.
    pub async fn call_stream<Req, Resp>(
        &self,
        method: &StreamingMethod<Req, Resp>,
        request: &Req,
        options: CallOptions,
    ) -> Result<StreamHandle<Resp>> {
        let payload = encode_request(method.path(), method.encode(request))?;
        let mut scope = CallScope::new(self, &options);
        let opening = self
            .transport()
            .server_streaming(raw_request(method.path(), payload, &options));

        tracing::debug!(target: targets::CALL, "Opening stream {}", method.path());

        let opened = tokio::select! {
            biased;
            status = scope.interrupted() => Err(status),
            result = opening => result.map_err(|raw| self.fail(method.path(), &raw)),
        };

        let state = match opened {
            Ok(stream) => StreamState::Open(stream),
            Err(status) => {
                scope.release();
                StreamState::Failed(status)
            }
        };

        Ok(StreamHandle {
            path: method.path().clone(),
            state,
            scope,
            decode: method.decoder(),
            decoder: self.status_decoder().clone(),
            received: 0,
        })
    }

    // Returned to the caller only; not emitted on the channel sink.
    fn fail(&self, path: &PathAndQuery, raw: &tonic::Status) -> Status {
        let status = self.status_decoder().decode(raw);
        tracing::debug!(
            target: targets::CALL,
            "{} to {} failed: {}",
            path,
            self.target(),
            status
        );
        status
    }
}

fn encode_request(
    path: &PathAndQuery,
    encoded: std::result::Result<Bytes, CodecError>,
) -> Result<Bytes> {
    encoded.map_err(|source| BridgeError::Serialization {
        method: path.to_string(),
        source,
    })
}

fn raw_request(path: &PathAndQuery, payload: Bytes, options: &CallOptions) -> RawRequest {
    let mut request = RawRequest::new(path.clone(), payload);
    options.metadata.apply_to(&mut request.metadata);
    request.timeout = options.timeout;
    request
}

fn decode_failure(path: &PathAndQuery, error: CodecError) -> Status {
    tracing::warn!(
        target: targets::CALL,
        "Failed to decode response from {}: {}",
        path,
        error
    );
    Status::internal(format!("failed to decode response: {}", error))
}

enum StreamState {
    Open(ResponseStream),
    Failed(Status),
    Finished,
}

/// Pull side of a server-streaming call.
///
/// Items arrive in the order the server sent them. The sequence ends with
/// `None` (clean end) or one `Err` (terminal failure); after either, every
/// pull returns `None`. Dropping the handle abandons the call.
pub struct StreamHandle<T> {
    path: PathAndQuery,
    state: StreamState,
    scope: CallScope,
    decode: DecodeFn<T>,
    decoder: StatusDecoder,
    received: usize,
}

impl<T> StreamHandle<T> {
    /// Pull the next item.
    ///
    /// Cancel-safe: dropping the returned future loses nothing.
    pub async fn next(&mut self) -> Option<std::result::Result<T, Status>> {
        match mem::replace(&mut self.state, StreamState::Finished) {
            StreamState::Failed(status) => return Some(Err(status)),
            StreamState::Finished => return None,
            open => self.state = open,
        }
        let StreamState::Open(stream) = &mut self.state else {
            return None;
        };

        let pulled = tokio::select! {
            biased;
            status = self.scope.interrupted() => Err(status),
            item = stream.next() => Ok(item),
        };

        let item = match pulled {
            Err(status) => Some(Err(status)),
            Ok(None) => None,
            Ok(Some(Ok(payload))) => match (self.decode)(payload) {
                Ok(item) => {
                    self.received += 1;
                    return Some(Ok(item));
                }
                Err(e) => Some(Err(decode_failure(&self.path, e))),
            },
            Ok(Some(Err(raw))) => Some(Err(self.decoder.decode(&raw))),
        };

        self.finish();
        match &item {
            Some(Err(status)) => tracing::debug!(
                target: targets::CALL,
                "Stream {} failed after {} item(s): {}",
                self.path,
                self.received,
                status
            ),
            _ => tracing::debug!(
                target: targets::CALL,
                "Stream {} ended after {} item(s)",
                self.path,
                self.received
            ),
        }
        item
    }

    /// Cancel this stream only. The next pull yields `Cancelled`.
    pub fn cancel(&self) {
        self.scope.token.cancel();
    }

    /// Number of items delivered so far.
    pub fn received(&self) -> usize {
        self.received
    }

    /// True once the terminal item has been delivered.
    pub fn is_finished(&self) -> bool {
        matches!(self.state, StreamState::Finished)
    }

    /// The method path this stream was opened on.
    pub fn path(&self) -> &PathAndQuery {
        &self.path
    }

    /// Adapt into a [`Stream`] of the same items.
    pub fn into_stream(self) -> impl Stream<Item = std::result::Result<T, Status>> + Send
    where
        T: Send + 'static,
    {
        futures_util::stream::unfold(self, |mut handle| async move {
            handle.next().await.map(|item| (item, handle))
        })
    }

    fn finish(&mut self) {
        self.state = StreamState::Finished;
        self.scope.release();
    }
}

impl<T> std::fmt::Debug for StreamHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state {
            StreamState::Open(_) => "open",
            StreamState::Failed(_) => "failed",
            StreamState::Finished => "finished",
        };
        f.debug_struct("StreamHandle")
            .field("path", &self.path.as_str())
            .field("state", &state)
            .field("received", &self.received)
            .finish()
    }
}
