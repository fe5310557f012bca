//! Channel management.
//!
//! A [`Channel`] is one verified, encrypted HTTP/2 connection to a single
//! `host:port`. It is cheap to clone and safe to share between tasks; the
//! underlying tonic channel multiplexes concurrent calls.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use http::Uri;
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use rustls_pki_types::ServerName;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Endpoint;

use super::details::DetailRegistry;
use super::status::StatusDecoder;
use super::transport::{TonicTransport, Transport};
use crate::error::{BridgeError, ConnectError, Result};
use crate::sink::{LogSink, TracingSink};
use crate::targets;
use crate::tls::TransportCredentials;

/// Default limit on establishing the first connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

/// Everything needed to open a [`Channel`].
///
/// ```ignore
/// let config = ChannelConfig::new("localhost:10000", credentials)
///     .server_name("x.test.example.com")
///     .connect_timeout(Duration::from_secs(5))
///     .sink(document_sink.clone());
/// let channel = Channel::open(config).await?;
/// ```
#[derive(Clone)]
pub struct ChannelConfig {
    target: String,
    credentials: TransportCredentials,
    server_name: Option<String>,
    connect_timeout: Duration,
    keep_alive_interval: Option<Duration>,
    keep_alive_timeout: Option<Duration>,
    keep_alive_while_idle: bool,
    user_agent: Option<String>,
    sink: Arc<dyn LogSink>,
    registry: DetailRegistry,
}

impl ChannelConfig {
    /// Create a configuration for `target` (`host:port`).
    pub fn new(target: impl Into<String>, credentials: TransportCredentials) -> Self {
        Self {
            target: target.into(),
            credentials,
            server_name: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            keep_alive_interval: None,
            keep_alive_timeout: None,
            keep_alive_while_idle: false,
            user_agent: None,
            sink: Arc::new(TracingSink),
            registry: DetailRegistry::default(),
        }
    }

    /// Verify the peer certificate against `name` instead of the target host.
    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    /// Set the limit on resolving, connecting and the TLS handshake together.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the HTTP/2 keep-alive PING interval.
    pub fn keep_alive_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = Some(interval);
        self
    }

    /// Set how long to wait for a keep-alive PING to be acknowledged.
    pub fn keep_alive_timeout(mut self, timeout: Duration) -> Self {
        self.keep_alive_timeout = Some(timeout);
        self
    }

    /// Send keep-alive PINGs even when no call is active.
    pub fn keep_alive_while_idle(mut self, enable: bool) -> Self {
        self.keep_alive_while_idle = enable;
        self
    }

    /// Set the user agent string.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Send channel diagnostics to `sink`. Defaults to [`TracingSink`].
    pub fn sink(mut self, sink: impl LogSink + 'static) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    /// Decode status details with `registry`.
    pub fn detail_registry(mut self, registry: DetailRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// The `host:port` to dial.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// The name the peer certificate is verified against, if overridden.
    pub fn server_name_override(&self) -> Option<&str> {
        self.server_name.as_deref()
    }
}

impl fmt::Debug for ChannelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelConfig")
            .field("target", &self.target)
            .field("credentials", &self.credentials)
            .field("server_name", &self.server_name)
            .field("connect_timeout", &self.connect_timeout)
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

/// Split `host:port`, accepting bracketed IPv6 hosts.
fn split_target(target: &str) -> Result<(String, u16)> {
    let invalid = |reason: &str| {
        BridgeError::Configuration(format!("Invalid target '{}': {}", target, reason))
    };

    let (host, port) = target
        .rsplit_once(':')
        .ok_or_else(|| invalid("expected host:port"))?;
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    if host.is_empty() {
        return Err(invalid("empty host"));
    }
    if host.contains(':') && !target.starts_with('[') {
        return Err(invalid("IPv6 hosts must be bracketed"));
    }
    let port = port.parse::<u16>().map_err(|_| invalid("bad port"))?;
    Ok((host.to_string(), port))
}

/// Opens verified TLS connections to one target.
#[derive(Clone)]
struct Dialer {
    host: String,
    port: u16,
    server_name: ServerName<'static>,
    connector: TlsConnector,
    connect_timeout: Duration,
}

impl Dialer {
    fn new(config: &ChannelConfig) -> Result<Self> {
        let (host, port) = split_target(&config.target)?;
        let name = config.server_name.clone().unwrap_or_else(|| host.clone());
        let server_name = ServerName::try_from(name.clone()).map_err(|e| {
            BridgeError::Configuration(format!("Invalid server name '{}': {}", name, e))
        })?;

        Ok(Self {
            host,
            port,
            server_name,
            connector: TlsConnector::from(config.credentials.client_config()),
            connect_timeout: config.connect_timeout,
        })
    }

    async fn dial(&self) -> std::result::Result<TlsStream<TcpStream>, ConnectError> {
        timeout(self.connect_timeout, self.establish())
            .await
            .map_err(|_| ConnectError::Timeout(self.connect_timeout))?
    }

    async fn establish(&self) -> std::result::Result<TlsStream<TcpStream>, ConnectError> {
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((self.host.as_str(), self.port))
            .await
            .map_err(ConnectError::Resolve)?
            .collect();
        if addrs.is_empty() {
            return Err(ConnectError::Resolve(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no addresses for {}", self.host),
            )));
        }

        let mut last_error = None;
        let mut tcp = None;
        for addr in addrs {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    tcp = Some(stream);
                    break;
                }
                Err(e) => {
                    tracing::debug!(target: targets::CHANNEL, "Connect to {} failed: {}", addr, e);
                    last_error = Some(e);
                }
            }
        }
        let tcp = tcp.ok_or_else(|| {
            ConnectError::Tcp(last_error.unwrap_or_else(|| {
                io::Error::new(io::ErrorKind::NotConnected, "no address accepted")
            }))
        })?;
        if let Err(e) = tcp.set_nodelay(true) {
            tracing::debug!(target: targets::CHANNEL, "Failed to set TCP_NODELAY: {}", e);
        }

        self.connector
            .connect(self.server_name.clone(), tcp)
            .await
            .map_err(ConnectError::Handshake)
    }
}

struct ChannelInner {
    target: String,
    transport: Arc<dyn Transport>,
    shutdown: CancellationToken,
    in_flight: Arc<AtomicUsize>,
    decoder: StatusDecoder,
    sink: Arc<dyn LogSink>,
}

/// A connection to one remote endpoint, shared by every call made on it.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

impl Channel {
    /// Establish a verified connection.
    ///
    /// Resolution, TCP connect and the TLS handshake all happen before this
    /// returns, so a bad certificate or an unreachable host is reported here
    /// rather than on the first call. Nothing is retried.
    pub async fn open(config: ChannelConfig) -> Result<Self> {
        let dialer = Dialer::new(&config)?;
        let target = config.target.clone();
        let connection_error = |source: ConnectError| {
            let err = BridgeError::Connection {
                target: target.clone(),
                source,
            };
            config.sink.emit(&err.to_string());
            err
        };

        let stream = dialer.dial().await.map_err(&connection_error)?;
        tracing::debug!(
            target: targets::CHANNEL,
            "TLS session established with {}",
            config.target
        );

        let endpoint = build_endpoint(&config)?;

        // The verified stream serves the first connection; reconnects dial anew.
        let primed = Arc::new(Mutex::new(Some(stream)));
        let connector = tower::service_fn(move |_: Uri| {
            let dialer = dialer.clone();
            let primed = primed.clone();
            async move {
                let reused = primed.lock().take();
                let stream = match reused {
                    Some(stream) => stream,
                    None => dialer.dial().await?,
                };
                Ok::<_, ConnectError>(TokioIo::new(stream))
            }
        });

        let channel = endpoint
            .connect_with_connector(connector)
            .await
            .map_err(|e| connection_error(ConnectError::Transport(e)))?;

        tracing::info!(target: targets::CHANNEL, "Channel open to {}", config.target);

        Ok(Self::build(
            config.target,
            Arc::new(TonicTransport::new(channel)),
            config.sink,
            StatusDecoder::new(config.registry),
        ))
    }

    /// Build a channel over any [`Transport`].
    pub fn from_transport(
        target: impl Into<String>,
        transport: impl Transport,
        sink: impl LogSink + 'static,
    ) -> Self {
        Self::build(
            target.into(),
            Arc::new(transport),
            Arc::new(sink),
            StatusDecoder::default(),
        )
    }

    /// Like [`from_transport`](Self::from_transport) with a custom detail registry.
    pub fn from_transport_with_registry(
        target: impl Into<String>,
        transport: impl Transport,
        sink: impl LogSink + 'static,
        registry: DetailRegistry,
    ) -> Self {
        Self::build(
            target.into(),
            Arc::new(transport),
            Arc::new(sink),
            StatusDecoder::new(registry),
        )
    }

    fn build(
        target: String,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn LogSink>,
        decoder: StatusDecoder,
    ) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                target,
                transport,
                shutdown: CancellationToken::new(),
                in_flight: Arc::new(AtomicUsize::new(0)),
                decoder,
                sink,
            }),
        }
    }

    /// The `host:port` this channel is connected to.
    pub fn target(&self) -> &str {
        &self.inner.target
    }

    /// Number of calls and open streams currently using the channel.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    /// Returns true once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Tear the channel down.
    ///
    /// In-flight calls and open streams fail with `Cancelled`, as does every
    /// later call. Closing twice is a no-op.
    pub fn close(&self) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        self.inner.shutdown.cancel();
        self.inner.transport.close();
        tracing::info!(
            target: targets::CHANNEL,
            "Channel to {} closed with {} call(s) in flight",
            self.inner.target,
            self.in_flight()
        );
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    pub(crate) fn shutdown_token(&self) -> &CancellationToken {
        &self.inner.shutdown
    }

    pub(crate) fn in_flight_counter(&self) -> &Arc<AtomicUsize> {
        &self.inner.in_flight
    }

    pub(crate) fn status_decoder(&self) -> &StatusDecoder {
        &self.inner.decoder
    }

    /// Where this channel reports failures no call returns, such as a
    /// failed open.
    pub fn sink(&self) -> &Arc<dyn LogSink> {
        &self.inner.sink
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("target", &self.inner.target)
            .field("closed", &self.is_closed())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

fn build_endpoint(config: &ChannelConfig) -> Result<Endpoint> {
    // TLS is already terminated by the connector, so the URI stays plain.
    let mut endpoint = Endpoint::from_shared(format!("http://{}", config.target)).map_err(|e| {
        BridgeError::Configuration(format!("Invalid target '{}': {}", config.target, e))
    })?;

    if let Some(interval) = config.keep_alive_interval {
        endpoint = endpoint.http2_keep_alive_interval(interval);
    }
    if let Some(timeout) = config.keep_alive_timeout {
        endpoint = endpoint.keep_alive_timeout(timeout);
    }
    if config.keep_alive_while_idle {
        endpoint = endpoint.keep_alive_while_idle(true);
    }
    if let Some(user_agent) = &config.user_agent {
        endpoint = endpoint.user_agent(user_agent.as_str()).map_err(|e| {
            BridgeError::Configuration(format!("Invalid user agent '{}': {}", user_agent, e))
        })?;
    }

    Ok(endpoint)
}
