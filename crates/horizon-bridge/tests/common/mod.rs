// Each integration test binary includes this module via `mod common;` and
// uses a different subset of it.
#![allow(dead_code)]
//! Shared TLS peers for the channel tests.

use std::convert::Infallible;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::StreamExt;
use futures_util::future::BoxFuture;
use futures_util::stream::{self, BoxStream};
use horizon_bridge::grpc::{ErrorDetail, ResourceInfo, Status};
use horizon_bridge::tls::{TransportCredentials, TrustAnchor};
use rustls_pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tonic::codec::ProstCodec;
use tonic::server::{Grpc, NamedService};
use tonic::transport::server::Connected;

/// A server certificate and its key.
pub struct Identity {
    pub cert_pem: String,
    cert_der: CertificateDer<'static>,
    key_der: Vec<u8>,
}

impl Identity {
    /// Self-signed leaf certificate for `names`.
    pub fn leaf(names: &[&str]) -> Self {
        let certified = rcgen::generate_simple_self_signed(
            names.iter().map(|n| n.to_string()).collect::<Vec<_>>(),
        )
        .unwrap();
        Self {
            cert_pem: certified.cert.pem(),
            cert_der: certified.cert.der().clone(),
            key_der: certified.key_pair.serialize_der(),
        }
    }

    /// Self-signed certificate for `names` that is also marked as a CA.
    pub fn ca(names: &[&str]) -> Self {
        let mut params =
            rcgen::CertificateParams::new(names.iter().map(|n| n.to_string()).collect::<Vec<_>>())
                .unwrap();
        params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        let key = rcgen::KeyPair::generate().unwrap();
        let cert = params.self_signed(&key).unwrap();
        Self {
            cert_pem: cert.pem(),
            cert_der: cert.der().clone(),
            key_der: key.serialize_der(),
        }
    }

    /// Credentials trusting exactly this certificate.
    pub fn credentials(&self) -> TransportCredentials {
        credentials(&self.cert_pem)
    }

    fn acceptor(&self) -> TlsAcceptor {
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.key_der.clone()));
        let mut config = rustls::ServerConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(vec![self.cert_der.clone()], key)
        .unwrap();
        config.alpn_protocols = vec![b"h2".to_vec()];
        TlsAcceptor::from(Arc::new(config))
    }
}

pub fn credentials(pem: &str) -> TransportCredentials {
    let anchor = TrustAnchor::from_pem(pem).unwrap();
    TransportCredentials::from_trust_anchor(&anchor).unwrap()
}

/// Serve TLS on an ephemeral port; after the handshake the connection is
/// held open and never answered. Returns the port.
pub async fn spawn_silent_peer(identity: &Identity) -> u16 {
    let acceptor = identity.acceptor();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        loop {
            let Ok((tcp, _)) = listener.accept().await else {
                return;
            };
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                if let Ok(mut tls) = acceptor.accept(tcp).await {
                    let mut buf = vec![0u8; 4096];
                    while matches!(tls.read(&mut buf).await, Ok(n) if n > 0) {}
                }
            });
        }
    });

    port
}

// -- web.Backend messages --

#[derive(Clone, PartialEq, prost::Message)]
pub struct User {
    #[prost(string, tag = "1")]
    pub id: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct GetUserRequest {
    #[prost(string, tag = "1")]
    pub user_id: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct GetUsersRequest {
    #[prost(int64, tag = "1")]
    pub num_users: i64,
}

pub const GET_USER: &str = "/web.Backend/GetUser";
pub const GET_USERS: &str = "/web.Backend/GetUsers";
/// Sends the requested users, then holds the stream open.
pub const WATCH_USERS: &str = "/web.Backend/WatchUsers";

pub const KNOWN_USER: &str = "1234";

/// A running `web.Backend` gRPC server.
pub struct Backend {
    pub port: u16,
    open_streams: Arc<AtomicUsize>,
}

impl Backend {
    /// Server-side response streams not yet dropped.
    pub fn open_streams(&self) -> usize {
        self.open_streams.load(Ordering::SeqCst)
    }

    /// Wait up to `limit` for every response stream to be dropped.
    pub async fn wait_streams_released(&self, limit: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + limit;
        while self.open_streams() > 0 {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        true
    }
}

/// Serve `web.Backend` over TLS with `identity`.
pub async fn spawn_backend(identity: &Identity) -> Backend {
    let acceptor = identity.acceptor();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let service = BackendService::default();
    let open_streams = service.open_streams.clone();

    let incoming = stream::unfold((listener, acceptor), |(listener, acceptor)| async move {
        let accepted = match listener.accept().await {
            Ok((tcp, _)) => acceptor.accept(tcp).await.map(ServerIo),
            Err(e) => Err(e),
        };
        Some((accepted, (listener, acceptor)))
    });

    tokio::spawn(async move {
        let _ = tonic::transport::Server::builder()
            .add_service(service)
            .serve_with_incoming(incoming)
            .await;
    });

    Backend { port, open_streams }
}

/// Accepted TLS connection handed to tonic.
struct ServerIo(tokio_rustls::server::TlsStream<TcpStream>);

impl Connected for ServerIo {
    type ConnectInfo = ();

    fn connect_info(&self) -> Self::ConnectInfo {}
}

impl AsyncRead for ServerIo {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.0).poll_read(cx, buf)
    }
}

impl AsyncWrite for ServerIo {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.0).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.0).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.0).poll_shutdown(cx)
    }
}

type UserStream = BoxStream<'static, Result<User, tonic::Status>>;

#[derive(Clone, Default)]
struct BackendService {
    open_streams: Arc<AtomicUsize>,
}

impl NamedService for BackendService {
    const NAME: &'static str = "web.Backend";
}

impl<B> tower::Service<http::Request<B>> for BackendService
where
    B: tonic::codegen::Body + Send + 'static,
    B::Error: Into<tonic::codegen::StdError> + Send + 'static,
{
    type Response = http::Response<tonic::body::Body>;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Self::Response, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: http::Request<B>) -> Self::Future {
        let open_streams = self.open_streams.clone();
        match request.uri().path() {
            GET_USER => Box::pin(async move {
                let mut grpc = Grpc::new(ProstCodec::<User, GetUserRequest>::default());
                Ok(grpc.unary(tower::service_fn(get_user), request).await)
            }),
            GET_USERS => Box::pin(async move {
                let mut grpc = Grpc::new(ProstCodec::<User, GetUsersRequest>::default());
                Ok(grpc
                    .server_streaming(tower::service_fn(get_users), request)
                    .await)
            }),
            WATCH_USERS => Box::pin(async move {
                let mut grpc = Grpc::new(ProstCodec::<User, GetUsersRequest>::default());
                let watch = tower::service_fn(move |r| watch_users(r, open_streams.clone()));
                Ok(grpc.server_streaming(watch, request).await)
            }),
            _ => Box::pin(async move {
                let mut grpc = Grpc::new(ProstCodec::<User, GetUserRequest>::default());
                let reject = tower::service_fn(|_: tonic::Request<GetUserRequest>| async {
                    Err::<tonic::Response<User>, _>(tonic::Status::unimplemented("unknown method"))
                });
                Ok(grpc.unary(reject, request).await)
            }),
        }
    }
}

async fn get_user(
    request: tonic::Request<GetUserRequest>,
) -> Result<tonic::Response<User>, tonic::Status> {
    let user_id = request.into_inner().user_id;
    if user_id == KNOWN_USER {
        return Ok(tonic::Response::new(User { id: user_id }));
    }
    let status = Status::not_found(format!("user {} does not exist", user_id)).with_detail(
        ErrorDetail::ResourceInfo(ResourceInfo {
            resource_type: "user".into(),
            resource_name: user_id,
            owner: String::new(),
            description: String::new(),
        }),
    );
    Err(status.into())
}

fn numbered_users(count: i64) -> impl Iterator<Item = Result<User, tonic::Status>> {
    (0..count).map(|i| {
        Ok(User {
            id: format!("user-{}", i),
        })
    })
}

async fn get_users(
    request: tonic::Request<GetUsersRequest>,
) -> Result<tonic::Response<UserStream>, tonic::Status> {
    let count = request.into_inner().num_users;
    Ok(tonic::Response::new(stream::iter(numbered_users(count)).boxed()))
}

struct OpenStream(Arc<AtomicUsize>);

impl Drop for OpenStream {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn watch_users(
    request: tonic::Request<GetUsersRequest>,
    open_streams: Arc<AtomicUsize>,
) -> Result<tonic::Response<UserStream>, tonic::Status> {
    let count = request.into_inner().num_users;
    open_streams.fetch_add(1, Ordering::SeqCst);
    let guard = OpenStream(open_streams);
    let users = stream::iter(numbered_users(count))
        .chain(stream::pending())
        .map(move |item| {
            let _held = &guard;
            item
        });
    Ok(tonic::Response::new(users.boxed()))
}
