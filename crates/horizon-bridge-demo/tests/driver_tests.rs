//! Tests for the demo driver against a scripted backend.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use horizon_bridge::grpc::{
    Channel, ChannelConfig, ErrorDetail, MockTransport, MockTransportBuilder, ResourceInfo, Status,
};
use horizon_bridge::sink::{BufferSink, DocumentSink, NullSink};
use horizon_bridge::tls::{TransportCredentials, TrustAnchor};
use horizon_bridge_demo::proto::{
    self, GetServersRequest, GetServersResponse, GetUserRequest, GetUsersRequest, Server,
    ServerRef, User,
};
use horizon_bridge_demo::{DemoConfig, DemoError, Driver, FINISHED, RunSummary};

fn users_backend() -> MockTransportBuilder {
    MockTransport::builder()
        .unary(proto::GET_USER, |req: GetUserRequest| {
            if req.user_id == "1234" {
                Ok(User { id: req.user_id })
            } else {
                Err(
                    Status::not_found(format!("user {} does not exist", req.user_id)).with_detail(
                        ErrorDetail::ResourceInfo(ResourceInfo {
                            resource_type: "user".into(),
                            resource_name: req.user_id,
                            owner: String::new(),
                            description: "try 1234".into(),
                        }),
                    ),
                )
            }
        })
        .server_streaming(proto::GET_USERS, |req: GetUsersRequest| {
            Ok((0..req.num_users)
                .map(|i| {
                    Ok(User {
                        id: format!("user-{}", i),
                    })
                })
                .collect())
        })
}

async fn run_against(transport: MockTransport) -> (Vec<String>, RunSummary) {
    let sink = BufferSink::new();
    let driver = Driver::new(Arc::new(sink.clone()));
    let channel = Channel::from_transport("mock:10000", transport, NullSink);
    let summary = driver.run(&channel).await.unwrap();
    (sink.entries(), summary)
}

#[tokio::test]
async fn test_sequence_order_without_channelz() {
    let (lines, summary) = run_against(users_backend().build()).await;

    assert_eq!(lines.len(), 7, "{lines:#?}");
    assert!(lines[0].starts_with("Unimplemented"), "{}", lines[0]);
    assert_eq!(lines[1], format!("{:?}", User { id: "1234".into() }));
    assert!(lines[2].starts_with("NotFound: user 123 does not exist"));
    assert!(lines[2].contains("ResourceInfo{type: user, name: 123"));
    assert_eq!(lines[3], format!("{:?}", User { id: "user-0".into() }));
    assert_eq!(lines[5], format!("{:?}", User { id: "user-2".into() }));
    assert_eq!(lines[6], FINISHED);

    assert!(summary.connected);
    assert_eq!(summary.calls, 4);
    assert_eq!(summary.failures, 2);
    assert_eq!(summary.streamed, 3);
}

#[tokio::test]
async fn test_channelz_servers_are_rendered() {
    let transport = users_backend()
        .unary(proto::GET_SERVERS, |_: GetServersRequest| {
            Ok(GetServersResponse {
                server: vec![Server {
                    r#ref: Some(ServerRef {
                        server_id: 1,
                        name: "backend".into(),
                    }),
                    data: None,
                }],
                end: true,
            })
        })
        .build();

    let (lines, summary) = run_against(transport).await;
    assert!(lines[0].contains("backend"), "{}", lines[0]);
    assert_eq!(summary.failures, 1);
}

#[tokio::test]
async fn test_stream_failure_is_rendered_then_finished() {
    let transport = users_backend()
        .server_streaming(proto::GET_USERS, |_: GetUsersRequest| {
            Ok(vec![
                Ok(User { id: "only".into() }),
                Err(Status::unavailable("backend restarting")),
            ])
        })
        .build();

    let (lines, summary) = run_against(transport).await;
    assert_eq!(lines[3], format!("{:?}", User { id: "only".into() }));
    assert_eq!(lines[4], "Unavailable: backend restarting");
    assert_eq!(lines[5], FINISHED);
    assert_eq!(summary.streamed, 1);
}

#[tokio::test]
async fn test_unavailable_is_rendered_once() {
    let transport = MockTransport::builder()
        .unary(proto::GET_USER, |_: GetUserRequest| {
            Err::<User, _>(Status::unavailable("backend restarting"))
        })
        .build();
    let sink = BufferSink::new();
    let driver = Driver::new(Arc::new(sink.clone()));
    // The channel reports to the same sink, as in `connect_and_run`.
    let channel = Channel::from_transport("mock:10000", transport, sink.clone());
    driver.run(&channel).await.unwrap();

    let unavailable = sink
        .entries()
        .iter()
        .filter(|l| l.starts_with("Unavailable"))
        .count();
    assert_eq!(unavailable, 2);
}

#[tokio::test]
async fn test_call_deadline_from_config() {
    let transport = users_backend().latency(Duration::from_millis(200)).build();
    let config = DemoConfig {
        call_timeout_ms: Some(20),
        ..DemoConfig::default()
    };

    let sink = BufferSink::new();
    let driver = Driver::from_config(Arc::new(sink.clone()), &config);
    let channel = Channel::from_transport("mock:10000", transport, NullSink);
    driver.run(&channel).await.unwrap();

    // Unknown methods are rejected before the simulated latency.
    let lines = sink.entries();
    assert!(lines[0].starts_with("Unimplemented"));
    assert!(lines[1..4].iter().all(|l| l.starts_with("DeadlineExceeded")), "{lines:#?}");
    assert_eq!(lines.last().map(String::as_str), Some(FINISHED));
}

#[tokio::test]
async fn test_connection_failure_stops_the_run() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let anchor = TrustAnchor::from_pem(horizon_bridge_demo::config::EMBEDDED_SERVER_PEM).unwrap();
    let credentials = TransportCredentials::from_trust_anchor(&anchor).unwrap();
    let document = DocumentSink::new("target");
    let driver = Driver::new(Arc::new(document.clone()));

    let summary = driver
        .connect_and_run(ChannelConfig::new(format!("127.0.0.1:{}", port), credentials))
        .await
        .unwrap();

    assert!(!summary.connected);
    assert_eq!(summary.calls, 0);
    let blocks = document.document().blocks().to_vec();
    assert_eq!(blocks.len(), 1);
    assert!(blocks[0].contains("failed to connect"));
    assert!(!blocks.iter().any(|b| b == FINISHED));
}

#[tokio::test]
async fn test_bad_target_is_rendered_and_returned() {
    let config = DemoConfig {
        target: "no-port-here".into(),
        ..DemoConfig::default()
    };
    let sink = BufferSink::new();
    let driver = Driver::from_config(Arc::new(sink.clone()), &config);

    let err = driver.run_configured(&config).await.unwrap_err();
    assert!(matches!(err, DemoError::Bridge(ref e) if e.is_configuration()));
    let lines = sink.entries();
    assert_eq!(lines.len(), 1, "{lines:#?}");
    assert!(lines[0].contains("no-port-here"));
    assert!(!lines.iter().any(|l| l == FINISHED));
}

#[tokio::test]
async fn test_missing_trust_bundle_is_rendered() {
    let dir = tempfile::tempdir().unwrap();
    let config = DemoConfig {
        trust_bundle: Some(dir.path().join("absent.pem")),
        ..DemoConfig::default()
    };
    let sink = BufferSink::new();
    let driver = Driver::from_config(Arc::new(sink.clone()), &config);

    let err = driver.run_configured(&config).await.unwrap_err();
    assert!(matches!(err, DemoError::Io { .. }));
    assert_eq!(sink.len(), 1);
    assert!(sink.entries()[0].contains("absent.pem"));
}

#[test]
fn test_config_file_round_trip() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "target = \"backend.test:8443\"").unwrap();
    writeln!(file, "server_name = \"x.test.example.com\"").unwrap();
    writeln!(file, "stream_count = 5").unwrap();

    let config = DemoConfig::load(Some(file.path())).unwrap();
    assert_eq!(config.target, "backend.test:8443");
    assert_eq!(config.server_name.as_deref(), Some("x.test.example.com"));
    assert_eq!(config.stream_count, 5);

    let channel = config.channel_config().unwrap();
    assert_eq!(channel.server_name_override(), Some("x.test.example.com"));
}

#[test]
fn test_missing_config_file_gives_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = DemoConfig::load(Some(&dir.path().join("absent.toml"))).unwrap();
    assert_eq!(config, DemoConfig::default());
}

#[test]
fn test_malformed_config_file_is_reported() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "stream_count = \"three\"").unwrap();

    let err = DemoConfig::load(Some(file.path())).unwrap_err();
    assert!(matches!(err, DemoError::Config { .. }));
}

#[test]
fn test_trust_bundle_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(horizon_bridge_demo::config::EMBEDDED_SERVER_PEM.as_bytes())
        .unwrap();

    let config = DemoConfig {
        trust_bundle: Some(file.path().to_path_buf()),
        ..DemoConfig::default()
    };
    assert_eq!(config.trust_anchor().unwrap().len(), 1);
}
