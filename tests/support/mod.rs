//! Shared test harness: a stub language server speaking gRPC over HTTP/2
//! and a canned host inspector, wired into the real router.
#![allow(dead_code)]

use std::convert::Infallible;
use std::path::Path;
use std::pin::Pin;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Request, Response};
use http_body_util::BodyExt;
use hyper::body::{Body, Frame, Incoming};
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};

use windsurf_bridge::cascade::CascadeClient;
use windsurf_bridge::config::AppConfig;
use windsurf_bridge::credentials::{CredentialResolver, HostInspector, LanguageServer};
use windsurf_bridge::server::build_router;
use windsurf_bridge::wire;
use windsurf_bridge::AppState;

/// Response body that emits one data frame followed by gRPC trailers.
pub struct GrpcBody {
    data: Option<Bytes>,
    trailers: Option<HeaderMap>,
}

impl GrpcBody {
    pub fn new(data: Vec<u8>, status: i32, message: &str) -> Self {
        let mut trailers = HeaderMap::new();
        trailers.insert(
            "grpc-status",
            HeaderValue::from_str(&status.to_string()).unwrap(),
        );
        if !message.is_empty() {
            trailers.insert("grpc-message", HeaderValue::from_str(message).unwrap());
        }
        Self {
            data: (!data.is_empty()).then(|| Bytes::from(data)),
            trailers: Some(trailers),
        }
    }
}

impl Body for GrpcBody {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, Infallible>>> {
        if let Some(data) = self.data.take() {
            return Poll::Ready(Some(Ok(Frame::data(data))));
        }
        if let Some(trailers) = self.trailers.take() {
            return Poll::Ready(Some(Ok(Frame::trailers(trailers))));
        }
        Poll::Ready(None)
    }
}

fn grpc_response(data: Vec<u8>, status: i32, message: &str) -> Response<GrpcBody> {
    Response::builder()
        .header("content-type", "application/grpc")
        .body(GrpcBody::new(data, status, message))
        .unwrap()
}

/// Scripted language server.
pub struct StubVendor {
    /// Planner text returned once the trajectory is ready.
    pub reply: String,
    /// Poll number (1-based) at which the planner text appears.
    pub ready_at_poll: u32,
    /// gRPC status StartCascade answers with.
    pub start_status: AtomicI32,
    pub polls: AtomicU32,
}

impl StubVendor {
    async fn handle(&self, request: Request<Incoming>) -> Response<GrpcBody> {
        let path = request.uri().path().to_string();
        if request.headers().get("x-codeium-csrf-token").is_none() {
            return grpc_response(Vec::new(), 16, "missing csrf token");
        }

        let body = request.into_body().collect().await.unwrap().to_bytes();
        let payloads = wire::unframe(&body);

        match path.as_str() {
            "/exa.language_server_pb.LanguageServerService/StartCascade" => {
                let status = self.start_status.load(Ordering::SeqCst);
                if status != 0 {
                    return grpc_response(Vec::new(), status, "start%20rejected");
                }
                let mut payload = Vec::new();
                wire::put_str_field(&mut payload, 1, "c1");
                grpc_response(wire::frame(&payload), 0, "")
            }
            "/exa.language_server_pb.LanguageServerService/SendUserCascadeMessage" => {
                // The real server crashes the RPC without a cascade config.
                let has_config = payloads
                    .first()
                    .and_then(|p| wire::first_bytes(p, 5))
                    .is_some();
                if !has_config {
                    return grpc_response(Vec::new(), 13, "cascade config missing");
                }
                grpc_response(wire::frame(&[]), 0, "")
            }
            "/exa.language_server_pb.LanguageServerService/GetCascadeTrajectorySteps" => {
                let poll = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
                if poll < self.ready_at_poll {
                    return grpc_response(wire::frame(&[]), 0, "");
                }
                let mut planner = Vec::new();
                wire::put_str_field(&mut planner, 1, &self.reply);
                let mut step = Vec::new();
                wire::put_bytes_field(&mut step, 20, &planner);
                let mut response = Vec::new();
                wire::put_bytes_field(&mut response, 1, &step);
                grpc_response(wire::frame(&response), 0, "")
            }
            _ => grpc_response(Vec::new(), 12, "unimplemented"),
        }
    }
}

/// Spawn the stub on an ephemeral loopback port.
pub async fn spawn_stub(reply: &str, ready_at_poll: u32) -> (u16, Arc<StubVendor>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let stub = Arc::new(StubVendor {
        reply: reply.to_string(),
        ready_at_poll,
        start_status: AtomicI32::new(0),
        polls: AtomicU32::new(0),
    });

    let accept_stub = Arc::clone(&stub);
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let stub = Arc::clone(&accept_stub);
            tokio::spawn(async move {
                let service = service_fn(move |request| {
                    let stub = Arc::clone(&stub);
                    async move { Ok::<_, Infallible>(stub.handle(request).await) }
                });
                let _ = hyper::server::conn::http2::Builder::new(TokioExecutor::new())
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });

    (port, stub)
}

/// Inspector returning a canned language server bound to the stub's port.
pub struct FakeInspector {
    pub servers: Vec<LanguageServer>,
    pub grpc_port: u16,
}

impl FakeInspector {
    pub fn with_port(grpc_port: u16) -> Self {
        Self {
            servers: vec![LanguageServer {
                pid: 4242,
                csrf_token: Some("test-csrf".to_string()),
                extension_server_port: Some(1),
                version: Some("1.36.2".to_string()),
            }],
            grpc_port,
        }
    }

    pub fn not_running() -> Self {
        Self {
            servers: Vec::new(),
            grpc_port: 0,
        }
    }
}

impl HostInspector for FakeInspector {
    fn enumerate_language_servers(&self) -> Vec<LanguageServer> {
        self.servers.clone()
    }

    fn listening_ports_for(&self, _pid: u32) -> Vec<u16> {
        vec![self.grpc_port]
    }

    fn read_auth_db(&self, _path: &Path) -> Option<String> {
        Some("test-api-key".to_string())
    }
}

/// Spawn the bridge with a custom inspector; returns its base URL.
pub async fn spawn_app(inspector: FakeInspector) -> String {
    let mut config = AppConfig::default();
    config.cascade.poll_interval_ms = 10;
    config.cascade.poll_attempts = 20;
    config.cascade.rpc_timeout_secs = 5;

    let resolver = Arc::new(CredentialResolver::with_inspector(
        Arc::new(inspector),
        Duration::from_secs(60),
    ));
    let cascade = Arc::new(CascadeClient::new(resolver, config.cascade.clone()));
    let state = AppState {
        config: Arc::new(config),
        cascade,
    };
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://127.0.0.1:{port}")
}

/// Parse `data:` payloads out of an SSE body.
pub fn sse_data_lines(body: &str) -> Vec<String> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .map(str::to_string)
        .collect()
}
