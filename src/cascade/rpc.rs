//! Unary gRPC calls over cleartext HTTP/2.
//!
//! The language server speaks standard gRPC framing but bends the unary
//! contract: a single poll response body can carry several concatenated
//! frames, and poll responses are sometimes gzip-compressed. The transport
//! therefore reads the raw body and leaves framing to [`crate::wire`],
//! taking only the status from the `grpc-status`/`grpc-message` trailers
//! (or headers, for trailers-only responses).

use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper_util::rt::{TokioExecutor, TokioIo};

use crate::error::{BridgeError, BridgeResult};
use crate::wire;

/// Raw outcome of one unary call.
#[derive(Debug)]
pub struct UnaryResponse {
    pub status: i32,
    pub message: String,
    pub body: Vec<u8>,
}

impl UnaryResponse {
    /// Frame payloads on OK status, the tagged stream error otherwise.
    pub fn frames(self) -> BridgeResult<Vec<Vec<u8>>> {
        if self.status != 0 {
            return Err(BridgeError::StreamError {
                status: self.status,
                message: self.message,
            });
        }
        Ok(wire::unframe(&self.body))
    }
}

/// Issue one unary gRPC POST. One HTTP/2 connection per call; connection
/// setup cost is dwarfed by inference latency.
pub async fn unary(
    port: u16,
    path: &str,
    csrf_token: &str,
    payload: &[u8],
    timeout: Duration,
) -> BridgeResult<UnaryResponse> {
    tokio::time::timeout(timeout, unary_inner(port, path, csrf_token, payload))
        .await
        .map_err(|_| BridgeError::stream(4, format!("{path} deadline exceeded")))?
}

async fn unary_inner(
    port: u16,
    path: &str,
    csrf_token: &str,
    payload: &[u8],
) -> BridgeResult<UnaryResponse> {
    let addr = format!("127.0.0.1:{port}");
    let stream = tokio::net::TcpStream::connect(&addr)
        .await
        .map_err(|e| BridgeError::ConnectionFailed(format!("{addr}: {e}")))?;

    let (mut sender, connection) =
        hyper::client::conn::http2::handshake(TokioExecutor::new(), TokioIo::new(stream))
            .await
            .map_err(|e| BridgeError::ConnectionFailed(e.to_string()))?;
    tokio::spawn(async move {
        if let Err(error) = connection.await {
            tracing::debug!(%error, "http/2 connection closed");
        }
    });

    let request = http::Request::builder()
        .method(http::Method::POST)
        .uri(format!("http://{addr}{path}"))
        .header(http::header::CONTENT_TYPE, "application/grpc")
        .header("te", "trailers")
        .header("grpc-accept-encoding", "identity,gzip")
        .header("x-codeium-csrf-token", csrf_token)
        .body(Full::new(Bytes::copy_from_slice(&wire::frame(payload))))?;

    let response = sender
        .send_request(request)
        .await
        .map_err(|e| BridgeError::ConnectionFailed(e.to_string()))?;
    let headers = response.headers().clone();

    let collected = response
        .into_body()
        .collect()
        .await
        .map_err(|e| BridgeError::ConnectionFailed(e.to_string()))?;
    let trailers = collected.trailers().cloned();
    let body = collected.to_bytes().to_vec();

    let header = |name: &str| {
        trailers
            .as_ref()
            .and_then(|t| t.get(name))
            .or_else(|| headers.get(name))
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    let status = header("grpc-status")
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);
    let message = header("grpc-message")
        .map(|m| percent_decode(&m))
        .unwrap_or_default();

    Ok(UnaryResponse {
        status,
        message,
        body,
    })
}

/// Decode the percent-encoding gRPC applies to `grpc-message` values.
fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut pos = 0;
    while pos < bytes.len() {
        if bytes[pos] == b'%' && pos + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[pos + 1..pos + 3]).ok();
            if let Some(byte) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(byte);
                pos += 3;
                continue;
            }
        }
        out.push(bytes[pos]);
        pos += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
