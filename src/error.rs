use thiserror::Error;

/// Core error type for the bridge.
///
/// Variants map one-to-one onto the HTTP statuses the OpenAI surface
/// returns; see [`BridgeError::status_code`].
#[derive(Error, Debug)]
pub enum BridgeError {
    /// The Windsurf language server process was not found on this host.
    #[error("windsurf language server is not running")]
    NotRunning,

    /// A language server process was found but its command line lacks the
    /// expected tokens.
    #[error("language server found but --csrf_token is missing from its command line")]
    CsrfMissing,

    /// Neither the editor state database nor the legacy config carries a key.
    #[error("api key not found in editor state or ~/.codeium/config.json")]
    ApiKeyMissing,

    /// HTTP/2 connection to the language server could not be established.
    #[error("failed to connect to language server: {0}")]
    ConnectionFailed(String),

    /// Non-zero gRPC status, empty cascade id, or polling timeout.
    #[error("cascade stream error (grpc-status {status}): {message}")]
    StreamError { status: i32, message: String },

    /// Malformed request from the client.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Unclassified failure.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

impl BridgeError {
    /// Stream error helper with context.
    pub fn stream(status: i32, message: impl Into<String>) -> Self {
        BridgeError::StreamError {
            status,
            message: message.into(),
        }
    }

    /// The HTTP status this error surfaces as on the OpenAI endpoint.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            BridgeError::NotRunning | BridgeError::CsrfMissing | BridgeError::ApiKeyMissing => 503,
            BridgeError::ConnectionFailed(_) | BridgeError::StreamError { .. } => 502,
            BridgeError::BadRequest(_) => 400,
            BridgeError::Internal(_) => 500,
        }
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::BadRequest(err.to_string())
    }
}

impl From<hyper::Error> for BridgeError {
    fn from(err: hyper::Error) -> Self {
        BridgeError::ConnectionFailed(err.to_string())
    }
}

impl From<http::Error> for BridgeError {
    fn from(err: http::Error) -> Self {
        BridgeError::Internal(err.to_string())
    }
}
