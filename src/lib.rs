//! windsurf-bridge - OpenAI-compatible bridge to the Windsurf Cascade
//! language server.
//!
//! The bridge listens on loopback, speaks the OpenAI chat-completions
//! surface (optionally streaming via SSE), and drives the vendor's local
//! gRPC language server behind it. Per request it discovers credentials
//! from the running IDE process, resolves the model identifier, runs one
//! cascade session (start → send → poll), and re-emits the planner text as
//! OpenAI chunks. Tool calling is simulated with a constrained-JSON prompt.
//!
//! # Architecture
//!
//! - [`wire`]: hand-rolled protobuf varint/length-delimited codec and gRPC
//!   framing (the vendor schema moves between releases, so no compiled
//!   stubs)
//! - [`discovery`]: runtime recovery of the `Metadata` field numbering from
//!   the vendor extension asset
//! - [`credentials`]: CSRF token, gRPC port, API key, and version from the
//!   process table, socket tables, and editor state database
//! - [`models`]: canonical model ids, aliases, variants, and the enum vs
//!   string-UID routing decision
//! - [`cascade`]: the three-call session state machine with polling
//! - [`planner`]: prompt-based tool-call planning and reply parsing
//! - [`api`]: the OpenAI-compatible HTTP endpoints
//!
//! # Example
//!
//! ```rust,ignore
//! use windsurf_bridge::{config::AppConfig, server::create_app};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AppConfig::load()?;
//!     let port = config.server.port;
//!     let app = create_app(config);
//!
//!     let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod api;
pub mod cascade;
pub mod config;
pub mod credentials;
pub mod discovery;
pub mod error;
pub mod logging;
pub mod models;
pub mod planner;
pub mod server;
pub mod wire;

use std::sync::Arc;

use cascade::CascadeClient;
use config::AppConfig;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Cascade client driving the language server (owns the credential
    /// resolver).
    pub cascade: Arc<CascadeClient>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("cascade", &self.cascade)
            .finish()
    }
}
