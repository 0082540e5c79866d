//! HTTP server setup and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::api;
use crate::cascade::CascadeClient;
use crate::config::AppConfig;
use crate::credentials::CredentialResolver;
use crate::logging::OpTimer;
use crate::{log_banner, log_init_step, log_success, AppState};

/// Bridge version (from Cargo.toml).
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Create the application with all routes and middleware.
pub fn create_app(config: AppConfig) -> Router {
    let overall_timer = OpTimer::new("server", "create_app");

    log_banner!(
        format!("🌊 windsurf-bridge v{VERSION}"),
        format!("OpenAI-compatible loopback bridge on port {}", config.server.port)
    );

    // [1/3] Credential resolver
    let step_timer = OpTimer::new("server", "credential_resolver");
    let resolver = Arc::new(CredentialResolver::new(Duration::from_secs(
        config.credentials.cache_ttl_secs,
    )));
    log_init_step!(
        1,
        3,
        "Credential Resolver",
        "🔑 process table + socket scan + state db"
    );
    step_timer.finish();

    // [2/3] Cascade client
    let step_timer = OpTimer::new("server", "cascade_client");
    let cascade = Arc::new(CascadeClient::new(resolver, config.cascade.clone()));
    log_init_step!(2, 3, "Cascade Client", "🌊 session driver ready");
    step_timer.finish();

    // [3/3] Router with middleware
    let step_timer = OpTimer::new("server", "router");
    let state = AppState {
        config: Arc::new(config),
        cascade,
    };
    let app = build_router(state);
    log_init_step!(3, 3, "Router", "🌐 Routes + middleware configured");
    step_timer.finish();

    overall_timer.finish();
    log_success!("windsurf-bridge created successfully");
    tracing::info!("");

    app
}

/// Assemble the router around an existing state. Split out so tests can
/// inject their own inspector and cascade configuration.
pub fn build_router(state: AppState) -> Router {
    let timeout = Duration::from_secs(state.config.server.timeout_secs);

    api::create_router()
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TimeoutLayer::new(timeout))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
