//! windsurf-bridge - Main Entry Point
//!
//! OpenAI-compatible loopback bridge in front of the Windsurf Cascade
//! language server.

use clap::Parser;
use mimalloc::MiMalloc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use windsurf_bridge::config::AppConfig;
use windsurf_bridge::server::create_app;

// Use mimalloc for better performance
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "windsurf-bridge")]
#[command(about = "OpenAI-compatible bridge to the Windsurf Cascade language server")]
#[command(version)]
struct Args {
    /// Loopback port to listen on.
    #[arg(short, long, env = "WINDSURF_BRIDGE_PORT")]
    port: Option<u16>,

    /// Log level.
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_tracing(&args.log_level);

    tracing::info!("Starting windsurf-bridge v{}", env!("CARGO_PKG_VERSION"));

    let mut config = AppConfig::load()?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    let port = config.server.port;

    let app = create_app(config);

    // Singleton bind, loopback only. A busy port means another instance
    // already serves this machine.
    let addr = format!("127.0.0.1:{port}");
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(error) => {
            tracing::error!(%addr, %error, "Bind failed; another bridge instance is likely serving");
            std::process::exit(1);
        }
    };
    tracing::info!("Listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shut down gracefully");
    Ok(())
}

/// Tracing setup. `RUST_LOG` wins when set; the `--log-level` flag is the
/// fallback filter.
fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Resolves when the bridge should stop: ctrl-c anywhere, SIGTERM on unix.
/// In-flight cascade polls are abandoned; clients retry end-to-end.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("ctrl-c handler installation failed");
    };

    #[cfg(unix)]
    let sigterm = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation failed")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Ctrl+C received, stopping the bridge"),
        _ = sigterm => tracing::info!("SIGTERM received, stopping the bridge"),
    }
}
