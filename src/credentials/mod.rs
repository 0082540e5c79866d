//! Credential and endpoint discovery from the running system.
//!
//! The bridge authenticates to the language server with values owned by the
//! already-running Windsurf IDE: the CSRF token and version from the server
//! process's command line, the gRPC port from the kernel's socket tables,
//! and the API key from the editor state database. Resolution is repeated
//! per request behind a short-lived cache so an IDE restart is picked up
//! within seconds.

pub mod inspect;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::{BridgeError, BridgeResult};
pub use inspect::{HostInspector, LanguageServer, SystemInspector};

/// `ItemTable` key holding the auth-status JSON in the state database.
pub const AUTH_STATUS_KEY: &str = "windsurf.authStatus";

/// Version reported when the command line carries none.
const BASELINE_VERSION: &str = "1.38.1";

/// Everything needed to speak to the local language server.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub csrf_token: String,
    pub grpc_port: u16,
    pub api_key: String,
    pub version: String,
}

struct CachedCredentials {
    resolved_at: Instant,
    credentials: Credentials,
}

/// Resolves [`Credentials`] on demand, with a short cache window.
pub struct CredentialResolver {
    inspector: Arc<dyn HostInspector>,
    cache: Mutex<Option<CachedCredentials>>,
    ttl: Duration,
}

impl CredentialResolver {
    /// Resolver backed by the real OS.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self::with_inspector(Arc::new(SystemInspector), ttl)
    }

    /// Resolver with a custom inspector (tests, embedding).
    #[must_use]
    pub fn with_inspector(inspector: Arc<dyn HostInspector>, ttl: Duration) -> Self {
        Self {
            inspector,
            cache: Mutex::new(None),
            ttl,
        }
    }

    /// Current credentials, from cache when fresh.
    ///
    /// Concurrent callers may each run a resolution on a cold cache; the
    /// computation is idempotent so last-writer-wins is fine.
    pub async fn resolve(&self) -> BridgeResult<Credentials> {
        if let Some(cached) = self.cache.lock().unwrap().as_ref() {
            if cached.resolved_at.elapsed() < self.ttl {
                return Ok(cached.credentials.clone());
            }
        }

        let inspector = Arc::clone(&self.inspector);
        let credentials =
            tokio::task::spawn_blocking(move || resolve_uncached(inspector.as_ref()))
                .await
                .map_err(|e| BridgeError::Internal(e.to_string()))??;

        *self.cache.lock().unwrap() = Some(CachedCredentials {
            resolved_at: Instant::now(),
            credentials: credentials.clone(),
        });
        Ok(credentials)
    }

    /// Drop the cached entry, forcing re-resolution on the next request.
    /// Called when a connection to the cached port fails.
    pub fn invalidate(&self) {
        *self.cache.lock().unwrap() = None;
    }
}

impl std::fmt::Debug for CredentialResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialResolver")
            .field("ttl", &self.ttl)
            .finish()
    }
}

fn resolve_uncached(inspector: &dyn HostInspector) -> BridgeResult<Credentials> {
    // First matching process wins.
    let server = inspector
        .enumerate_language_servers()
        .into_iter()
        .next()
        .ok_or(BridgeError::NotRunning)?;

    let csrf_token = server.csrf_token.ok_or(BridgeError::CsrfMissing)?;
    let ext_port = server
        .extension_server_port
        .ok_or(BridgeError::CsrfMissing)?;

    let ports = inspector.listening_ports_for(server.pid);
    let grpc_port = pick_grpc_port(&ports, ext_port);

    let api_key = auth_db_path()
        .and_then(|path| inspector.read_auth_db(&path))
        .or_else(legacy_config_key)
        .ok_or(BridgeError::ApiKeyMissing)?;

    let version = server
        .version
        .unwrap_or_else(|| BASELINE_VERSION.to_string());

    tracing::debug!(pid = server.pid, grpc_port, %version, "Resolved credentials");

    Ok(Credentials {
        csrf_token,
        grpc_port,
        api_key,
        version,
    })
}

/// The gRPC port is not a fixed offset from the extension port. Among the
/// ports the process listens on, prefer the smallest strictly above the
/// extension port, then the smallest overall, then the historical offset.
fn pick_grpc_port(ports: &[u16], ext_port: u16) -> u16 {
    ports
        .iter()
        .copied()
        .filter(|port| *port > ext_port)
        .min()
        .or_else(|| ports.iter().copied().min())
        .unwrap_or(ext_port + 3)
}

/// Platform path of the editor state database.
pub fn auth_db_path() -> Option<PathBuf> {
    Some(dirs::config_dir()?.join("Windsurf/User/globalStorage/state.vscdb"))
}

/// Pre-IDE installs stored the key in `~/.codeium/config.json`.
fn legacy_config_key() -> Option<String> {
    let path = dirs::home_dir()?.join(".codeium/config.json");
    let content = std::fs::read_to_string(path).ok()?;
    let parsed: serde_json::Value = serde_json::from_str(&content).ok()?;
    parsed
        .get("apiKey")
        .and_then(|key| key.as_str())
        .filter(|key| !key.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeInspector {
        servers: Vec<LanguageServer>,
        ports: Vec<u16>,
        api_key: Option<String>,
        enumerations: AtomicUsize,
    }

    impl FakeInspector {
        fn new(servers: Vec<LanguageServer>, ports: Vec<u16>, api_key: Option<&str>) -> Self {
            Self {
                servers,
                ports,
                api_key: api_key.map(str::to_string),
                enumerations: AtomicUsize::new(0),
            }
        }
    }

    impl HostInspector for FakeInspector {
        fn enumerate_language_servers(&self) -> Vec<LanguageServer> {
            self.enumerations.fetch_add(1, Ordering::SeqCst);
            self.servers.clone()
        }

        fn listening_ports_for(&self, _pid: u32) -> Vec<u16> {
            self.ports.clone()
        }

        fn read_auth_db(&self, _path: &Path) -> Option<String> {
            self.api_key.clone()
        }
    }

    fn server() -> LanguageServer {
        LanguageServer {
            pid: 4242,
            csrf_token: Some("token".to_string()),
            extension_server_port: Some(42100),
            version: Some("1.36.2".to_string()),
        }
    }

    #[test]
    fn test_pick_grpc_port() {
        // Smallest port strictly above the extension port wins.
        assert_eq!(pick_grpc_port(&[42100, 42113, 42105], 42100), 42105);
        // Otherwise the smallest listening port.
        assert_eq!(pick_grpc_port(&[8000, 9000], 42100), 8000);
        // Last resort: historical offset.
        assert_eq!(pick_grpc_port(&[], 42100), 42103);
    }

    #[tokio::test]
    async fn test_not_running() {
        let resolver = CredentialResolver::with_inspector(
            Arc::new(FakeInspector::new(vec![], vec![], Some("key"))),
            Duration::from_secs(5),
        );
        assert!(matches!(
            resolver.resolve().await,
            Err(BridgeError::NotRunning)
        ));
    }

    #[tokio::test]
    async fn test_csrf_missing() {
        let mut bare = server();
        bare.csrf_token = None;
        let resolver = CredentialResolver::with_inspector(
            Arc::new(FakeInspector::new(vec![bare], vec![42105], Some("key"))),
            Duration::from_secs(5),
        );
        assert!(matches!(
            resolver.resolve().await,
            Err(BridgeError::CsrfMissing)
        ));
    }

    #[tokio::test]
    async fn test_api_key_missing() {
        let resolver = CredentialResolver::with_inspector(
            Arc::new(FakeInspector::new(vec![server()], vec![42105], None)),
            Duration::from_secs(5),
        );
        // A machine with a live legacy config would still resolve here.
        if legacy_config_key().is_none() {
            assert!(matches!(
                resolver.resolve().await,
                Err(BridgeError::ApiKeyMissing)
            ));
        }
    }

    #[tokio::test]
    async fn test_resolve_and_cache() {
        let inspector = Arc::new(FakeInspector::new(
            vec![server()],
            vec![42100, 42105],
            Some("key-1"),
        ));
        let resolver =
            CredentialResolver::with_inspector(inspector.clone(), Duration::from_secs(60));

        let creds = resolver.resolve().await.unwrap();
        assert_eq!(creds.csrf_token, "token");
        assert_eq!(creds.grpc_port, 42105);
        assert_eq!(creds.api_key, "key-1");
        assert_eq!(creds.version, "1.36.2");

        // Second resolve within the window hits the cache.
        resolver.resolve().await.unwrap();
        assert_eq!(inspector.enumerations.load(Ordering::SeqCst), 1);

        // Invalidation forces a fresh resolution.
        resolver.invalidate();
        resolver.resolve().await.unwrap();
        assert_eq!(inspector.enumerations.load(Ordering::SeqCst), 2);
    }
}
