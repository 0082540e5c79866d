//! Cascade session driver.
//!
//! Each chat completion runs one vendor session through three unary RPCs:
//! StartCascade creates the session, SendUserCascadeMessage submits the
//! user text and model selection, and GetCascadeTrajectorySteps is polled
//! until the planner response carries assistant text. Sessions are never
//! reused; multi-turn context travels in the request text itself.

pub mod identity;
pub mod rpc;

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use crate::config::CascadeConfig;
use crate::credentials::{CredentialResolver, Credentials};
use crate::discovery;
use crate::error::{BridgeError, BridgeResult};
use crate::logging::OpTimer;
use crate::models::ResolvedModel;
use crate::wire;

const SERVICE: &str = "/exa.language_server_pb.LanguageServerService";

/// StartCascade `source` value for interactive chat.
const SOURCE_CHAT: u64 = 3;

/// Async sequence of assistant text chunks for one completion.
pub type TextStream = Pin<Box<dyn Stream<Item = BridgeResult<String>> + Send>>;

/// Drives cascade sessions against the local language server.
pub struct CascadeClient {
    resolver: Arc<CredentialResolver>,
    config: CascadeConfig,
    /// Generated once at process start and reused across requests, matching
    /// the IDE's own behavior.
    session_id: String,
    /// Process-wide so repeated requests look like one client to the vendor.
    request_counter: AtomicU64,
}

impl CascadeClient {
    #[must_use]
    pub fn new(resolver: Arc<CredentialResolver>, config: CascadeConfig) -> Self {
        Self {
            resolver,
            config,
            session_id: Uuid::new_v4().to_string(),
            request_counter: AtomicU64::new(0),
        }
    }

    /// Whether the language server currently answers a readiness probe.
    pub async fn probe(&self) -> bool {
        self.resolver.resolve().await.is_ok()
    }

    /// Run one completion. Start and send happen before this returns, so
    /// setup failures surface with proper HTTP statuses; polling continues
    /// in a background task feeding the returned stream. The current
    /// backend produces one final chunk, but callers must not rely on that.
    pub async fn complete(
        &self,
        resolved: &ResolvedModel,
        text: String,
    ) -> BridgeResult<TextStream> {
        let credentials = self.resolver.resolve().await?;
        let metadata = self.build_metadata(&credentials);

        let result = self.start_and_send(&credentials, &metadata, resolved, &text).await;
        let cascade_id = match result {
            Ok(id) => id,
            Err(err) => {
                if matches!(err, BridgeError::ConnectionFailed(_)) {
                    self.resolver.invalidate();
                }
                return Err(err);
            }
        };

        // Bounded channel: a blocked SSE writer suspends the poll loop
        // instead of buffering unboundedly.
        let (tx, rx) = mpsc::channel(8);
        let config = self.config.clone();
        tokio::spawn(poll_trajectory(credentials, cascade_id, config, tx));
        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn start_and_send(
        &self,
        credentials: &Credentials,
        metadata: &[u8],
        resolved: &ResolvedModel,
        text: &str,
    ) -> BridgeResult<String> {
        let timer = OpTimer::new("cascade", "start");
        let cascade_id = self.start_cascade(credentials, metadata).await?;
        timer.finish();
        tracing::debug!(%cascade_id, model = %resolved.wire_name(), "Cascade started");

        let timer = OpTimer::new("cascade", "send");
        self.send_message(credentials, metadata, &cascade_id, resolved, text)
            .await?;
        timer.finish();
        Ok(cascade_id)
    }

    async fn start_cascade(
        &self,
        credentials: &Credentials,
        metadata: &[u8],
    ) -> BridgeResult<String> {
        let mut payload = Vec::new();
        wire::put_bytes_field(&mut payload, 1, metadata);
        wire::put_varint_field(&mut payload, 4, SOURCE_CHAT);

        let response = rpc::unary(
            credentials.grpc_port,
            &format!("{SERVICE}/StartCascade"),
            &credentials.csrf_token,
            &payload,
            self.rpc_timeout(),
        )
        .await?;
        let frames = response.frames()?;

        frames
            .first()
            .and_then(|frame| wire::first_string(frame, 1))
            .filter(|id| !id.is_empty())
            .ok_or_else(|| BridgeError::stream(0, "StartCascade returned no cascade id"))
    }

    async fn send_message(
        &self,
        credentials: &Credentials,
        metadata: &[u8],
        cascade_id: &str,
        resolved: &ResolvedModel,
        text: &str,
    ) -> BridgeResult<()> {
        // The server crashes the RPC when the cascade config is omitted, so
        // it is always present even though every field inside is optional.
        let planner = build_planner_config(resolved);
        let mut cascade_config = Vec::new();
        wire::put_bytes_field(&mut cascade_config, 1, &planner);

        let mut text_item = Vec::new();
        wire::put_str_field(&mut text_item, 1, if text.is_empty() { "Hello" } else { text });

        let mut payload = Vec::new();
        wire::put_str_field(&mut payload, 1, cascade_id);
        wire::put_bytes_field(&mut payload, 2, &text_item);
        wire::put_bytes_field(&mut payload, 3, metadata);
        wire::put_bytes_field(&mut payload, 5, &cascade_config);

        let response = rpc::unary(
            credentials.grpc_port,
            &format!("{SERVICE}/SendUserCascadeMessage"),
            &credentials.csrf_token,
            &payload,
            self.rpc_timeout(),
        )
        .await?;
        response.frames()?;
        Ok(())
    }

    /// Vendor `Metadata` message against the discovered field numbering.
    fn build_metadata(&self, credentials: &Credentials) -> Vec<u8> {
        let map = discovery::metadata_field_map();
        let mut buf = Vec::new();
        wire::put_str_field(&mut buf, map.api_key, &credentials.api_key);
        wire::put_str_field(&mut buf, map.ide_name, "windsurf");
        wire::put_str_field(&mut buf, map.ide_version, &credentials.version);
        wire::put_str_field(&mut buf, map.extension_version, &credentials.version);
        wire::put_str_field(&mut buf, map.session_id, &self.session_id);
        wire::put_str_field(&mut buf, map.locale, "en");
        // Fields with stable numbering across the releases we track.
        wire::put_str_field(&mut buf, 12, "windsurf");
        wire::put_str_field(&mut buf, 5, identity::os_name());
        wire::put_varint_field(
            &mut buf,
            9,
            self.request_counter.fetch_add(1, Ordering::SeqCst) + 1,
        );
        wire::put_str_field(&mut buf, 24, identity::device_fingerprint());
        buf
    }

    fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.config.rpc_timeout_secs)
    }
}

impl std::fmt::Debug for CascadeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CascadeClient")
            .field("session_id", &self.session_id)
            .field("config", &self.config)
            .finish()
    }
}

/// Planner config: conversational mode plus the model selection in both the
/// routing field pair (enum in 4, UID in 5) and the unified name field 35.
fn build_planner_config(resolved: &ResolvedModel) -> Vec<u8> {
    let mut planner = Vec::new();
    wire::put_bytes_field(&mut planner, 2, &[]);
    if resolved.enum_value != 0 {
        wire::put_varint_field(&mut planner, 4, u64::from(resolved.enum_value));
    }
    if let Some(uid) = &resolved.model_uid {
        wire::put_str_field(&mut planner, 5, uid);
    }
    wire::put_str_field(&mut planner, 35, &resolved.wire_name());
    planner
}

/// Poll GetCascadeTrajectorySteps until planner text appears, feeding `tx`.
///
/// Individual poll failures are expected while inference is in progress and
/// are swallowed; only exhausting the attempt budget or a non-OK gRPC
/// status is terminal. If the receiver is gone the task just stops.
async fn poll_trajectory(
    credentials: Credentials,
    cascade_id: String,
    config: CascadeConfig,
    tx: mpsc::Sender<BridgeResult<String>>,
) {
    let mut payload = Vec::new();
    wire::put_str_field(&mut payload, 1, &cascade_id);
    wire::put_varint_field(&mut payload, 2, 0);

    let timer = OpTimer::new("cascade", "poll");
    for attempt in 0..config.poll_attempts {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_millis(config.poll_interval_ms)).await;
        }
        if tx.is_closed() {
            return;
        }

        let response = match rpc::unary(
            credentials.grpc_port,
            &format!("{SERVICE}/GetCascadeTrajectorySteps"),
            &credentials.csrf_token,
            &payload,
            Duration::from_secs(config.rpc_timeout_secs),
        )
        .await
        {
            Ok(response) => response,
            Err(error) => {
                tracing::debug!(%error, attempt, "Trajectory poll failed, retrying");
                continue;
            }
        };

        let frames = match response.frames() {
            Ok(frames) => frames,
            Err(error) => {
                timer.finish_with_result::<(), _>(Err(&error));
                let _ = tx.send(Err(error)).await;
                return;
            }
        };

        if let Some(text) = extract_planner_text(&frames) {
            timer.finish();
            let _ = tx.send(Ok(text)).await;
            return;
        }
    }

    let error = BridgeError::stream(4, "cascade trajectory polling timed out");
    timer.finish_with_result::<(), _>(Err(&error));
    let _ = tx.send(Err(error)).await;
}

/// Walk trajectory steps across all frames and keep the last non-empty
/// planner text, with `modified_response` (field 8) overriding `response`
/// (field 1) within a step.
fn extract_planner_text(frames: &[Vec<u8>]) -> Option<String> {
    let mut last = None;
    for frame in frames {
        for field in wire::fields(frame) {
            let wire::FieldValue::Bytes(step) = field.value else {
                continue;
            };
            if field.number != 1 {
                continue;
            }
            let Some(planner) = wire::first_bytes(step, 20) else {
                continue;
            };
            let modified = wire::first_string(planner, 8).filter(|s| !s.is_empty());
            let response = wire::first_string(planner, 1).filter(|s| !s.is_empty());
            if let Some(text) = modified.or(response) {
                last = Some(text);
            }
        }
    }
    last
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models;

    fn step_frame(response: Option<&str>, modified: Option<&str>) -> Vec<u8> {
        let mut planner = Vec::new();
        if let Some(text) = response {
            wire::put_str_field(&mut planner, 1, text);
        }
        if let Some(text) = modified {
            wire::put_str_field(&mut planner, 8, text);
        }
        let mut step = Vec::new();
        wire::put_bytes_field(&mut step, 20, &planner);
        let mut frame = Vec::new();
        wire::put_bytes_field(&mut frame, 1, &step);
        frame
    }

    #[test]
    fn test_extract_planner_text() {
        let frames = vec![step_frame(Some("hello"), None)];
        assert_eq!(extract_planner_text(&frames).as_deref(), Some("hello"));
    }

    #[test]
    fn test_modified_response_wins() {
        let frames = vec![step_frame(Some("draft"), Some("final"))];
        assert_eq!(extract_planner_text(&frames).as_deref(), Some("final"));
    }

    #[test]
    fn test_last_non_empty_wins() {
        let frames = vec![
            step_frame(Some("first"), None),
            step_frame(Some("second"), None),
            step_frame(None, None),
        ];
        assert_eq!(extract_planner_text(&frames).as_deref(), Some("second"));
    }

    #[test]
    fn test_empty_trajectory() {
        assert_eq!(extract_planner_text(&[]), None);
        let mut frame = Vec::new();
        wire::put_bytes_field(&mut frame, 1, &[]);
        assert_eq!(extract_planner_text(&[frame]), None);
    }

    #[test]
    fn test_planner_config_uid_routing() {
        let resolved = models::resolve("claude-4.6-opus:thinking", None);
        let planner = build_planner_config(&resolved);
        assert_eq!(
            wire::first_string(&planner, 5).as_deref(),
            Some("claude-opus-4-6-thinking")
        );
        assert_eq!(
            wire::first_string(&planner, 35).as_deref(),
            Some("claude-opus-4-6-thinking")
        );
        // No enum field for UID-routed models.
        assert!(!wire::fields(&planner)
            .any(|f| f.number == 4 && matches!(f.value, wire::FieldValue::Varint(_))));
    }

    #[test]
    fn test_planner_config_enum_routing() {
        let resolved = models::resolve("claude-3.5-sonnet", None);
        let planner = build_planner_config(&resolved);
        assert!(wire::fields(&planner)
            .any(|f| f.number == 4 && f.value == wire::FieldValue::Varint(166)));
        assert_eq!(
            wire::first_string(&planner, 35).as_deref(),
            Some("MODEL_CLAUDE_3_5_SONNET")
        );
        assert_eq!(wire::first_string(&planner, 5), None);
    }

    #[test]
    fn test_metadata_uses_discovered_numbering() {
        let resolver = Arc::new(CredentialResolver::new(Duration::from_secs(5)));
        let client = CascadeClient::new(resolver, CascadeConfig::default());
        let credentials = Credentials {
            csrf_token: "csrf".into(),
            grpc_port: 42105,
            api_key: "key".into(),
            version: "1.36.2".into(),
        };

        let metadata = client.build_metadata(&credentials);
        let map = discovery::metadata_field_map();
        assert_eq!(
            wire::first_string(&metadata, map.api_key).as_deref(),
            Some("key")
        );
        assert_eq!(
            wire::first_string(&metadata, map.ide_name).as_deref(),
            Some("windsurf")
        );
        assert_eq!(
            wire::first_string(&metadata, map.session_id).as_deref(),
            Some(client.session_id.as_str())
        );

        // Counter is monotonic across builds.
        let counter = |buf: &[u8]| {
            wire::fields(buf).find_map(|f| match f.value {
                wire::FieldValue::Varint(v) if f.number == 9 => Some(v),
                _ => None,
            })
        };
        let first = counter(&metadata).unwrap();
        let second = counter(&client.build_metadata(&credentials)).unwrap();
        assert_eq!(second, first + 1);
    }
}
