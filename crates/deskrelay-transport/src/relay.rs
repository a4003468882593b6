//! Relay router: pairs web and agent websockets by access code.

use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use axum::{
    Json, Router,
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{CloseFrame, Message as WsMessage, WebSocket, close_code},
    },
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
};
use deskrelay_core::Decomposer;
use deskrelay_session::{PeerHandle, PeerReceiver, PeerRole, SessionRegistry};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::protocol::{CommandPayload, Message, TAKEN_OVER_CLOSE_CODE};

const TAKEN_OVER: &str = "Session taken over by a newer connection";

/// Query parameters of `/ws`.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectParams {
    pub code: String,
    #[serde(default)]
    pub client_type: PeerRole,
}

/// Shared router state.
#[derive(Clone)]
pub struct RelayState {
    registry: Arc<SessionRegistry>,
    decomposer: Arc<dyn Decomposer>,
}

impl RelayState {
    #[must_use]
    pub fn new(registry: Arc<SessionRegistry>, decomposer: Arc<dyn Decomposer>) -> Self {
        Self {
            registry,
            decomposer,
        }
    }

    #[must_use]
    pub const fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Register a new connection, evicting whoever held the slot before.
    pub fn attach(&self, code: &str, role: PeerRole) -> (PeerHandle, PeerReceiver) {
        let (handle, rx) = PeerHandle::new();
        if let Some(displaced) = self.registry.connect(code, role, handle.clone()) {
            displaced.deliver(Message::error(TAKEN_OVER).to_text());
            displaced.evict();
        }
        (handle, rx)
    }

    /// Unregister a closing connection and tell its counterpart.
    ///
    /// Does nothing if `handle` was already displaced.
    pub fn detach(&self, code: &str, role: PeerRole, handle: &PeerHandle) {
        if self.registry.disconnect_peer(code, role, handle.id()) {
            self.registry
                .route(code, role.counterpart(), Message::PeerDisconnected { role }.to_text());
        }
    }

    /// Handle one text frame received from `(code, role)`.
    ///
    /// Web `command` messages carrying text are decomposed; everything else
    /// is forwarded to the counterpart as received. Agent screen frames take
    /// the web peer's latest-frame slot instead of its ordered queue.
    pub async fn handle_inbound(&self, code: &str, role: PeerRole, reply: &PeerHandle, text: &str) {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(code, %role, "Invalid message: {e}");
                reply.deliver(Message::error(format!("Invalid message: {e}")).to_text());
                return;
            }
        };

        if role == PeerRole::Web {
            if let Ok(Message::Command {
                command: CommandPayload::Text(instruction),
            }) = Message::deserialize(&value)
            {
                self.process_command(code, reply, &instruction).await;
                return;
            }
        }

        let delivered = if role == PeerRole::Agent && is_screen_frame(&value) {
            self.registry.route_frame(code, PeerRole::Web, text)
        } else {
            self.registry.route(code, role.counterpart(), text)
        };
        if !delivered {
            tracing::debug!(code, %role, "Counterpart not connected, message dropped");
        }
    }

    async fn process_command(&self, code: &str, reply: &PeerHandle, instruction: &str) {
        tracing::info!(code, "Processing command");
        match self.decomposer.decompose(instruction).await {
            Ok(actions) => {
                let sequence = Message::ExecuteSequence {
                    actions: actions.clone(),
                };
                if !self.registry.route(code, PeerRole::Agent, sequence.to_text()) {
                    tracing::debug!(code, "No agent connected, sequence dropped");
                }
                reply.deliver(Message::processing(actions).to_text());
            }
            Err(e) => {
                tracing::warn!(code, "Command decomposition failed: {e}");
                reply.deliver(Message::error(e.to_string()).to_text());
            }
        }
    }
}

fn is_screen_frame(value: &Value) -> bool {
    value.get("type").and_then(Value::as_str) == Some("screen_frame")
}

/// Body of `GET /api/health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Health {
    pub status: String,
    pub timestamp: f64,
    pub active_connections: usize,
    pub active_agents: usize,
}

async fn health(State(state): State<RelayState>) -> Json<Health> {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default();

    Json(Health {
        status: "healthy".to_string(),
        timestamp,
        active_connections: state.registry.peer_count(PeerRole::Web),
        active_agents: state.registry.peer_count(PeerRole::Agent),
    })
}

/// WebSocket upgrade handler for `/ws?code=..&client_type=web|agent`.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<RelayState>,
) -> Response {
    let code = params.code.trim().to_string();
    if code.is_empty() {
        return (StatusCode::BAD_REQUEST, "access code is required").into_response();
    }
    let role = params.client_type;
    ws.on_upgrade(move |socket| handle_socket(socket, state, code, role))
}

async fn handle_socket(socket: WebSocket, state: RelayState, code: String, role: PeerRole) {
    let (mut sender, mut receiver) = socket.split();
    let (handle, mut rx) = state.attach(&code, role);

    // Drains until every handle clone is gone, then hands the sink back.
    let writer = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sender.send(WsMessage::Text(text.into())).await.is_err() {
                return None;
            }
        }
        Some(sender)
    });

    loop {
        let frame = tokio::select! {
            () = handle.evicted() => {
                tracing::info!(code = %code, %role, "Connection displaced");
                break;
            }
            frame = receiver.next() => frame,
        };

        let text = match frame {
            Some(Ok(WsMessage::Text(text))) => text.as_str().to_owned(),
            Some(Ok(WsMessage::Binary(data))) => {
                if let Ok(text) = String::from_utf8(data.to_vec()) {
                    text
                } else {
                    handle.deliver(Message::error("Binary frames must be UTF-8 JSON").to_text());
                    continue;
                }
            }
            Some(Ok(WsMessage::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                tracing::debug!(code = %code, %role, "WebSocket error: {e}");
                break;
            }
        };

        state.handle_inbound(&code, role, &handle, &text).await;
    }

    state.detach(&code, role, &handle);
    let close = if handle.is_evicted() {
        CloseFrame {
            code: TAKEN_OVER_CLOSE_CODE,
            reason: TAKEN_OVER.into(),
        }
    } else {
        CloseFrame {
            code: close_code::NORMAL,
            reason: "".into(),
        }
    };
    drop(handle);

    match writer.await {
        Ok(Some(mut sender)) => {
            let _ = sender.send(WsMessage::Close(Some(close))).await;
        }
        Ok(None) => {}
        Err(e) => tracing::debug!(code = %code, %role, "Writer task failed: {e}"),
    }
}

/// CORS for browser clients; no origins means any origin.
#[must_use]
pub fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    if allowed_origins.is_empty() {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(%origin, "Ignoring invalid origin: {e}");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Build the relay router serving `/ws` and `/api/health`.
///
/// # Example
/// ```ignore
/// let state = RelayState::new(Arc::new(SessionRegistry::new()), decomposer);
/// let app = relay_router(state, &[]);
/// ```
#[must_use]
pub fn relay_router(state: RelayState, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/health", get(health))
        .with_state(state)
        .layer(cors_layer(allowed_origins))
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use deskrelay_core::{DecompositionError, RawAction};
    use serde_json::json;

    use super::*;

    struct FixedDecomposer(Result<Vec<RawAction>, DecompositionError>);

    #[async_trait]
    impl Decomposer for FixedDecomposer {
        async fn decompose(&self, _instruction: &str) -> Result<Vec<RawAction>, DecompositionError> {
            self.0.clone()
        }
    }

    fn state(result: Result<Vec<RawAction>, DecompositionError>) -> RelayState {
        RelayState::new(Arc::new(SessionRegistry::new()), Arc::new(FixedDecomposer(result)))
    }

    fn open_example() -> Vec<RawAction> {
        vec![serde_json::from_value(json!({"type": "open_url", "params": {"url": "https://example.com"}})).unwrap()]
    }

    fn parse(text: &str) -> Message {
        serde_json::from_str(text).unwrap()
    }

    #[tokio::test]
    async fn test_command_is_decomposed_forwarded_and_acked() {
        let state = state(Ok(open_example()));
        let (web, mut web_rx) = state.attach("ABC", PeerRole::Web);
        let (_agent, mut agent_rx) = state.attach("ABC", PeerRole::Agent);

        state
            .handle_inbound("ABC", PeerRole::Web, &web, r#"{"type":"command","command":"open example.com"}"#)
            .await;

        assert_eq!(
            parse(&agent_rx.recv().await.unwrap()),
            Message::ExecuteSequence { actions: open_example() }
        );
        assert_eq!(parse(&web_rx.recv().await.unwrap()), Message::processing(open_example()));
    }

    #[tokio::test]
    async fn test_decomposition_failure_only_reaches_web() {
        let state = state(Err(DecompositionError::Malformed("expected value".into())));
        let (web, mut web_rx) = state.attach("ABC", PeerRole::Web);
        let (_agent, mut agent_rx) = state.attach("ABC", PeerRole::Agent);

        state
            .handle_inbound("ABC", PeerRole::Web, &web, r#"{"type":"command","command":"???"}"#)
            .await;

        assert_eq!(
            parse(&web_rx.recv().await.unwrap()),
            Message::error("Failed to parse AI response: expected value")
        );
        assert!(agent_rx.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_other_traffic_is_forwarded_verbatim() {
        let state = state(Ok(open_example()));
        let (web, mut web_rx) = state.attach("ABC", PeerRole::Web);
        let (agent, mut agent_rx) = state.attach("ABC", PeerRole::Agent);

        let set_fps = r#"{"type": "set_fps",   "fps": 10}"#;
        state.handle_inbound("ABC", PeerRole::Web, &web, set_fps).await;
        assert_eq!(agent_rx.recv().await.unwrap(), set_fps);

        let custom = r#"{"type":"agent_status","battery":80}"#;
        state.handle_inbound("ABC", PeerRole::Agent, &agent, custom).await;
        assert_eq!(web_rx.recv().await.unwrap(), custom);
    }

    #[tokio::test]
    async fn test_agent_frames_replace_unsent_frames() {
        let state = state(Ok(open_example()));
        let (_web, mut web_rx) = state.attach("ABC", PeerRole::Web);
        let (agent, _agent_rx) = state.attach("ABC", PeerRole::Agent);

        for i in 0..50 {
            let frame = format!(r#"{{"type":"screen_frame","data":"AAAA","timestamp":{i}}}"#);
            state.handle_inbound("ABC", PeerRole::Agent, &agent, &frame).await;
        }
        let done = r#"{"type":"sequence_complete","results":[]}"#;
        state.handle_inbound("ABC", PeerRole::Agent, &agent, done).await;

        assert_eq!(web_rx.recv().await.unwrap(), done);
        let Message::ScreenFrame { timestamp, .. } = parse(&web_rx.recv().await.unwrap()) else {
            panic!("expected the latest frame");
        };
        assert!((timestamp - 49.0).abs() < f64::EPSILON);
        assert!(web_rx.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_invalid_json_is_answered_with_error() {
        let state = state(Ok(open_example()));
        let (agent, mut agent_rx) = state.attach("ABC", PeerRole::Agent);

        state.handle_inbound("ABC", PeerRole::Agent, &agent, "not json").await;

        let Message::Error { message } = parse(&agent_rx.recv().await.unwrap()) else {
            panic!("expected an error reply");
        };
        assert!(message.starts_with("Invalid message"));
    }

    #[tokio::test]
    async fn test_takeover_evicts_previous_connection() {
        let state = state(Ok(open_example()));
        let (first, mut first_rx) = state.attach("ABC", PeerRole::Agent);
        let (second, _second_rx) = state.attach("ABC", PeerRole::Agent);

        assert!(first.is_evicted());
        assert!(!second.is_evicted());
        assert_eq!(parse(&first_rx.recv().await.unwrap()), Message::error(TAKEN_OVER));

        // The displaced connection closing must not unregister its successor.
        state.detach("ABC", PeerRole::Agent, &first);
        assert_eq!(state.registry().peer("ABC", PeerRole::Agent).map(|h| h.id()), Some(second.id()));
    }

    #[tokio::test]
    async fn test_detach_notifies_counterpart() {
        let state = state(Ok(open_example()));
        let (_web, mut web_rx) = state.attach("ABC", PeerRole::Web);
        let (agent, _agent_rx) = state.attach("ABC", PeerRole::Agent);

        state.detach("ABC", PeerRole::Agent, &agent);

        assert_eq!(
            parse(&web_rx.recv().await.unwrap()),
            Message::PeerDisconnected { role: PeerRole::Agent }
        );
        assert!(!state.registry().is_connected("ABC", PeerRole::Agent));
    }
}
