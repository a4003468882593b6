//! End-to-end tests: axum relay on an ephemeral port with websocket peers.

use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use deskrelay_core::{
    Action, ActionStatus, CaptureError, DecompositionError, Decomposer, Effector, EffectorError,
    RawAction, ScreenSource,
};
use deskrelay_session::{PeerRole, SessionRegistry};
use deskrelay_transport::{
    AgentConfig, AgentError, AgentRuntime, Message, RelayState, TAKEN_OVER_CLOSE_CODE, relay_router,
};
use futures::{SinkExt, StreamExt};
use image::{ColorType, ImageEncoder, codecs::png::PngEncoder};
use serde_json::{Value, json};
use tokio::{
    net::{TcpListener, TcpStream},
    time::{sleep, timeout},
};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, tungstenite::Message as WsMessage};
use tokio_util::sync::CancellationToken;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const STEP: Duration = Duration::from_secs(5);

struct ScriptedDecomposer;

#[async_trait]
impl Decomposer for ScriptedDecomposer {
    async fn decompose(&self, instruction: &str) -> Result<Vec<RawAction>, DecompositionError> {
        if instruction == "open example.com" {
            Ok(vec![open_example()])
        } else {
            Err(DecompositionError::Malformed("expected value at line 1 column 1".into()))
        }
    }
}

#[derive(Default)]
struct RecordingEffector {
    performed: Mutex<Vec<Action>>,
}

#[async_trait]
impl Effector for RecordingEffector {
    async fn perform(&self, action: &Action) -> Result<(), EffectorError> {
        self.performed.lock().unwrap().push(action.clone());
        Ok(())
    }
}

struct StaticScreen(Vec<u8>);

#[async_trait]
impl ScreenSource for StaticScreen {
    async fn capture(&self) -> Result<Vec<u8>, CaptureError> {
        Ok(self.0.clone())
    }
}

fn open_example() -> RawAction {
    serde_json::from_value(json!({"type": "open_url", "params": {"url": "https://example.com"}})).unwrap()
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let pixels = vec![0x80_u8; (width * height * 3) as usize];
    let mut out = Vec::new();
    PngEncoder::new(&mut out)
        .write_image(&pixels, width, height, ColorType::Rgb8)
        .unwrap();
    out
}

async fn start_relay() -> (SocketAddr, Arc<SessionRegistry>) {
    let registry = Arc::new(SessionRegistry::new());
    let state = RelayState::new(registry.clone(), Arc::new(ScriptedDecomposer));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, relay_router(state, &[])).await.unwrap();
    });
    (addr, registry)
}

async fn connect(addr: SocketAddr, query: &str) -> Client {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws?{query}"))
        .await
        .unwrap();
    ws
}

async fn send(ws: &mut Client, value: &Value) {
    ws.send(WsMessage::Text(value.to_string().into())).await.unwrap();
}

/// Next protocol message, or `None` once the relay closes the socket.
async fn next_message(ws: &mut Client) -> Option<Message> {
    loop {
        match timeout(STEP, ws.next()).await.expect("timed out waiting for message") {
            Some(Ok(WsMessage::Text(text))) => return Some(serde_json::from_str(text.as_str()).unwrap()),
            Some(Ok(WsMessage::Close(_)) | Err(_)) | None => return None,
            Some(Ok(_)) => {}
        }
    }
}

/// Next screen frame, skipping anything else.
async fn next_frame(ws: &mut Client) -> Message {
    loop {
        match next_message(ws).await {
            Some(message @ Message::ScreenFrame { .. }) => return message,
            Some(_) => {}
            None => panic!("connection closed"),
        }
    }
}

/// Next message that is not a screen frame.
async fn next_event(ws: &mut Client) -> Message {
    loop {
        match next_message(ws).await {
            Some(Message::ScreenFrame { .. }) => {}
            Some(message) => return message,
            None => panic!("connection closed"),
        }
    }
}

/// Round-trip an invalid frame so the relay has certainly registered `ws`.
async fn sync(ws: &mut Client) {
    ws.send(WsMessage::Text("sync".into())).await.unwrap();
    let Message::Error { message } = next_event(ws).await else {
        panic!("expected the relay to reject the sync frame");
    };
    assert!(message.starts_with("Invalid message"));
}

#[tokio::test]
async fn test_command_runs_on_agent_and_streams_back() {
    let (addr, registry) = start_relay().await;
    let mut web = connect(addr, "code=ABC123").await;
    sync(&mut web).await;

    let effector = Arc::new(RecordingEffector::default());
    let runtime = AgentRuntime::new(
        AgentConfig::new(format!("ws://{addr}/ws"), "ABC123"),
        effector.clone(),
        Arc::new(StaticScreen(png(1920, 1080))),
    );
    let shutdown = CancellationToken::new();
    let agent = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { runtime.run(shutdown).await }
    });

    // A frame arriving proves the agent is paired.
    let frame = next_frame(&mut web).await;
    let jpeg = frame.decode_frame().unwrap();
    assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    assert_eq!(registry.peer_count(PeerRole::Agent), 1);

    send(&mut web, &json!({"type": "command", "command": "open example.com"})).await;

    assert_eq!(next_event(&mut web).await, Message::processing(vec![open_example()]));
    match next_event(&mut web).await {
        Message::ActionProgress {
            step,
            total,
            action,
            result,
        } => {
            assert_eq!((step, total), (1, 1));
            assert_eq!(action, open_example());
            assert_eq!(result.status, ActionStatus::Success);
        }
        other => panic!("unexpected message: {other:?}"),
    }
    let Message::SequenceComplete { results } = next_event(&mut web).await else {
        panic!("expected sequence_complete");
    };
    assert_eq!(results.len(), 1);
    assert_eq!(
        *effector.performed.lock().unwrap(),
        vec![Action::OpenUrl {
            url: "https://example.com".into()
        }]
    );

    shutdown.cancel();
    agent.await.unwrap().unwrap();
    assert_eq!(
        next_event(&mut web).await,
        Message::PeerDisconnected { role: PeerRole::Agent }
    );
}

#[tokio::test]
async fn test_failed_decomposition_reports_error_to_web() {
    let (addr, _) = start_relay().await;
    let mut web = connect(addr, "code=ERR").await;
    let mut agent = connect(addr, "code=ERR&client_type=agent").await;
    sync(&mut web).await;
    sync(&mut agent).await;

    send(&mut web, &json!({"type": "command", "command": "do the thing"})).await;

    assert_eq!(
        next_event(&mut web).await,
        Message::error("Failed to parse AI response: expected value at line 1 column 1")
    );

    // Nothing reached the agent: its next message is the reply to this sync.
    sync(&mut agent).await;
}

#[tokio::test]
async fn test_second_connection_takes_over_role() {
    let (addr, registry) = start_relay().await;
    let mut first = connect(addr, "code=DUP&client_type=agent").await;
    sync(&mut first).await;
    let mut second = connect(addr, "code=DUP&client_type=agent").await;
    sync(&mut second).await;

    assert_eq!(
        next_message(&mut first).await,
        Some(Message::error("Session taken over by a newer connection"))
    );
    match timeout(STEP, first.next()).await.unwrap() {
        Some(Ok(WsMessage::Close(Some(close)))) => assert_eq!(u16::from(close.code), TAKEN_OVER_CLOSE_CODE),
        other => panic!("expected a takeover close frame, got {other:?}"),
    }

    let mut web = connect(addr, "code=DUP").await;
    sync(&mut web).await;
    send(&mut web, &json!({"type": "set_fps", "fps": 2})).await;
    assert_eq!(next_event(&mut second).await, Message::SetFps { fps: 2.0 });
    assert_eq!(registry.peer_count(PeerRole::Agent), 1);
}

#[tokio::test]
async fn test_displaced_agent_stops_instead_of_reclaiming() {
    let (addr, registry) = start_relay().await;
    let mut web = connect(addr, "code=PING").await;
    sync(&mut web).await;

    let mut config = AgentConfig::new(format!("ws://{addr}/ws"), "PING");
    config.reconnect_delay = Duration::from_millis(100);
    let runtime = AgentRuntime::new(
        config,
        Arc::new(RecordingEffector::default()),
        Arc::new(StaticScreen(png(64, 36))),
    );
    let agent = tokio::spawn(async move { runtime.run(CancellationToken::new()).await });
    next_frame(&mut web).await;

    let mut newer = connect(addr, "code=PING&client_type=agent").await;
    sync(&mut newer).await;

    let outcome = timeout(STEP, agent).await.expect("displaced agent kept running").unwrap();
    assert!(matches!(outcome, Err(AgentError::TakenOver)));

    // Well past the reconnect delay the newer agent still owns the slot.
    sleep(Duration::from_millis(500)).await;
    sync(&mut newer).await;
    assert_eq!(registry.peer_count(PeerRole::Agent), 1);
}

#[tokio::test]
async fn test_running_wait_leaves_stream_and_fps_responsive() {
    let (addr, _) = start_relay().await;
    let mut web = connect(addr, "code=SLOW").await;
    sync(&mut web).await;

    let mut config = AgentConfig::new(format!("ws://{addr}/ws"), "SLOW");
    config.stream.fps = 1.0;
    let runtime = AgentRuntime::new(
        config,
        Arc::new(RecordingEffector::default()),
        Arc::new(StaticScreen(png(64, 36))),
    );
    let shutdown = CancellationToken::new();
    let agent = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { runtime.run(shutdown).await }
    });
    next_frame(&mut web).await;

    // Both are forwarded to the agent as sent.
    send(
        &mut web,
        &json!({"type": "execute_sequence", "actions": [{"type": "wait", "params": {"seconds": 3}}]}),
    )
    .await;
    send(&mut web, &json!({"type": "set_fps", "fps": 20})).await;

    let mut timestamps = Vec::new();
    loop {
        match next_message(&mut web).await {
            Some(Message::ScreenFrame { timestamp, .. }) => timestamps.push(timestamp),
            Some(Message::ActionProgress { .. }) => {}
            Some(Message::SequenceComplete { results }) => {
                assert_eq!(results[0].status, ActionStatus::Success);
                break;
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    // At the original 1 fps the wait would only let about three frames through.
    assert!(timestamps.len() >= 10, "only {} frames during the wait", timestamps.len());
    assert!(timestamps.windows(2).any(|pair| pair[1] - pair[0] < 0.5));

    shutdown.cancel();
    agent.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_message_to_absent_peer_is_dropped() {
    let (addr, _) = start_relay().await;
    let mut web = connect(addr, "code=ALONE").await;
    sync(&mut web).await;

    send(&mut web, &json!({"type": "set_fps", "fps": 10})).await;

    // No error for the dropped message: the next reply belongs to the sync.
    sync(&mut web).await;
}

#[tokio::test]
async fn test_empty_code_is_rejected() {
    let (addr, _) = start_relay().await;
    let result = tokio_tungstenite::connect_async(format!("ws://{addr}/ws?code=%20")).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_health_reports_connection_counts() {
    let (addr, _) = start_relay().await;
    let mut web = connect(addr, "code=H1").await;
    sync(&mut web).await;

    let response = reqwest::get(format!("http://{addr}/api/health")).await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let health: Value = response.json().await.unwrap();
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["active_connections"], 1);
    assert_eq!(health["active_agents"], 0);
    assert!(health["timestamp"].as_f64().unwrap() > 0.0);
}
