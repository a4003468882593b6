//! Agent-side relay client.
//!
//! One connection runs three tasks next to the socket reader: the socket
//! writer draining the outbound queue, the screen streamer, and a job worker
//! that executes sequences one at a time in arrival order.

use std::{sync::Arc, time::Duration};

use deskrelay_core::{Effector, RawAction, ScreenSource};
use deskrelay_executor::{
    ActionSequence, DEFAULT_SETTLE_DELAY, ExecutionEngine, FpsControl, ScreenStreamer, StreamConfig,
};
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::{sync::mpsc, time::sleep};
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tokio_util::sync::CancellationToken;

use crate::{
    outbound::{self, OutboundSender},
    protocol::{CommandPayload, Message, TAKEN_OVER_CLOSE_CODE},
};

/// Agent connection error.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("WebSocket error: {0}")]
    WebSocket(Box<tungstenite::Error>),
    #[error("Session taken over by another agent with the same access code")]
    TakenOver,
}

impl From<tungstenite::Error> for AgentError {
    fn from(err: tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}

/// Agent runtime settings.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Relay websocket endpoint, e.g. `ws://localhost:8000/ws`.
    pub relay_url: String,
    pub access_code: String,
    pub stream: StreamConfig,
    /// Pause between consecutive actions of a sequence.
    pub settle_delay: Duration,
    pub reconnect_delay: Duration,
}

impl AgentConfig {
    #[must_use]
    pub fn new(relay_url: impl Into<String>, access_code: impl Into<String>) -> Self {
        Self {
            relay_url: relay_url.into(),
            access_code: access_code.into(),
            stream: StreamConfig::default(),
            settle_delay: DEFAULT_SETTLE_DELAY,
            reconnect_delay: Duration::from_secs(5),
        }
    }

    /// Endpoint with the access code and agent role in the query string.
    #[must_use]
    pub fn connect_url(&self) -> String {
        let separator = if self.relay_url.contains('?') { '&' } else { '?' };
        format!(
            "{}{separator}code={}&client_type=agent",
            self.relay_url,
            urlencoding::encode(&self.access_code)
        )
    }
}

/// Work queued for the serial job worker.
#[derive(Debug)]
enum Job {
    Sequence(Vec<RawAction>),
    /// Legacy bare action, answered with `command_result`.
    Single(RawAction),
}

/// Desktop agent connected to a relay.
pub struct AgentRuntime {
    config: AgentConfig,
    engine: Arc<ExecutionEngine>,
    screen: Arc<dyn ScreenSource>,
}

impl AgentRuntime {
    #[must_use]
    pub fn new(config: AgentConfig, effector: Arc<dyn Effector>, screen: Arc<dyn ScreenSource>) -> Self {
        let engine = ExecutionEngine::new(effector).with_settle_delay(config.settle_delay);
        Self {
            config,
            engine: Arc::new(engine),
            screen,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Stay connected until `shutdown` fires, reconnecting after drops.
    ///
    /// # Errors
    /// Returns [`AgentError::TakenOver`] once a newer agent claims the access
    /// code; reconnecting would only take it back.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), AgentError> {
        loop {
            match self.connect_once(&shutdown).await {
                Ok(()) => tracing::info!("Disconnected from relay"),
                Err(AgentError::TakenOver) => {
                    tracing::warn!("Another agent took over this access code, not reconnecting");
                    return Err(AgentError::TakenOver);
                }
                Err(e) => tracing::warn!("Relay connection failed: {e}"),
            }

            if shutdown.is_cancelled() {
                break;
            }
            tracing::info!(delay = ?self.config.reconnect_delay, "Reconnecting");
            tokio::select! {
                () = shutdown.cancelled() => break,
                () = sleep(self.config.reconnect_delay) => {}
            }
        }
        tracing::info!("Agent stopped");
        Ok(())
    }

    /// Serve a single connection until it closes or `shutdown` fires.
    ///
    /// # Errors
    /// Returns error if the handshake fails, the socket breaks, or the relay
    /// hands the session to a newer agent.
    pub async fn connect_once(&self, shutdown: &CancellationToken) -> Result<(), AgentError> {
        let url = self.config.connect_url();
        tracing::info!(url = %self.config.relay_url, "Connecting to relay");
        let (socket, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
        tracing::info!(code = %self.config.access_code, "Connected to relay");

        let (mut sink, mut stream) = socket.split();
        let (out, mut out_rx) = outbound::channel();
        let conn = shutdown.child_token();

        let writer = tokio::spawn({
            let conn = conn.clone();
            async move {
                loop {
                    let message = tokio::select! {
                        () = conn.cancelled() => break,
                        message = out_rx.recv() => message,
                    };
                    let Some(message) = message else { break };
                    if let Err(e) = sink.send(WsMessage::Text(message.to_text().into())).await {
                        tracing::debug!("Socket write failed: {e}");
                        conn.cancel();
                        break;
                    }
                }
                let _ = sink.close().await;
            }
        });

        let (streamer, fps) = ScreenStreamer::new(self.screen.clone(), self.config.stream.clone());
        let streaming = tokio::spawn(streamer.run(Arc::new(out.clone()), conn.clone()));

        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_jobs(self.engine.clone(), jobs_rx, out.clone()));

        let dispatcher = Dispatcher {
            jobs: jobs_tx,
            fps,
            out,
        };

        let result = loop {
            let frame = tokio::select! {
                () = conn.cancelled() => break Ok(()),
                frame = stream.next() => frame,
            };

            match frame {
                Some(Ok(WsMessage::Text(text))) => dispatcher.dispatch(text.as_str()),
                Some(Ok(WsMessage::Binary(data))) => match std::str::from_utf8(&data) {
                    Ok(text) => dispatcher.dispatch(text),
                    Err(_) => dispatcher.reply(Message::error("Binary frames must be UTF-8 JSON")),
                },
                Some(Ok(WsMessage::Close(Some(close)))) if u16::from(close.code) == TAKEN_OVER_CLOSE_CODE => {
                    break Err(AgentError::TakenOver);
                }
                Some(Ok(WsMessage::Close(_))) | None => break Ok(()),
                Some(Ok(_)) => {}
                Some(Err(e)) => break Err(AgentError::from(e)),
            }
        };

        // Losing the connection abandons the running sequence.
        conn.cancel();
        worker.abort();
        drop(dispatcher);
        let _ = streaming.await;
        let _ = writer.await;

        result
    }
}

/// Routes decoded relay messages on one connection.
struct Dispatcher {
    jobs: mpsc::UnboundedSender<Job>,
    fps: FpsControl,
    out: OutboundSender,
}

impl Dispatcher {
    fn dispatch(&self, text: &str) {
        let message: Message = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("Invalid message from relay: {e}");
                self.reply(Message::error(format!("Invalid message: {e}")));
                return;
            }
        };

        match message {
            Message::ExecuteSequence { actions } => {
                tracing::info!(count = actions.len(), "Sequence received");
                self.enqueue(Job::Sequence(actions));
            }
            Message::Command {
                command: CommandPayload::Action(action),
            } => self.enqueue(Job::Single(action)),
            Message::Command {
                command: CommandPayload::Text(_),
            } => self.reply(Message::error("Text commands must be decomposed by the relay")),
            Message::SetFps { fps } => {
                if let Err(e) = self.fps.set(fps) {
                    tracing::warn!("Ignoring set_fps: {e}");
                }
            }
            Message::PeerDisconnected { role } => tracing::info!(%role, "Peer disconnected"),
            other => tracing::debug!(kind = other.kind(), "Ignoring message"),
        }
    }

    fn enqueue(&self, job: Job) {
        if self.jobs.send(job).is_err() {
            tracing::warn!("Job worker stopped, dropping job");
        }
    }

    fn reply(&self, message: Message) {
        if self.out.send(message).is_err() {
            tracing::debug!("Outbound queue closed");
        }
    }
}

async fn run_jobs(engine: Arc<ExecutionEngine>, mut jobs: mpsc::UnboundedReceiver<Job>, out: OutboundSender) {
    while let Some(job) = jobs.recv().await {
        let delivered = match job {
            Job::Sequence(actions) => engine.run(ActionSequence::new(actions), &out).await.is_ok(),
            Job::Single(action) => {
                let result = engine.execute(&action).await;
                out.send(Message::CommandResult { result }).is_ok()
            }
        };
        if !delivered {
            tracing::debug!("Outbound queue closed, job worker stopping");
            break;
        }
    }
}
