//! Wire protocol shared by the relay, web peers, and agents.
//!
//! Every message is a JSON object whose `type` field names the variant.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use deskrelay_core::{ActionResult, Frame, RawAction, SequenceEvent};
use deskrelay_session::PeerRole;
use serde::{Deserialize, Serialize};

/// Close code for a connection displaced by a newer one with the same access
/// code and role. An agent closed with it does not reconnect.
pub const TAKEN_OVER_CLOSE_CODE: u16 = 4000;

/// Payload of a `command` message.
///
/// Web peers send free text for decomposition. Older clients send a single
/// action object, which the relay passes to the agent untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandPayload {
    Text(String),
    Action(RawAction),
}

/// Message exchanged over a relay connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Web to relay: instruction to decompose (or a legacy single action).
    Command { command: CommandPayload },
    /// Relay to agent: actions to run in order.
    ExecuteSequence { actions: Vec<RawAction> },
    /// Relay to web: acknowledgement of a decomposed command.
    CommandProcessing {
        message: String,
        actions: Vec<RawAction>,
    },
    /// Agent to web: one finished step.
    #[serde(rename = "action_result")]
    ActionProgress {
        step: usize,
        total: usize,
        action: RawAction,
        result: ActionResult,
    },
    /// Agent to web: every result of a finished sequence.
    SequenceComplete { results: Vec<ActionResult> },
    /// Agent to web: result of a legacy single action.
    CommandResult { result: ActionResult },
    /// Agent to web: base64 JPEG frame.
    ScreenFrame { data: String, timestamp: f64 },
    /// Web to agent: change the streaming rate.
    SetFps { fps: f64 },
    Error { message: String },
    /// Relay to peer: the counterpart went away.
    PeerDisconnected { role: PeerRole },
}

impl Message {
    /// Create an error message.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Acknowledgement sent to the web peer once a command is decomposed.
    #[must_use]
    pub fn processing(actions: Vec<RawAction>) -> Self {
        Self::CommandProcessing {
            message: format!("Executing {} actions...", actions.len()),
            actions,
        }
    }

    /// Create a screen frame message from an encoded frame.
    #[must_use]
    pub fn screen_frame(frame: &Frame) -> Self {
        Self::ScreenFrame {
            data: BASE64.encode(&frame.image),
            timestamp: frame.timestamp,
        }
    }

    /// Decode frame image bytes from base64.
    #[must_use]
    pub fn decode_frame(&self) -> Option<Vec<u8>> {
        if let Self::ScreenFrame { data, .. } = self {
            BASE64.decode(data).ok()
        } else {
            None
        }
    }

    /// Wire name of this message.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Command { .. } => "command",
            Self::ExecuteSequence { .. } => "execute_sequence",
            Self::CommandProcessing { .. } => "command_processing",
            Self::ActionProgress { .. } => "action_result",
            Self::SequenceComplete { .. } => "sequence_complete",
            Self::CommandResult { .. } => "command_result",
            Self::ScreenFrame { .. } => "screen_frame",
            Self::SetFps { .. } => "set_fps",
            Self::Error { .. } => "error",
            Self::PeerDisconnected { .. } => "peer_disconnected",
        }
    }

    /// Serialize to the JSON text sent on the socket.
    #[must_use]
    pub fn to_text(&self) -> String {
        // Every variant is plain data with string keys.
        serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::error!(kind = self.kind(), "Failed to serialize message: {e}");
            String::from(r#"{"type":"error","message":"internal serialization failure"}"#)
        })
    }
}

impl From<SequenceEvent> for Message {
    fn from(event: SequenceEvent) -> Self {
        match event {
            SequenceEvent::Step(report) => Self::ActionProgress {
                step: report.step,
                total: report.total,
                action: report.action,
                result: report.result,
            },
            SequenceEvent::Completed { results } => Self::SequenceComplete { results },
        }
    }
}

#[cfg(test)]
mod tests {
    use deskrelay_core::StepReport;
    use serde_json::{Value, json};

    use super::*;

    fn to_value(message: &Message) -> Value {
        serde_json::from_str(&message.to_text()).unwrap()
    }

    #[test]
    fn test_command_text_and_legacy_action() {
        let text: Message =
            serde_json::from_value(json!({"type": "command", "command": "open example.com"})).unwrap();
        assert_eq!(
            text,
            Message::Command {
                command: CommandPayload::Text("open example.com".into())
            }
        );

        let legacy: Message = serde_json::from_value(json!({
            "type": "command",
            "command": {"type": "keyboard_press", "params": {"key": "enter"}}
        }))
        .unwrap();
        let Message::Command {
            command: CommandPayload::Action(action),
        } = legacy
        else {
            panic!("expected a legacy action command");
        };
        assert_eq!(action.kind, "keyboard_press");
    }

    #[test]
    fn test_processing_ack_text() {
        let actions = vec![RawAction::new("wait", serde_json::Map::new()); 3];
        assert_eq!(
            to_value(&Message::processing(actions)),
            json!({
                "type": "command_processing",
                "message": "Executing 3 actions...",
                "actions": [
                    {"type": "wait", "params": {}},
                    {"type": "wait", "params": {}},
                    {"type": "wait", "params": {}}
                ]
            })
        );
    }

    #[test]
    fn test_step_event_uses_action_result_kind() {
        let message = Message::from(SequenceEvent::Step(StepReport {
            step: 1,
            total: 2,
            action: RawAction::new("scroll", serde_json::Map::new()),
            result: ActionResult::error("Missing parameter 'amount' for scroll"),
        }));
        let value = to_value(&message);
        assert_eq!(value["type"], "action_result");
        assert_eq!(value["step"], 1);
        assert_eq!(value["total"], 2);
        assert_eq!(value["result"]["status"], "error");
    }

    #[test]
    fn test_screen_frame_base64() {
        let frame = Frame {
            image: vec![0xFF, 0xD8, 0xFF],
            timestamp: 1.5,
        };
        let message = Message::screen_frame(&frame);
        assert_eq!(to_value(&message), json!({"type": "screen_frame", "data": "/9j/", "timestamp": 1.5}));
        assert_eq!(message.decode_frame(), Some(frame.image));
    }

    #[test]
    fn test_peer_disconnected_role() {
        assert_eq!(
            to_value(&Message::PeerDisconnected { role: PeerRole::Agent }),
            json!({"type": "peer_disconnected", "role": "agent"})
        );
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        assert!(serde_json::from_str::<Message>(r#"{"type": "reboot"}"#).is_err());
        assert!(serde_json::from_str::<Message>(r#"{"type": "set_fps", "fps": "fast"}"#).is_err());
    }
}
