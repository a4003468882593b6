//! Action schema shared by the relay and the agent.
//!
//! Actions travel as [`RawAction`] (a kind string plus a loose parameter map)
//! and are only turned into a typed [`Action`] right before execution, so that
//! a malformed step fails on its own instead of rejecting the whole sequence.

use std::{fmt, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Closed set of action kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    OpenUrl,
    OpenApp,
    KeyboardType,
    KeyboardPress,
    MouseClick,
    MouseMove,
    Scroll,
    Wait,
}

impl ActionKind {
    /// All kinds, in schema order.
    pub const ALL: [Self; 8] = [
        Self::OpenUrl,
        Self::OpenApp,
        Self::KeyboardType,
        Self::KeyboardPress,
        Self::MouseClick,
        Self::MouseMove,
        Self::Scroll,
        Self::Wait,
    ];

    /// Wire name of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OpenUrl => "open_url",
            Self::OpenApp => "open_app",
            Self::KeyboardType => "keyboard_type",
            Self::KeyboardPress => "keyboard_press",
            Self::MouseClick => "mouse_click",
            Self::MouseMove => "mouse_move",
            Self::Scroll => "scroll",
            Self::Wait => "wait",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ValidationError::UnknownKind(s.to_string()))
    }
}

/// Validation error for a single action.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Unknown action type: {0}")]
    UnknownKind(String),
    #[error("{kind}: missing required parameter '{param}'")]
    MissingParam { kind: ActionKind, param: &'static str },
    #[error("{kind}: parameter '{param}' must be {expected}")]
    InvalidParam {
        kind: ActionKind,
        param: &'static str,
        expected: &'static str,
    },
}

/// Action as it appears on the wire: `{"type": ..., "params": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawAction {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl RawAction {
    /// Create a raw action from a kind name and parameters.
    #[must_use]
    pub fn new(kind: impl Into<String>, params: Map<String, Value>) -> Self {
        Self {
            kind: kind.into(),
            params,
        }
    }

    /// Check the kind and parameters and build a typed [`Action`].
    ///
    /// # Errors
    /// Returns error if the kind is unknown or a required parameter is
    /// missing, mistyped, or out of range.
    pub fn validate(&self) -> Result<Action, ValidationError> {
        let kind: ActionKind = self.kind.parse()?;
        let params = Params {
            kind,
            map: &self.params,
        };

        let action = match kind {
            ActionKind::OpenUrl => Action::OpenUrl {
                url: params.non_empty_str("url")?,
            },
            ActionKind::OpenApp => Action::OpenApp {
                app: params.non_empty_str("app")?,
            },
            ActionKind::KeyboardType => Action::KeyboardType {
                text: params.str("text")?.to_string(),
            },
            ActionKind::KeyboardPress => {
                let key = params.non_empty_str("key")?;
                if key.split('+').any(|part| part.trim().is_empty()) {
                    return Err(params.invalid("key", "a key or '+'-joined chord"));
                }
                Action::KeyboardPress { key }
            }
            ActionKind::MouseClick => Action::MouseClick {
                x: params.int("x")?,
                y: params.int("y")?,
            },
            ActionKind::MouseMove => Action::MouseMove {
                x: params.int("x")?,
                y: params.int("y")?,
            },
            ActionKind::Scroll => Action::Scroll {
                amount: params.int("amount")?,
            },
            ActionKind::Wait => {
                let seconds = params.number("seconds")?;
                if seconds < 0.0 {
                    return Err(params.invalid("seconds", "a non-negative number"));
                }
                Action::Wait { seconds }
            }
        };

        Ok(action)
    }
}

struct Params<'a> {
    kind: ActionKind,
    map: &'a Map<String, Value>,
}

impl<'a> Params<'a> {
    const fn invalid(&self, param: &'static str, expected: &'static str) -> ValidationError {
        ValidationError::InvalidParam {
            kind: self.kind,
            param,
            expected,
        }
    }

    fn get(&self, param: &'static str) -> Result<&'a Value, ValidationError> {
        match self.map.get(param) {
            None | Some(Value::Null) => Err(ValidationError::MissingParam {
                kind: self.kind,
                param,
            }),
            Some(value) => Ok(value),
        }
    }

    fn str(&self, param: &'static str) -> Result<&'a str, ValidationError> {
        self.get(param)?
            .as_str()
            .ok_or_else(|| self.invalid(param, "a string"))
    }

    fn non_empty_str(&self, param: &'static str) -> Result<String, ValidationError> {
        let value = self.str(param)?.trim();
        if value.is_empty() {
            return Err(self.invalid(param, "a non-empty string"));
        }
        Ok(value.to_string())
    }

    fn int(&self, param: &'static str) -> Result<i32, ValidationError> {
        self.get(param)?
            .as_i64()
            .and_then(|v| i32::try_from(v).ok())
            .ok_or_else(|| self.invalid(param, "an integer"))
    }

    fn number(&self, param: &'static str) -> Result<f64, ValidationError> {
        self.get(param)?
            .as_f64()
            .filter(|v| v.is_finite())
            .ok_or_else(|| self.invalid(param, "a number"))
    }
}

/// A validated, immutable device action.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    OpenUrl { url: String },
    OpenApp { app: String },
    KeyboardType { text: String },
    /// Single key or `+`-joined chord such as `cmd+c`.
    KeyboardPress { key: String },
    MouseClick { x: i32, y: i32 },
    MouseMove { x: i32, y: i32 },
    /// Positive scrolls down.
    Scroll { amount: i32 },
    Wait { seconds: f64 },
}

impl Action {
    #[must_use]
    pub const fn kind(&self) -> ActionKind {
        match self {
            Self::OpenUrl { .. } => ActionKind::OpenUrl,
            Self::OpenApp { .. } => ActionKind::OpenApp,
            Self::KeyboardType { .. } => ActionKind::KeyboardType,
            Self::KeyboardPress { .. } => ActionKind::KeyboardPress,
            Self::MouseClick { .. } => ActionKind::MouseClick,
            Self::MouseMove { .. } => ActionKind::MouseMove,
            Self::Scroll { .. } => ActionKind::Scroll,
            Self::Wait { .. } => ActionKind::Wait,
        }
    }

    /// Keys of a chord, lowercased, in press order.
    #[must_use]
    pub fn chord(&self) -> Vec<String> {
        match self {
            Self::KeyboardPress { key } => key
                .split('+')
                .map(|part| part.trim().to_ascii_lowercase())
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Suspension requested by a `wait` action.
    #[must_use]
    pub fn wait_duration(&self) -> Option<Duration> {
        match self {
            Self::Wait { seconds } => Some(Duration::try_from_secs_f64(*seconds).unwrap_or(Duration::MAX)),
            _ => None,
        }
    }

    /// Human readable outcome line used in successful results.
    #[must_use]
    pub fn summary(&self) -> String {
        match self {
            Self::OpenUrl { url } => format!("Opened URL: {url}"),
            Self::OpenApp { app } => format!("Opened app: {app}"),
            Self::KeyboardType { text } => format!("Typed: {text}"),
            Self::KeyboardPress { key } => format!("Pressed: {key}"),
            Self::MouseClick { x, y } => format!("Clicked at ({x}, {y})"),
            Self::MouseMove { x, y } => format!("Moved to ({x}, {y})"),
            Self::Scroll { amount } => format!("Scrolled: {amount}"),
            Self::Wait { seconds } => format!("Waited {seconds} seconds"),
        }
    }
}

impl From<&Action> for RawAction {
    fn from(action: &Action) -> Self {
        let mut params = Map::new();
        match action {
            Action::OpenUrl { url } => {
                params.insert("url".into(), url.clone().into());
            }
            Action::OpenApp { app } => {
                params.insert("app".into(), app.clone().into());
            }
            Action::KeyboardType { text } => {
                params.insert("text".into(), text.clone().into());
            }
            Action::KeyboardPress { key } => {
                params.insert("key".into(), key.clone().into());
            }
            Action::MouseClick { x, y } | Action::MouseMove { x, y } => {
                params.insert("x".into(), (*x).into());
                params.insert("y".into(), (*y).into());
            }
            Action::Scroll { amount } => {
                params.insert("amount".into(), (*amount).into());
            }
            Action::Wait { seconds } => {
                params.insert("seconds".into(), (*seconds).into());
            }
        }
        Self::new(action.kind().as_str(), params)
    }
}

/// Outcome status of one executed action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Success,
    Error,
}

/// Result reported for every executed action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResult {
    pub status: ActionStatus,
    pub message: String,
}

impl ActionResult {
    #[must_use]
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: ActionStatus::Success,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ActionStatus::Error,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == ActionStatus::Success
    }
}
