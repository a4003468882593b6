//! Collaborator traits and the error taxonomy around them.

use async_trait::async_trait;
use thiserror::Error;

use crate::{
    Frame,
    action::{Action, RawAction},
    report::SequenceEvent,
};

/// Effector error.
#[derive(Debug, Error)]
pub enum EffectorError {
    #[error("Unsupported on this platform: {0}")]
    Unsupported(String),
    #[error("Executable not found: {0}")]
    ExecutableNotFound(String),
    #[error("{program} exited with {status}: {stderr}")]
    CommandFailed {
        program: String,
        status: String,
        stderr: String,
    },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Other(String),
}

/// Performs the OS-level effect of a validated action.
///
/// `Action::Wait` is never handed to an effector; the execution engine
/// suspends on its own.
#[async_trait]
pub trait Effector: Send + Sync {
    /// Perform one action.
    async fn perform(&self, action: &Action) -> Result<(), EffectorError>;
}

/// Decomposition error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecompositionError {
    #[error("Command decomposition unavailable: {0}")]
    Unavailable(String),
    #[error("Failed to parse AI response: {0}")]
    Malformed(String),
    #[error("AI response contained no actions")]
    Empty,
}

/// Turns free-form instruction text into an ordered list of actions.
#[async_trait]
pub trait Decomposer: Send + Sync {
    /// Decompose an instruction.
    async fn decompose(&self, instruction: &str) -> Result<Vec<RawAction>, DecompositionError>;
}

/// Screen capture error.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("No screen capture method available")]
    Unavailable,
    #[error("Capture command failed: {0}")]
    Command(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Source of raw screenshots in any format the `image` crate can decode.
#[async_trait]
pub trait ScreenSource: Send + Sync {
    async fn capture(&self) -> Result<Vec<u8>, CaptureError>;
}

/// Transport error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Connection closed")]
    Closed,
}

/// Guaranteed, ordered delivery of sequence progress.
pub trait ReportSink: Send + Sync {
    /// Queue an event for delivery.
    ///
    /// # Errors
    /// Returns error if the connection is gone.
    fn report(&self, event: SequenceEvent) -> Result<(), TransportError>;
}

/// Lossy delivery of screen frames; a newer frame may replace an unsent one.
pub trait FrameSink: Send + Sync {
    /// Offer a frame for delivery.
    ///
    /// # Errors
    /// Returns error if the connection is gone.
    fn offer(&self, frame: Frame) -> Result<(), TransportError>;
}
