//! Core abstractions for the desk relay.
//!
//! This crate provides the fundamental building blocks:
//! - `RawAction` / `Action` - Action schema and validation
//! - `ActionResult`, `SequenceEvent`, `Frame` - What the agent reports
//! - Effector, Decomposer, and screen source traits

pub mod action;
pub mod report;
pub mod traits;

pub use action::{Action, ActionKind, ActionResult, ActionStatus, RawAction, ValidationError};
pub use report::{Frame, SequenceEvent, StepReport};
pub use traits::{
    CaptureError, DecompositionError, Decomposer, Effector, EffectorError, FrameSink,
    ReportSink, ScreenSource, TransportError,
};
