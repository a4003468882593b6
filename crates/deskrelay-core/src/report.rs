//! Progress events and frames produced on the agent.

use serde::{Deserialize, Serialize};

use crate::action::{ActionResult, RawAction};

/// Progress for one step of a running sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    /// 1-based position of the step.
    pub step: usize,
    pub total: usize,
    pub action: RawAction,
    pub result: ActionResult,
}

/// Event emitted while a sequence runs.
///
/// A sequence of N actions yields exactly N `Step` events in input order,
/// followed by one `Completed` event carrying the N results in the same order.
#[derive(Debug, Clone, PartialEq)]
pub enum SequenceEvent {
    Step(StepReport),
    Completed { results: Vec<ActionResult> },
}

/// One captured, compressed screen image.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Encoded image bytes (JPEG).
    pub image: Vec<u8>,
    /// Seconds on a monotonic clock since streaming started.
    pub timestamp: f64,
}
