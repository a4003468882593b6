//! Ordered, best-effort execution of action sequences.

use std::{panic::AssertUnwindSafe, sync::Arc, time::Duration};

use deskrelay_core::{
    ActionResult, Effector, RawAction, ReportSink, SequenceEvent, StepReport, TransportError,
};
use futures::FutureExt;

/// Pause between consecutive actions so the UI can catch up.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(300);

/// Lifecycle of a sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceState {
    Pending,
    Running,
    Completed,
}

/// An ordered list of actions, consumed once by [`ExecutionEngine::run`].
#[derive(Debug, Clone)]
pub struct ActionSequence {
    actions: Vec<RawAction>,
    state: SequenceState,
}

impl ActionSequence {
    #[must_use]
    pub const fn new(actions: Vec<RawAction>) -> Self {
        Self {
            actions,
            state: SequenceState::Pending,
        }
    }

    #[must_use]
    pub fn single(action: RawAction) -> Self {
        Self::new(vec![action])
    }

    #[must_use]
    pub const fn state(&self) -> SequenceState {
        self.state
    }

    #[must_use]
    pub fn actions(&self) -> &[RawAction] {
        &self.actions
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    fn transition(&mut self, next: SequenceState) {
        tracing::debug!(from = ?self.state, to = ?next, total = self.actions.len(), "Sequence state");
        self.state = next;
    }
}

/// Executes actions through an [`Effector`], one at a time.
///
/// Failures never stop a sequence: each one becomes an error result and the
/// next action still runs.
#[derive(Clone)]
pub struct ExecutionEngine {
    effector: Arc<dyn Effector>,
    settle_delay: Duration,
}

impl ExecutionEngine {
    #[must_use]
    pub fn new(effector: Arc<dyn Effector>) -> Self {
        Self {
            effector,
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }

    #[must_use]
    pub const fn with_settle_delay(mut self, settle_delay: Duration) -> Self {
        self.settle_delay = settle_delay;
        self
    }

    #[must_use]
    pub const fn settle_delay(&self) -> Duration {
        self.settle_delay
    }

    /// Validate and perform one action.
    pub async fn execute(&self, raw: &RawAction) -> ActionResult {
        let action = match raw.validate() {
            Ok(action) => action,
            Err(e) => {
                tracing::warn!(kind = %raw.kind, "Invalid action: {e}");
                return ActionResult::error(e.to_string());
            }
        };

        if let Some(duration) = action.wait_duration() {
            tokio::time::sleep(duration).await;
            return ActionResult::success(action.summary());
        }

        let outcome = AssertUnwindSafe(self.effector.perform(&action))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(())) => ActionResult::success(action.summary()),
            Ok(Err(e)) => {
                tracing::warn!(kind = %action.kind(), "Action failed: {e}");
                ActionResult::error(e.to_string())
            }
            Err(_) => {
                tracing::error!(kind = %action.kind(), "Effector panicked");
                ActionResult::error(format!("{} failed: effector panicked", action.kind()))
            }
        }
    }

    /// Run a sequence to completion, reporting each step as it finishes.
    ///
    /// Emits one `Step` event per action in input order, then a single
    /// `Completed` event with every result.
    ///
    /// # Errors
    /// Returns error if the report sink is gone; remaining actions are skipped.
    pub async fn run(
        &self,
        mut sequence: ActionSequence,
        sink: &dyn ReportSink,
    ) -> Result<Vec<ActionResult>, TransportError> {
        sequence.transition(SequenceState::Running);
        let total = sequence.len();
        let mut results = Vec::with_capacity(total);

        for (index, raw) in sequence.actions.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(self.settle_delay).await;
            }
            let step = index + 1;
            tracing::info!(step, total, kind = %raw.kind, "Executing step");

            let result = self.execute(raw).await;
            results.push(result.clone());
            sink.report(SequenceEvent::Step(StepReport {
                step,
                total,
                action: raw.clone(),
                result,
            }))?;
        }

        sequence.transition(SequenceState::Completed);
        let failed = results.iter().filter(|r| !r.is_success()).count();
        sink.report(SequenceEvent::Completed {
            results: results.clone(),
        })?;
        tracing::info!(total, failed, "Sequence completed");

        Ok(results)
    }
}
