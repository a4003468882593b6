//! Periodic screen capture feeding a lossy frame sink.

use std::{sync::Arc, time::Duration};

use deskrelay_core::{CaptureError, Frame, FrameSink, ScreenSource};
use thiserror::Error;
use tokio::{
    sync::watch,
    time::{Instant, sleep, sleep_until},
};
use tokio_util::sync::CancellationToken;

use crate::encode::{self, EncodeOptions};

/// Frame rate used when none (or an invalid one) is configured.
pub const DEFAULT_FPS: f64 = 5.0;

/// Highest accepted frame rate.
pub const MAX_FPS: f64 = 30.0;

/// Streaming error for a single cycle.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Capture failed: {0}")]
    Capture(#[from] CaptureError),
    #[error("Image encoding failed: {0}")]
    Image(#[from] image::ImageError),
    #[error("Encoder task failed: {0}")]
    Task(String),
}

/// Rejected frame rate.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
#[error("fps must be greater than 0 and at most {MAX_FPS}, got {0}")]
pub struct InvalidFps(pub f64);

fn check_fps(fps: f64) -> Result<f64, InvalidFps> {
    if fps.is_finite() && fps > 0.0 && fps <= MAX_FPS {
        Ok(fps)
    } else {
        Err(InvalidFps(fps))
    }
}

/// Streamer settings.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub fps: f64,
    pub encode: EncodeOptions,
    /// Pause after a failed cycle before retrying.
    pub error_backoff: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            fps: DEFAULT_FPS,
            encode: EncodeOptions::default(),
            error_backoff: Duration::from_secs(1),
        }
    }
}

/// Runtime handle for changing the frame rate of a running streamer.
#[derive(Debug, Clone)]
pub struct FpsControl {
    tx: Arc<watch::Sender<f64>>,
}

impl FpsControl {
    /// Change the target frame rate; takes effect on the current wait.
    ///
    /// # Errors
    /// Returns error if `fps` is not within (0, [`MAX_FPS`]].
    pub fn set(&self, fps: f64) -> Result<(), InvalidFps> {
        let fps = check_fps(fps)?;
        self.tx.send_replace(fps);
        tracing::info!(fps, "Frame rate set");
        Ok(())
    }

    #[must_use]
    pub fn current(&self) -> f64 {
        *self.tx.borrow()
    }
}

/// Captures, compresses, and emits frames at a target rate.
pub struct ScreenStreamer {
    source: Arc<dyn ScreenSource>,
    config: StreamConfig,
    fps: watch::Receiver<f64>,
}

impl ScreenStreamer {
    /// Create a streamer and the control used to retune it.
    #[must_use]
    pub fn new(source: Arc<dyn ScreenSource>, config: StreamConfig) -> (Self, FpsControl) {
        let fps = check_fps(config.fps).unwrap_or_else(|InvalidFps(fps)| {
            tracing::warn!(fps, default = DEFAULT_FPS, "Invalid frame rate, using default");
            DEFAULT_FPS
        });
        let (tx, rx) = watch::channel(fps);
        let streamer = Self {
            source,
            config,
            fps: rx,
        };
        (streamer, FpsControl { tx: Arc::new(tx) })
    }

    /// Stream until cancelled or the sink closes.
    ///
    /// Failed cycles are logged and retried after the back-off; they never
    /// end the loop.
    pub async fn run(mut self, sink: Arc<dyn FrameSink>, cancel: CancellationToken) {
        let epoch = Instant::now();
        tracing::info!(fps = *self.fps.borrow(), "Screen streaming started");

        loop {
            let started = Instant::now();
            let outcome = tokio::select! {
                () = cancel.cancelled() => break,
                frame = self.next_frame(started.duration_since(epoch)) => frame,
            };

            match outcome {
                Ok(frame) => {
                    if sink.offer(frame).is_err() {
                        tracing::debug!("Frame sink closed");
                        break;
                    }
                    if !self.pace(started, &cancel).await {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(backoff = ?self.config.error_backoff, "Screen streaming cycle failed: {e}");
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        () = sleep(self.config.error_backoff) => {}
                    }
                }
            }
        }

        tracing::info!("Screen streaming stopped");
    }

    async fn next_frame(&self, at: Duration) -> Result<Frame, StreamError> {
        let raw = self.source.capture().await?;
        let options = self.config.encode;
        let image = tokio::task::spawn_blocking(move || encode::compress(&raw, &options))
            .await
            .map_err(|e| StreamError::Task(e.to_string()))??;

        Ok(Frame {
            image,
            timestamp: at.as_secs_f64(),
        })
    }

    /// Sleep out the rest of the frame period. Returns false once cancelled.
    async fn pace(&mut self, started: Instant, cancel: &CancellationToken) -> bool {
        loop {
            let deadline = started + Duration::from_secs_f64(1.0 / *self.fps.borrow());
            tokio::select! {
                () = cancel.cancelled() => return false,
                () = sleep_until(deadline) => return true,
                changed = self.fps.changed() => {
                    if changed.is_err() {
                        // Control dropped: keep the current rate.
                        return tokio::select! {
                            () = cancel.cancelled() => false,
                            () = sleep_until(deadline) => true,
                        };
                    }
                }
            }
        }
    }
}
