//! Agent-side execution for the desk relay.
//!
//! Provides:
//! - `ExecutionEngine` - Runs action sequences in order with per-step reports
//! - `ScreenStreamer` - Paced capture, downscale, and JPEG encoding
//! - `FpsControl` - Runtime frame rate changes

pub mod encode;
pub mod engine;
pub mod streamer;

pub use encode::{EncodeOptions, compress};
pub use engine::{ActionSequence, DEFAULT_SETTLE_DELAY, ExecutionEngine, SequenceState};
pub use streamer::{
    DEFAULT_FPS, FpsControl, InvalidFps, MAX_FPS, ScreenStreamer, StreamConfig, StreamError,
};
