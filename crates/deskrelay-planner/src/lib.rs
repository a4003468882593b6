//! Command decomposition for the desk relay.
//!
//! Provides:
//! - `OpenAiDecomposer` - Chat-completions client implementing `Decomposer`
//! - `parse_actions` - Model reply to raw action list

pub mod openai;
pub mod parse;
pub mod prompt;

pub use openai::{DEFAULT_BASE_URL, DEFAULT_MODEL, OpenAiDecomposer, PlannerConfig};
pub use parse::{parse_actions, strip_fence};
