//! Transport layer for the desk relay.
//!
//! Provides:
//! - Wire protocol (JSON, base64 frames)
//! - Outbound write queue with lossy frames and reliable results
//! - Relay router over axum websockets (feature: websocket)
//! - Agent websocket client (feature: agent)

pub mod outbound;
pub mod protocol;

#[cfg(feature = "websocket")]
pub mod relay;

#[cfg(feature = "agent")]
pub mod agent;

pub use outbound::{OutboundReceiver, OutboundSender};
pub use protocol::{CommandPayload, Message, TAKEN_OVER_CLOSE_CODE};

#[cfg(feature = "websocket")]
pub use relay::{ConnectParams, Health, RelayState, relay_router};

#[cfg(feature = "agent")]
pub use agent::{AgentConfig, AgentError, AgentRuntime};
