//! Session pairing for the desk relay.
//!
//! Provides:
//! - `SessionRegistry` - Access code to web/agent peer slots
//! - `PeerHandle` - Ordered message lane plus latest-frame slot for one connection

pub mod registry;

pub use registry::{PeerHandle, PeerId, PeerReceiver, PeerRole, SessionRegistry};
