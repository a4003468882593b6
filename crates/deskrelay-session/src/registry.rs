//! Session registry: at most one web peer and one agent peer per access code.

use std::{fmt, str::FromStr, sync::Arc};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use uuid::Uuid;

/// Peer identifier, unique per connection.
pub type PeerId = Uuid;

/// Which end of a session a peer is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerRole {
    /// Remote controller.
    #[default]
    Web,
    /// Controlled machine.
    Agent,
}

impl PeerRole {
    /// The role on the other end of the session.
    #[must_use]
    pub const fn counterpart(self) -> Self {
        match self {
            Self::Web => Self::Agent,
            Self::Agent => Self::Web,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Web => "web",
            Self::Agent => "agent",
        }
    }
}

impl fmt::Display for PeerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown role name.
#[derive(Debug, thiserror::Error)]
#[error("Unknown peer role: {0}")]
pub struct UnknownRole(String);

impl FromStr for PeerRole {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "web" => Ok(Self::Web),
            "agent" => Ok(Self::Agent),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

/// Handle used to deliver text messages to one connected peer.
///
/// Messages go through one in-order lane, so delivery order to a peer matches
/// send order. Screen frames use a separate one-slot lane where a newer frame
/// replaces one the peer has not taken yet.
#[derive(Debug, Clone)]
pub struct PeerHandle {
    id: PeerId,
    tx: mpsc::UnboundedSender<String>,
    frames: Arc<watch::Sender<Option<String>>>,
    evict: CancellationToken,
}

impl PeerHandle {
    /// Create a handle and the receiver its connection drains.
    #[must_use]
    pub fn new() -> (Self, PeerReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (frames_tx, frames_rx) = watch::channel(None);
        let handle = Self {
            id: Uuid::new_v4(),
            tx,
            frames: Arc::new(frames_tx),
            evict: CancellationToken::new(),
        };
        let receiver = PeerReceiver {
            reliable: rx,
            frames: frames_rx,
            frames_open: true,
        };
        (handle, receiver)
    }

    #[must_use]
    pub const fn id(&self) -> PeerId {
        self.id
    }

    /// Queue a message. Returns false if the connection is gone.
    pub fn deliver(&self, text: impl Into<String>) -> bool {
        self.tx.send(text.into()).is_ok()
    }

    /// Offer a screen frame, dropping any frame still waiting to be written.
    ///
    /// Returns false if the connection is gone.
    pub fn deliver_frame(&self, text: impl Into<String>) -> bool {
        if self.frames.is_closed() {
            return false;
        }
        self.frames.send_replace(Some(text.into()));
        true
    }

    /// Ask the owning connection to shut down.
    pub fn evict(&self) {
        self.evict.cancel();
    }

    #[must_use]
    pub fn is_evicted(&self) -> bool {
        self.evict.is_cancelled()
    }

    /// Resolves once [`evict`](Self::evict) has been called.
    pub fn evicted(&self) -> WaitForCancellationFuture<'_> {
        self.evict.cancelled()
    }
}

/// Receiving side of a [`PeerHandle`], drained by the peer's socket writer.
#[derive(Debug)]
pub struct PeerReceiver {
    reliable: mpsc::UnboundedReceiver<String>,
    frames: watch::Receiver<Option<String>>,
    frames_open: bool,
}

impl PeerReceiver {
    /// Next message to write, preferring queued messages over the frame slot.
    ///
    /// Returns `None` once every handle is dropped and messages are drained.
    pub async fn recv(&mut self) -> Option<String> {
        loop {
            tokio::select! {
                biased;
                text = self.reliable.recv() => return text,
                changed = self.frames.changed(), if self.frames_open => {
                    if changed.is_err() {
                        self.frames_open = false;
                        continue;
                    }
                    if let Some(frame) = self.frames.borrow_and_update().clone() {
                        return Some(frame);
                    }
                }
            }
        }
    }

    /// Take a ready message without waiting.
    pub fn try_recv(&mut self) -> Option<String> {
        if let Ok(text) = self.reliable.try_recv() {
            return Some(text);
        }
        if self.frames.has_changed().unwrap_or(false) {
            return self.frames.borrow_and_update().clone();
        }
        None
    }
}

#[derive(Debug, Default)]
struct Slots {
    web: Option<PeerHandle>,
    agent: Option<PeerHandle>,
}

impl Slots {
    const fn slot(&self, role: PeerRole) -> &Option<PeerHandle> {
        match role {
            PeerRole::Web => &self.web,
            PeerRole::Agent => &self.agent,
        }
    }

    const fn slot_mut(&mut self, role: PeerRole) -> &mut Option<PeerHandle> {
        match role {
            PeerRole::Web => &mut self.web,
            PeerRole::Agent => &mut self.agent,
        }
    }

    const fn is_empty(&self) -> bool {
        self.web.is_none() && self.agent.is_none()
    }
}

/// Maps access codes to their web and agent peers.
///
/// Sessions are created on first connect and dropped once both slots are
/// empty. Routing to an empty slot is a silent no-op.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, Slots>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handle` under `(code, role)`.
    ///
    /// Returns the handle previously held by that slot, if any.
    pub fn connect(&self, code: &str, role: PeerRole, handle: PeerHandle) -> Option<PeerHandle> {
        let peer = handle.id();
        let displaced = self
            .sessions
            .entry(code.to_string())
            .or_default()
            .slot_mut(role)
            .replace(handle);

        match &displaced {
            Some(old) => tracing::info!(code, %role, %peer, displaced = %old.id(), "Peer replaced"),
            None => tracing::info!(code, %role, %peer, "Peer connected"),
        }
        displaced
    }

    /// Remove whatever handle occupies `(code, role)`.
    pub fn disconnect(&self, code: &str, role: PeerRole) -> Option<PeerHandle> {
        self.remove_where(code, role, |_| true)
    }

    /// Remove the handle for `(code, role)` only if it is still `peer`.
    ///
    /// A connection that was displaced by a newer one must not unregister
    /// its successor.
    pub fn disconnect_peer(&self, code: &str, role: PeerRole, peer: PeerId) -> bool {
        self.remove_where(code, role, |h| h.id() == peer).is_some()
    }

    fn remove_where(
        &self,
        code: &str,
        role: PeerRole,
        matches: impl FnOnce(&PeerHandle) -> bool,
    ) -> Option<PeerHandle> {
        let removed = {
            let mut slots = self.sessions.get_mut(code)?;
            let slot = slots.slot_mut(role);
            if slot.as_ref().is_some_and(matches) {
                slot.take()
            } else {
                None
            }
        };
        self.sessions.remove_if(code, |_, slots| slots.is_empty());

        if let Some(handle) = &removed {
            tracing::info!(code, %role, peer = %handle.id(), "Peer disconnected");
        }
        removed
    }

    /// Deliver `text` to the peer at `(code, role)`.
    ///
    /// Returns whether a live peer accepted it; absent peers drop the message.
    pub fn route(&self, code: &str, role: PeerRole, text: impl Into<String>) -> bool {
        let Some(handle) = self.peer(code, role) else {
            tracing::trace!(code, %role, "No peer, message dropped");
            return false;
        };
        handle.deliver(text)
    }

    /// Offer a screen frame to the peer at `(code, role)`.
    ///
    /// Only the latest undelivered frame is kept per peer.
    pub fn route_frame(&self, code: &str, role: PeerRole, text: impl Into<String>) -> bool {
        let Some(handle) = self.peer(code, role) else {
            tracing::trace!(code, %role, "No peer, frame dropped");
            return false;
        };
        handle.deliver_frame(text)
    }

    /// Current handle for `(code, role)`.
    #[must_use]
    pub fn peer(&self, code: &str, role: PeerRole) -> Option<PeerHandle> {
        self.sessions
            .get(code)
            .and_then(|slots| slots.slot(role).clone())
    }

    #[must_use]
    pub fn is_connected(&self, code: &str, role: PeerRole) -> bool {
        self.sessions
            .get(code)
            .is_some_and(|slots| slots.slot(role).is_some())
    }

    /// Number of connected peers with `role` across all sessions.
    #[must_use]
    pub fn peer_count(&self, role: PeerRole) -> usize {
        self.sessions
            .iter()
            .filter(|entry| entry.value().slot(role).is_some())
            .count()
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}
