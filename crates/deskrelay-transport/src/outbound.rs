//! Single-writer outbound queue for one agent connection.
//!
//! Results travel on an unbounded ordered lane and are never dropped. Frames
//! go through a one-slot lane where a newer frame replaces an unsent one.

use std::sync::Arc;

use deskrelay_core::{Frame, FrameSink, ReportSink, SequenceEvent, TransportError};
use tokio::sync::{mpsc, watch};

use crate::protocol::Message;

/// Create a connected sender/receiver pair.
#[must_use]
pub fn channel() -> (OutboundSender, OutboundReceiver) {
    let (reliable_tx, reliable_rx) = mpsc::unbounded_channel();
    let (frame_tx, frame_rx) = watch::channel(None);
    (
        OutboundSender {
            reliable: reliable_tx,
            frames: Arc::new(frame_tx),
        },
        OutboundReceiver {
            reliable: reliable_rx,
            frames: frame_rx,
            frames_open: true,
        },
    )
}

/// Producer side, cloned into every task that writes to the socket.
#[derive(Debug, Clone)]
pub struct OutboundSender {
    reliable: mpsc::UnboundedSender<Message>,
    frames: Arc<watch::Sender<Option<Frame>>>,
}

impl OutboundSender {
    /// Queue a message for guaranteed, ordered delivery.
    ///
    /// # Errors
    /// Returns error if the writer has gone away.
    pub fn send(&self, message: Message) -> Result<(), TransportError> {
        self.reliable.send(message).map_err(|_| TransportError::Closed)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.reliable.is_closed()
    }
}

impl ReportSink for OutboundSender {
    fn report(&self, event: SequenceEvent) -> Result<(), TransportError> {
        self.send(Message::from(event))
    }
}

impl FrameSink for OutboundSender {
    fn offer(&self, frame: Frame) -> Result<(), TransportError> {
        if self.frames.is_closed() {
            return Err(TransportError::Closed);
        }
        self.frames.send_replace(Some(frame));
        Ok(())
    }
}

/// Consumer side, owned by the socket writer.
#[derive(Debug)]
pub struct OutboundReceiver {
    reliable: mpsc::UnboundedReceiver<Message>,
    frames: watch::Receiver<Option<Frame>>,
    frames_open: bool,
}

impl OutboundReceiver {
    /// Next message to write, preferring queued results over frames.
    ///
    /// Returns `None` once every sender is dropped and results are drained.
    pub async fn recv(&mut self) -> Option<Message> {
        loop {
            tokio::select! {
                biased;
                message = self.reliable.recv() => return message,
                changed = self.frames.changed(), if self.frames_open => {
                    if changed.is_err() {
                        self.frames_open = false;
                        continue;
                    }
                    let frame = self.frames.borrow_and_update().clone();
                    if let Some(frame) = frame {
                        return Some(Message::screen_frame(&frame));
                    }
                }
            }
        }
    }
}
