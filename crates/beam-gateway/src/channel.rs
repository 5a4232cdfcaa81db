use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use beam_transfer::ChannelEvent;
use beam_types::PeerMessage;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

/// What the session side hands to the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Message(PeerMessage),
    /// Flush what was queued before, then close.
    Close,
}

#[derive(Debug, Error)]
#[error("channel is closed")]
pub struct ChannelClosed;

/// Session end of a bidirectional peer channel.
///
/// Dropping a `Channel` without calling [`close`](Self::close) abandons it:
/// the transport stops delivering whatever was still queued.
pub struct Channel {
    id: Uuid,
    outbound: mpsc::UnboundedSender<Outbound>,
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    abandoned: Arc<AtomicBool>,
    closed: bool,
}

/// Transport end of a [`Channel`]: feeds it events, drains its sends.
pub struct TransportSide {
    pub(crate) events: mpsc::UnboundedSender<ChannelEvent>,
    outbound: mpsc::UnboundedReceiver<Outbound>,
    abandoned: Arc<AtomicBool>,
}

impl Channel {
    pub fn new() -> (Self, TransportSide) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let abandoned = Arc::new(AtomicBool::new(false));
        (
            Self {
                id: Uuid::new_v4(),
                outbound: out_tx,
                events: event_rx,
                abandoned: abandoned.clone(),
                closed: false,
            },
            TransportSide {
                events: event_tx,
                outbound: out_rx,
                abandoned,
            },
        )
    }

    /// Unique per channel, unlike the peer identity on either end.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Best-effort, in-order send.
    pub fn send(&self, message: PeerMessage) -> Result<(), ChannelClosed> {
        if self.closed {
            return Err(ChannelClosed);
        }
        self.outbound
            .send(Outbound::Message(message))
            .map_err(|_| ChannelClosed)
    }

    /// Graceful close: everything already sent is still delivered.
    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            let _ = self.outbound.send(Outbound::Close);
        }
    }

    /// Next event from the transport. `None` once the transport is gone.
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        self.events.recv().await
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        if !self.closed {
            self.abandoned.store(true, Ordering::Release);
        }
    }
}

impl TransportSide {
    /// Report an event to the session. False once nobody is listening.
    pub fn emit(&self, event: ChannelEvent) -> bool {
        self.events.send(event).is_ok()
    }

    /// Next queued send. `None` when the session closed without a goodbye,
    /// in which case anything still queued is discarded.
    pub async fn next_outbound(&mut self) -> Option<Outbound> {
        let next = self.outbound.recv().await?;
        if self.abandoned.load(Ordering::Acquire) {
            return None;
        }
        Some(next)
    }
}
