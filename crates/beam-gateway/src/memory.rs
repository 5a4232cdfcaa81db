//! In-process transport: two [`Channel`]s joined back to back.
//!
//! Frames still go through the JSON codec, so the memory transport sees
//! exactly what a socket would. Used by tests and for embedding both roles in
//! one process.

use beam_transfer::ChannelEvent;
use beam_types::{PeerMessage, decode};
use tokio::sync::mpsc;
use tracing::trace;

use crate::channel::{Channel, Outbound, TransportSide};

/// How faithfully the memory transport delivers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeliveryProfile {
    #[default]
    Reliable,
    /// Silently drop every n-th `server-chunk`, counted over the channel's
    /// lifetime. Other messages always arrive.
    DropEveryNthChunk(u32),
}

impl DeliveryProfile {
    fn drops(&self, message: &PeerMessage, seen_chunks: &mut u64) -> bool {
        match (self, message) {
            (Self::DropEveryNthChunk(n), PeerMessage::ServerChunk { .. }) if *n > 0 => {
                *seen_chunks += 1;
                *seen_chunks % u64::from(*n) == 0
            }
            _ => false,
        }
    }
}

/// Connect two channels in memory. Both ends see `Opened` immediately.
///
/// Must be called inside a Tokio runtime.
pub fn memory_pair(profile: DeliveryProfile) -> (Channel, Channel) {
    let (left, left_side) = Channel::new();
    let (right, right_side) = Channel::new();

    left_side.emit(ChannelEvent::Opened);
    right_side.emit(ChannelEvent::Opened);

    let to_right = right_side.events.clone();
    let to_left = left_side.events.clone();
    tokio::spawn(pump(left_side, to_right, profile));
    tokio::spawn(pump(right_side, to_left, profile));

    (left, right)
}

async fn pump(
    mut from: TransportSide,
    to: mpsc::UnboundedSender<ChannelEvent>,
    profile: DeliveryProfile,
) {
    let mut seen_chunks = 0u64;
    while let Some(outbound) = from.next_outbound().await {
        let message = match outbound {
            Outbound::Message(message) => message,
            Outbound::Close => break,
        };
        if profile.drops(&message, &mut seen_chunks) {
            trace!(kind = message.kind(), "memory transport dropped frame");
            continue;
        }

        let event = match message.encode() {
            Ok(text) => match decode(&text) {
                Ok(message) => ChannelEvent::Received(message),
                Err(e) => ChannelEvent::Malformed(e.to_string()),
            },
            Err(e) => ChannelEvent::Malformed(e.to_string()),
        };
        if to.send(event).is_err() {
            break;
        }
    }
    let _ = to.send(ChannelEvent::Closed);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(index: u64) -> PeerMessage {
        PeerMessage::ServerChunk {
            index,
            bytes: vec![index as u8; 4].into(),
        }
    }

    #[tokio::test]
    async fn both_ends_open_and_exchange() {
        let (mut a, mut b) = memory_pair(DeliveryProfile::Reliable);
        assert_eq!(a.recv().await, Some(ChannelEvent::Opened));
        assert_eq!(b.recv().await, Some(ChannelEvent::Opened));

        a.send(PeerMessage::Ping).unwrap();
        assert_eq!(b.recv().await, Some(ChannelEvent::Received(PeerMessage::Ping)));
    }

    #[tokio::test]
    async fn close_reaches_the_other_end_after_pending_sends() {
        let (mut a, mut b) = memory_pair(DeliveryProfile::Reliable);
        b.recv().await;

        a.send(PeerMessage::ClientDone).unwrap();
        a.close();
        assert_eq!(b.recv().await, Some(ChannelEvent::Received(PeerMessage::ClientDone)));
        assert_eq!(b.recv().await, Some(ChannelEvent::Closed));
    }

    #[tokio::test]
    async fn lossy_profile_drops_only_chunks() {
        let (a, mut b) = memory_pair(DeliveryProfile::DropEveryNthChunk(2));
        b.recv().await;

        for index in 0..4 {
            a.send(chunk(index)).unwrap();
        }
        a.send(PeerMessage::ServerDone).unwrap();

        let mut got = Vec::new();
        while let Some(ChannelEvent::Received(msg)) = b.recv().await {
            let done = msg == PeerMessage::ServerDone;
            got.push(msg);
            if done {
                break;
            }
        }
        assert_eq!(got, vec![chunk(0), chunk(2), PeerMessage::ServerDone]);
    }
}
