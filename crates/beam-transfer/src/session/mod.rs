//! Per-connection protocol state machines.
//!
//! Sessions are pure: they consume [`ChannelEvent`]s plus the current time and
//! return the [`Effect`]s the runtime must carry out. They never touch a
//! socket, a timer, or a lock, which is what lets the gateway drive them from
//! a single task per connection and lets tests drive them by hand.

pub mod client;
pub mod server;

use std::fmt;
use std::time::Duration;

use beam_types::{PeerId, PeerMessage};
use tokio::time::Instant;

use crate::error::{TransferError, TransportErrorKind};
use crate::liveness::{Liveness, Pulse};

pub use client::ClientSession;
pub use server::ServerSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Server => write!(f, "server"),
            Self::Client => write!(f, "client"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Ready,
    Transferring,
    Done,
    Disconnected,
    Errored,
}

impl ConnectionStatus {
    /// Terminal records process no further events.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Disconnected | Self::Errored)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Transferring => "transferring",
            Self::Done => "done",
            Self::Disconnected => "disconnected",
            Self::Errored => "errored",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a transport reports about its channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Opened,
    Received(PeerMessage),
    /// A frame arrived that failed to decode.
    Malformed(String),
    Closed,
    Errored(TransportErrorKind),
}

/// What a session asks its runtime to do, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Send(PeerMessage),
    /// Close the channel gracefully after the preceding sends.
    Close,
    /// The download finished; take it from the session.
    Complete,
}

/// Observable state of one connection.
#[derive(Debug, Clone)]
pub struct ConnectionRecord {
    peer: PeerId,
    status: ConnectionStatus,
    connected: bool,
    liveness: Liveness,
    bytes_sent: u64,
    done: bool,
}

impl ConnectionRecord {
    pub fn new(peer: PeerId, liveness_timeout: Duration, now: Instant) -> Self {
        Self {
            peer,
            status: ConnectionStatus::Connecting,
            connected: false,
            liveness: Liveness::new(liveness_timeout, now),
            bytes_sent: 0,
            done: false,
        }
    }

    pub fn peer(&self) -> PeerId {
        self.peer
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Chunk payload bytes handed to the channel so far.
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    /// The peer acknowledged the whole file.
    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn last_activity(&self) -> Instant {
        self.liveness.last_activity()
    }

    fn open(&mut self, now: Instant) {
        self.connected = true;
        self.liveness.touch(now);
    }

    fn touch(&mut self, now: Instant) {
        self.liveness.touch(now);
    }

    fn end(&mut self, status: ConnectionStatus) {
        self.status = status;
        self.connected = false;
    }

    fn transport_error(&mut self, kind: TransportErrorKind) -> TransferError {
        self.end(ConnectionStatus::Errored);
        TransferError::Transport(kind)
    }

    /// Heartbeat step: a probe while the peer is alive, an error once it has
    /// been silent past the timeout.
    fn watchdog(&mut self, now: Instant) -> Result<Vec<Effect>, TransferError> {
        if !self.connected || self.status.is_terminal() {
            return Ok(Vec::new());
        }
        match self.liveness.check(now) {
            Pulse::Probe => Ok(vec![Effect::Send(PeerMessage::Ping)]),
            Pulse::Expired { silent_for } => {
                self.end(ConnectionStatus::Disconnected);
                Err(TransferError::LivenessTimeout { silent_for })
            }
        }
    }
}
