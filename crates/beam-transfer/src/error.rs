use std::time::Duration;

use thiserror::Error;

use crate::session::Role;

/// Failures reported by a transport while opening or running a channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportErrorKind {
    #[error("peer {0} is unavailable")]
    PeerUnavailable(String),

    #[error("signaling connection lost")]
    SignalingLost,

    #[error("network error: {0}")]
    Network(String),
}

impl TransportErrorKind {
    /// Fatal errors end the transfer; the rest are worth a reconnect.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::PeerUnavailable(_) | Self::SignalingLost)
    }
}

/// A peer broke the protocol. Always terminal for the connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    #[error("unexpected {kind} message on the {role} side")]
    UnexpectedMessage { role: Role, kind: &'static str },

    #[error("chunk index {index} is past the end of a {size}-byte file")]
    ChunkOutOfRange { index: u64, size: u64 },

    #[error("chunk index {index} is not a multiple of {chunk_size}")]
    MisalignedChunk { index: u64, chunk_size: u64 },

    #[error("chunk {index} carries {actual} bytes, expected {expected}")]
    ChunkLengthMismatch {
        index: u64,
        expected: u64,
        actual: u64,
    },

    #[error("seek received before any file was loaded")]
    NoFileLoaded,

    #[error("{0} received before file metadata")]
    NoMetadata(&'static str),

    #[error("malformed message: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("transport error: {0}")]
    Transport(TransportErrorKind),

    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),

    #[error("a {size}-byte file cannot be held in memory")]
    AllocationTooLarge { size: u64 },

    #[error("no traffic for {silent_for:?}, connection presumed dead")]
    LivenessTimeout { silent_for: Duration },

    #[error("peer disappeared")]
    PeerDisappeared,

    #[error("no repair progress after {rounds} rounds, {missing} chunks still missing")]
    RepairStalled { rounds: u32, missing: usize },

    #[error("no file has been announced yet")]
    NotReady,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransferError {
    /// Errors after which a fresh connection may still finish the transfer.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(kind) => !kind.is_fatal(),
            Self::LivenessTimeout { .. } | Self::PeerDisappeared => true,
            _ => false,
        }
    }
}

impl From<TransportErrorKind> for TransferError {
    fn from(kind: TransportErrorKind) -> Self {
        Self::Transport(kind)
    }
}
