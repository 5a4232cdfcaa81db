//! Structured transfer logging.
//!
//! Runtimes report lifecycle events through a [`TransferLogger`] so embedders
//! can route them to `tracing`, a test collector, or nowhere.

use std::fmt;
use std::sync::Mutex;

use beam_types::PeerId;

/// Structured log entry for a transfer operation.
#[derive(Debug, Clone)]
pub struct TransferLog {
    pub component: &'static str,
    pub peer: PeerId,
    pub event: TransferEvent,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    /// A channel to the peer opened.
    Connected,
    /// A newer connection from the same peer displaced the old one.
    Replaced,
    /// Metadata announced to the peer (server) or learned from it (client).
    Announced { name: Option<String>, size: Option<u64> },
    /// Server: answered one seek.
    SeekServed { chunks: usize, bytes: u64 },
    /// Client: asked for the chunks still missing.
    RepairRound { round: u32, missing: usize },
    /// Client: every chunk is in.
    TransferComplete {
        total_bytes: u64,
        duration_ms: i64,
        rounds: u32,
    },
    /// Server: client acknowledged the file.
    ClientDone { bytes_sent: u64 },
    /// Client: waiting before a reconnect.
    Reconnecting { attempt: u32, delay_ms: u64 },
    /// The connection ended.
    Closed { status: &'static str },
    Error { message: String },
}

impl fmt::Display for TransferEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected => write!(f, "connected"),
            Self::Replaced => write!(f, "replaced by newer connection"),
            Self::Announced { name, size } => match (name, size) {
                (Some(name), Some(size)) => write!(f, "announced name={} size={}", name, size),
                _ => write!(f, "announced no file"),
            },
            Self::SeekServed { chunks, bytes } => {
                write!(f, "seek_served chunks={} bytes={}", chunks, bytes)
            }
            Self::RepairRound { round, missing } => {
                write!(f, "repair_round round={} missing={}", round, missing)
            }
            Self::TransferComplete { total_bytes, duration_ms, rounds } => {
                write!(
                    f,
                    "transfer_complete bytes={} duration_ms={} rounds={}",
                    total_bytes, duration_ms, rounds
                )
            }
            Self::ClientDone { bytes_sent } => write!(f, "client_done bytes_sent={}", bytes_sent),
            Self::Reconnecting { attempt, delay_ms } => {
                write!(f, "reconnecting attempt={} delay_ms={}", attempt, delay_ms)
            }
            Self::Closed { status } => write!(f, "closed status={}", status),
            Self::Error { message } => write!(f, "error: {}", message),
        }
    }
}

pub trait TransferLogger: Send + Sync {
    fn log(&self, entry: TransferLog);
}

/// Logger that uses the `tracing` crate.
pub struct TracingLogger;

impl TransferLogger for TracingLogger {
    fn log(&self, entry: TransferLog) {
        // Per-round chatter goes to debug
        match &entry.event {
            TransferEvent::SeekServed { .. } | TransferEvent::RepairRound { .. } => {
                tracing::debug!(component = entry.component, peer = %entry.peer, "{}", entry.event);
            }
            TransferEvent::Error { .. } | TransferEvent::Reconnecting { .. } => {
                tracing::warn!(component = entry.component, peer = %entry.peer, "{}", entry.event);
            }
            _ => {
                tracing::info!(component = entry.component, peer = %entry.peer, "{}", entry.event);
            }
        }
    }
}

/// No-op logger that discards all log entries.
pub struct NullLogger;

impl TransferLogger for NullLogger {
    fn log(&self, _entry: TransferLog) {}
}

/// Keeps every entry in memory.
#[derive(Default)]
pub struct CollectingLogger {
    entries: Mutex<Vec<TransferLog>>,
}

impl CollectingLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TransferEvent> {
        match self.entries.lock() {
            Ok(entries) => entries.iter().map(|e| e.event.clone()).collect(),
            Err(poisoned) => poisoned.get_ref().iter().map(|e| e.event.clone()).collect(),
        }
    }
}

impl TransferLogger for CollectingLogger {
    fn log(&self, entry: TransferLog) {
        match self.entries.lock() {
            Ok(mut entries) => entries.push(entry),
            Err(poisoned) => poisoned.into_inner().push(entry),
        }
    }
}
