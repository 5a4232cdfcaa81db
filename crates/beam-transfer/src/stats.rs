//! Download progress, shared between the transfer task and whoever renders it.
//! All fields are atomic for lock-free reads.

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time progress of a client session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub received_bytes: u64,
    pub total_bytes: u64,
    pub received_chunks: u64,
    pub total_chunks: u64,
    pub rounds: u32,
}

impl Progress {
    /// Fraction 0.0 - 1.0.
    pub fn fraction(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        (self.received_bytes as f64 / self.total_bytes as f64).min(1.0)
    }
}

#[derive(Debug, Default)]
pub struct TransferProgress {
    pub total_bytes: AtomicU64,
    pub total_chunks: AtomicU64,
    pub received_bytes: AtomicU64,
    pub received_chunks: AtomicU64,
    pub rounds: AtomicU64,
    pub reconnects: AtomicU64,
}

impl TransferProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, progress: &Progress) {
        self.total_bytes.store(progress.total_bytes, Ordering::Relaxed);
        self.total_chunks.store(progress.total_chunks, Ordering::Relaxed);
        self.received_bytes.store(progress.received_bytes, Ordering::Relaxed);
        self.received_chunks.store(progress.received_chunks, Ordering::Relaxed);
        self.rounds.store(progress.rounds as u64, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> Progress {
        Progress {
            received_bytes: self.received_bytes.load(Ordering::Relaxed),
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            received_chunks: self.received_chunks.load(Ordering::Relaxed),
            total_chunks: self.total_chunks.load(Ordering::Relaxed),
            rounds: self.rounds.load(Ordering::Relaxed) as u32,
        }
    }

    /// Progress as a fraction 0.0 - 1.0.
    pub fn fraction(&self) -> f64 {
        self.snapshot().fraction()
    }
}
