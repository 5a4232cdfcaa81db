use std::time::Duration;

use beam_types::{FileMetadata, PeerId, PeerMessage};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::time::Instant;

use super::{ChannelEvent, ConnectionRecord, ConnectionStatus, Effect, Role};
use crate::assembly::{AssemblyBuffer, CompletedDownload};
use crate::config::TransferConfig;
use crate::error::{ProtocolViolation, TransferError};
use crate::received::ReceivedSet;
use crate::stats::Progress;

/// Client side of a download.
///
/// The session outlives individual connections: after a transient failure
/// the runtime calls [`reattach`](Self::reattach) with a fresh channel and the
/// partially assembled file is resumed by seeking only the missing chunks.
#[derive(Debug)]
pub struct ClientSession {
    target: PeerId,
    record: ConnectionRecord,
    liveness_timeout: Duration,
    auto_start: bool,
    max_stalled_rounds: u32,
    max_file_size: u64,
    transfer: Option<Transfer>,
    completed: Option<CompletedDownload>,
    finished: Progress,
}

#[derive(Debug)]
struct Transfer {
    buffer: AssemblyBuffer,
    received: ReceivedSet,
    download_start: Option<DateTime<Utc>>,
    rounds: u32,
    stalled_rounds: u32,
    progress_mark: u64,
}

impl Transfer {
    fn new(buffer: AssemblyBuffer) -> Self {
        let received = ReceivedSet::new(buffer.layout());
        Self {
            buffer,
            received,
            download_start: None,
            rounds: 0,
            stalled_rounds: 0,
            progress_mark: 0,
        }
    }

    fn progress(&self) -> Progress {
        Progress {
            received_bytes: self.received.received_bytes(),
            total_bytes: self.buffer.metadata().size,
            received_chunks: self.received.received(),
            total_chunks: self.received.total(),
            rounds: self.rounds,
        }
    }
}

impl ClientSession {
    pub fn new(target: PeerId, config: &TransferConfig, now: Instant) -> Self {
        Self {
            target,
            record: ConnectionRecord::new(target, config.liveness_timeout, now),
            liveness_timeout: config.liveness_timeout,
            auto_start: config.auto_start,
            max_stalled_rounds: config.max_stalled_rounds,
            max_file_size: config.max_file_size,
            transfer: None,
            completed: None,
            finished: Progress::default(),
        }
    }

    pub fn target(&self) -> PeerId {
        self.target
    }

    pub fn record(&self) -> &ConnectionRecord {
        &self.record
    }

    pub fn status(&self) -> ConnectionStatus {
        self.record.status
    }

    /// Metadata of the file being assembled.
    pub fn metadata(&self) -> Option<&FileMetadata> {
        self.transfer.as_ref().map(|t| t.buffer.metadata())
    }

    /// Connected but the server has no file to offer yet.
    pub fn is_waiting(&self) -> bool {
        self.record.connected && self.transfer.is_none() && self.completed.is_none()
    }

    /// Buffer allocated and no request outstanding.
    pub fn is_ready_to_download(&self) -> bool {
        self.transfer.is_some() && self.record.status == ConnectionStatus::Ready
    }

    pub fn progress(&self) -> Progress {
        match &self.transfer {
            Some(transfer) => transfer.progress(),
            None => self.finished,
        }
    }

    /// Take the finished file. Yields it once.
    pub fn take_download(&mut self) -> Option<CompletedDownload> {
        self.completed.take()
    }

    /// Begin a new connection attempt, keeping whatever was already assembled.
    pub fn reattach(&mut self, now: Instant) {
        if self.record.status == ConnectionStatus::Done {
            return;
        }
        self.record = ConnectionRecord::new(self.target, self.liveness_timeout, now);
    }

    pub fn handle(
        &mut self,
        event: ChannelEvent,
        now: Instant,
    ) -> Result<Vec<Effect>, TransferError> {
        if self.record.status.is_terminal() {
            return Ok(Vec::new());
        }
        match event {
            ChannelEvent::Opened => {
                self.record.open(now);
                Ok(Vec::new())
            }
            ChannelEvent::Received(message) => {
                self.record.touch(now);
                self.on_message(message)
            }
            ChannelEvent::Malformed(reason) => {
                Err(self.violation(ProtocolViolation::Malformed(reason)))
            }
            ChannelEvent::Closed => {
                self.record.end(ConnectionStatus::Disconnected);
                Err(TransferError::PeerDisappeared)
            }
            ChannelEvent::Errored(kind) => Err(self.record.transport_error(kind)),
        }
    }

    pub fn tick(&mut self, now: Instant) -> Result<Vec<Effect>, TransferError> {
        self.record.watchdog(now)
    }

    /// Request the file. With nothing received yet this asks for every
    /// chunk; on a resumed transfer it asks only for what is missing.
    pub fn start(&mut self) -> Result<Vec<Effect>, TransferError> {
        if !self.record.connected {
            return Err(TransferError::NotReady);
        }
        let Some(transfer) = self.transfer.as_mut() else {
            return Err(TransferError::NotReady);
        };
        if self.record.status == ConnectionStatus::Transferring {
            return Ok(Vec::new());
        }

        let indexes = if transfer.received.is_empty() {
            None
        } else {
            Some(transfer.received.missing())
        };
        transfer.download_start.get_or_insert_with(Utc::now);
        transfer.rounds += 1;
        self.record.status = ConnectionStatus::Transferring;
        Ok(vec![Effect::Send(PeerMessage::ClientSeek { indexes })])
    }

    fn on_message(&mut self, message: PeerMessage) -> Result<Vec<Effect>, TransferError> {
        match message {
            PeerMessage::ServerInfo { .. } => self.on_info(message.metadata()),
            PeerMessage::ServerChunk { index, bytes } => self.on_chunk(index, bytes),
            PeerMessage::ServerDone => self.on_done(),
            PeerMessage::Ping => Ok(Vec::new()),
            other => Err(self.violation(ProtocolViolation::UnexpectedMessage {
                role: Role::Client,
                kind: other.kind(),
            })),
        }
    }

    fn on_info(&mut self, metadata: Option<FileMetadata>) -> Result<Vec<Effect>, TransferError> {
        let Some(metadata) = metadata else {
            // Nothing on offer (yet); the server announces again once it has a file
            self.transfer = None;
            self.record.status = ConnectionStatus::Connecting;
            return Ok(Vec::new());
        };

        let same_file = self
            .transfer
            .as_ref()
            .is_some_and(|t| t.buffer.metadata() == &metadata);
        if same_file {
            if self.record.status == ConnectionStatus::Transferring {
                return Ok(Vec::new());
            }
        } else {
            let buffer = match AssemblyBuffer::allocate(metadata, self.max_file_size) {
                Ok(buffer) => buffer,
                Err(err) => {
                    self.record.end(ConnectionStatus::Errored);
                    return Err(err);
                }
            };
            self.transfer = Some(Transfer::new(buffer));
        }

        self.record.status = ConnectionStatus::Ready;
        if self.auto_start {
            self.start()
        } else {
            Ok(Vec::new())
        }
    }

    fn on_chunk(&mut self, index: u64, bytes: Bytes) -> Result<Vec<Effect>, TransferError> {
        let Some(transfer) = self.transfer.as_mut() else {
            return Err(self.violation(ProtocolViolation::NoMetadata("server-chunk")));
        };
        if let Err(violation) = transfer.buffer.write(index, &bytes) {
            return Err(self.violation(violation));
        }
        transfer.received.insert(index);
        Ok(Vec::new())
    }

    /// End of one round: either everything is in, or ask again for the gaps.
    fn on_done(&mut self) -> Result<Vec<Effect>, TransferError> {
        if self.record.status != ConnectionStatus::Transferring {
            return Err(self.violation(ProtocolViolation::UnexpectedMessage {
                role: Role::Client,
                kind: "server-done",
            }));
        }
        let Some(transfer) = self.transfer.as_mut() else {
            return Err(self.violation(ProtocolViolation::NoMetadata("server-done")));
        };

        let missing = transfer.received.missing();
        if missing.is_empty() {
            return Ok(self.complete());
        }

        let received = transfer.received.received();
        if received > transfer.progress_mark {
            transfer.progress_mark = received;
            transfer.stalled_rounds = 0;
        } else {
            transfer.stalled_rounds += 1;
        }
        if transfer.stalled_rounds >= self.max_stalled_rounds {
            let rounds = transfer.stalled_rounds;
            self.record.end(ConnectionStatus::Errored);
            return Err(TransferError::RepairStalled {
                rounds,
                missing: missing.len(),
            });
        }

        transfer.rounds += 1;
        Ok(vec![Effect::Send(PeerMessage::ClientSeek {
            indexes: Some(missing),
        })])
    }

    fn complete(&mut self) -> Vec<Effect> {
        let Some(transfer) = self.transfer.take() else {
            return Vec::new();
        };
        self.finished = transfer.progress();

        let finished_at = Utc::now();
        let started_at = transfer.download_start.unwrap_or(finished_at);
        let rounds = transfer.rounds;
        let (metadata, bytes) = transfer.buffer.into_parts();
        self.completed = Some(CompletedDownload {
            metadata,
            bytes,
            started_at,
            finished_at,
            rounds,
        });

        self.record.done = true;
        self.record.status = ConnectionStatus::Done;
        vec![Effect::Send(PeerMessage::ClientDone), Effect::Complete]
    }

    fn violation(&mut self, violation: ProtocolViolation) -> TransferError {
        self.record.end(ConnectionStatus::Errored);
        TransferError::Protocol(violation)
    }
}
