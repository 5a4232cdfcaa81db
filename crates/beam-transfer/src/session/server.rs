use beam_types::{PeerId, PeerMessage};
use tokio::time::Instant;

use super::{ChannelEvent, ConnectionRecord, ConnectionStatus, Effect, Role};
use crate::config::TransferConfig;
use crate::error::{ProtocolViolation, TransferError};
use crate::source::SourceFile;

/// Server side of one client connection.
#[derive(Debug)]
pub struct ServerSession {
    record: ConnectionRecord,
    source: Option<SourceFile>,
    seeks: u32,
}

impl ServerSession {
    pub fn new(
        peer: PeerId,
        source: Option<SourceFile>,
        config: &TransferConfig,
        now: Instant,
    ) -> Self {
        Self {
            record: ConnectionRecord::new(peer, config.liveness_timeout, now),
            source,
            seeks: 0,
        }
    }

    pub fn record(&self) -> &ConnectionRecord {
        &self.record
    }

    pub fn status(&self) -> ConnectionStatus {
        self.record.status
    }

    /// Seeks answered on this connection.
    pub fn seeks(&self) -> u32 {
        self.seeks
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
                self.record.status = ConnectionStatus::Ready;
                Ok(vec![self.info()])
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
                Ok(Vec::new())
            }
            ChannelEvent::Errored(kind) => Err(self.record.transport_error(kind)),
        }
    }

    /// Swap the offered file. A live connection is told right away; a
    /// transfer in progress goes back to Ready so the client can start over.
    pub fn announce(&mut self, source: Option<SourceFile>) -> Vec<Effect> {
        self.source = source;
        if !self.record.connected || self.record.status.is_terminal() {
            return Vec::new();
        }
        self.record.status = ConnectionStatus::Ready;
        vec![self.info()]
    }

    pub fn tick(&mut self, now: Instant) -> Result<Vec<Effect>, TransferError> {
        self.record.watchdog(now)
    }

    /// Count a message the transport accepted. Only chunk payloads add to
    /// `bytes_sent`.
    pub fn record_sent(&mut self, message: &PeerMessage) {
        if let PeerMessage::ServerChunk { bytes, .. } = message {
            self.record.bytes_sent += bytes.len() as u64;
        }
    }

    fn on_message(&mut self, message: PeerMessage) -> Result<Vec<Effect>, TransferError> {
        match message {
            PeerMessage::ClientSeek { indexes } => self.serve(indexes),
            PeerMessage::ClientStartTransfer => self.serve(None),
            PeerMessage::ClientDone => {
                self.record.done = true;
                self.record.status = ConnectionStatus::Done;
                Ok(vec![Effect::Close])
            }
            PeerMessage::Ping => Ok(Vec::new()),
            other => Err(self.violation(ProtocolViolation::UnexpectedMessage {
                role: Role::Server,
                kind: other.kind(),
            })),
        }
    }

    /// Answer a seek: one chunk per requested index, in request order, then
    /// `server-done`. `None` means every chunk of the file.
    fn serve(&mut self, indexes: Option<Vec<u64>>) -> Result<Vec<Effect>, TransferError> {
        let targets = match self.resolve(indexes) {
            Ok(targets) => targets,
            Err(violation) => return Err(self.violation(violation)),
        };

        let mut effects = Vec::with_capacity(targets.len() + 1);
        if let Some(source) = self.source.as_ref() {
            for index in targets {
                let Some(bytes) = source.chunk(index) else {
                    continue;
                };
                effects.push(Effect::Send(PeerMessage::ServerChunk { index, bytes }));
            }
        }
        effects.push(Effect::Send(PeerMessage::ServerDone));

        self.record.status = ConnectionStatus::Transferring;
        self.seeks += 1;
        Ok(effects)
    }

    fn resolve(&self, indexes: Option<Vec<u64>>) -> Result<Vec<u64>, ProtocolViolation> {
        let source = self.source.as_ref().ok_or(ProtocolViolation::NoFileLoaded)?;
        let layout = source.layout();
        match indexes {
            None => Ok(layout.indexes().collect()),
            Some(list) => {
                for &index in &list {
                    layout.locate(index)?;
                }
                Ok(list)
            }
        }
    }

    fn info(&self) -> Effect {
        Effect::Send(PeerMessage::server_info(self.source.as_ref().map(|s| s.metadata())))
    }

    fn violation(&mut self, violation: ProtocolViolation) -> TransferError {
        self.record.end(ConnectionStatus::Errored);
        TransferError::Protocol(violation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beam_types::{CHUNK_SIZE, FileMetadata};
    use std::time::Duration;

    fn source(size: u64) -> SourceFile {
        let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
        SourceFile::new("photo.jpg", data)
    }

    fn opened(source: Option<SourceFile>) -> (ServerSession, Instant) {
        let now = Instant::now();
        let mut session =
            ServerSession::new(PeerId::generate(), source, &TransferConfig::default(), now);
        session.handle(ChannelEvent::Opened, now).unwrap();
        (session, now)
    }

    fn sent(effects: &[Effect]) -> Vec<&PeerMessage> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Send(m) => Some(m),
                _ => None,
            })
            .collect()
    }

    fn chunk_indexes(effects: &[Effect]) -> Vec<u64> {
        sent(effects)
            .into_iter()
            .filter_map(|m| match m {
                PeerMessage::ServerChunk { index, .. } => Some(*index),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn open_announces_loaded_file() {
        let now = Instant::now();
        let mut session = ServerSession::new(
            PeerId::generate(),
            Some(source(24576)),
            &TransferConfig::default(),
            now,
        );
        let effects = session.handle(ChannelEvent::Opened, now).unwrap();

        let expected = FileMetadata {
            name: "photo.jpg".into(),
            size: 24576,
        };
        assert_eq!(effects, vec![Effect::Send(PeerMessage::server_info(Some(&expected)))]);
        assert_eq!(session.status(), ConnectionStatus::Ready);
        assert!(session.record().is_connected());
    }

    #[test]
    fn open_without_file_announces_nothing() {
        let now = Instant::now();
        let mut session =
            ServerSession::new(PeerId::generate(), None, &TransferConfig::default(), now);
        let effects = session.handle(ChannelEvent::Opened, now).unwrap();
        assert_eq!(effects, vec![Effect::Send(PeerMessage::server_info(None))]);
    }

    #[test]
    fn full_seek_sends_every_chunk_then_done() {
        let (mut session, now) = opened(Some(source(24576)));
        let effects = session
            .handle(ChannelEvent::Received(PeerMessage::ClientSeek { indexes: None }), now)
            .unwrap();

        assert_eq!(chunk_indexes(&effects), vec![0, 12288]);
        assert_eq!(effects.last(), Some(&Effect::Send(PeerMessage::ServerDone)));
        assert_eq!(session.status(), ConnectionStatus::Transferring);
        assert_eq!(session.record().bytes_sent(), 0);

        for message in sent(&effects) {
            session.record_sent(message);
        }
        assert_eq!(session.record().bytes_sent(), 24576);
    }

    #[test]
    fn bytes_sent_counts_only_accepted_chunks() {
        let (mut session, now) = opened(Some(source(2 * CHUNK_SIZE + 100)));
        let effects = session
            .handle(ChannelEvent::Received(PeerMessage::ClientSeek { indexes: None }), now)
            .unwrap();

        // Transport took the first chunk, then went away
        session.record_sent(sent(&effects)[0]);
        assert_eq!(session.record().bytes_sent(), CHUNK_SIZE);

        session.record_sent(&PeerMessage::ServerDone);
        session.record_sent(&PeerMessage::Ping);
        assert_eq!(session.record().bytes_sent(), CHUNK_SIZE);
    }

    #[test]
    fn legacy_start_is_a_full_seek() {
        let (mut session, now) = opened(Some(source(CHUNK_SIZE + 1)));
        let effects = session
            .handle(ChannelEvent::Received(PeerMessage::ClientStartTransfer), now)
            .unwrap();
        assert_eq!(chunk_indexes(&effects), vec![0, CHUNK_SIZE]);
    }

    #[test]
    fn partial_seek_keeps_request_order_and_duplicates() {
        let (mut session, now) = opened(Some(source(4 * CHUNK_SIZE)));
        let request = vec![3 * CHUNK_SIZE, 0, 3 * CHUNK_SIZE];
        let effects = session
            .handle(
                ChannelEvent::Received(PeerMessage::ClientSeek {
                    indexes: Some(request.clone()),
                }),
                now,
            )
            .unwrap();
        assert_eq!(chunk_indexes(&effects), request);
    }

    #[test]
    fn empty_seek_still_ends_with_done() {
        let (mut session, now) = opened(Some(source(CHUNK_SIZE)));
        let effects = session
            .handle(
                ChannelEvent::Received(PeerMessage::ClientSeek { indexes: Some(vec![]) }),
                now,
            )
            .unwrap();
        assert_eq!(effects, vec![Effect::Send(PeerMessage::ServerDone)]);
    }

    #[test]
    fn zero_byte_file_answers_done_only() {
        let (mut session, now) = opened(Some(SourceFile::new("empty", Vec::new())));
        let effects = session
            .handle(ChannelEvent::Received(PeerMessage::ClientSeek { indexes: None }), now)
            .unwrap();
        assert_eq!(effects, vec![Effect::Send(PeerMessage::ServerDone)]);
    }

    #[test]
    fn out_of_range_seek_is_a_violation() {
        let (mut session, now) = opened(Some(source(CHUNK_SIZE)));
        let err = session
            .handle(
                ChannelEvent::Received(PeerMessage::ClientSeek {
                    indexes: Some(vec![CHUNK_SIZE]),
                }),
                now,
            )
            .unwrap_err();
        assert!(matches!(
            err,
            TransferError::Protocol(ProtocolViolation::ChunkOutOfRange { .. })
        ));
        assert_eq!(session.status(), ConnectionStatus::Errored);
    }

    #[test]
    fn seek_without_file_is_a_violation() {
        let (mut session, now) = opened(None);
        let err = session
            .handle(ChannelEvent::Received(PeerMessage::ClientSeek { indexes: None }), now)
            .unwrap_err();
        assert!(matches!(
            err,
            TransferError::Protocol(ProtocolViolation::NoFileLoaded)
        ));
    }

    #[test]
    fn server_messages_are_refused() {
        let (mut session, now) = opened(Some(source(10)));
        let err = session
            .handle(ChannelEvent::Received(PeerMessage::ServerDone), now)
            .unwrap_err();
        assert!(matches!(
            err,
            TransferError::Protocol(ProtocolViolation::UnexpectedMessage {
                role: Role::Server,
                kind: "server-done"
            })
        ));
    }

    #[test]
    fn client_done_closes_and_marks_done() {
        let (mut session, now) = opened(Some(source(10)));
        let effects = session
            .handle(ChannelEvent::Received(PeerMessage::ClientDone), now)
            .unwrap();

        assert_eq!(effects, vec![Effect::Close]);
        assert!(session.record().is_done());
        assert_eq!(session.status(), ConnectionStatus::Done);

        // Terminal: later events are ignored
        let effects = session
            .handle(ChannelEvent::Received(PeerMessage::ClientSeek { indexes: None }), now)
            .unwrap();
        assert!(effects.is_empty());
    }

    #[test]
    fn late_load_re_announces() {
        let (mut session, _) = opened(None);
        let file = source(100);
        let effects = session.announce(Some(file.clone()));
        assert_eq!(
            effects,
            vec![Effect::Send(PeerMessage::server_info(Some(file.metadata())))]
        );
    }

    #[test]
    fn announce_before_open_stays_quiet() {
        let now = Instant::now();
        let mut session =
            ServerSession::new(PeerId::generate(), None, &TransferConfig::default(), now);
        assert!(session.announce(Some(source(100))).is_empty());

        // The file is still offered once the channel opens
        let effects = session.handle(ChannelEvent::Opened, now).unwrap();
        assert!(matches!(
            &effects[0],
            Effect::Send(PeerMessage::ServerInfo { file_size: Some(100), .. })
        ));
    }

    #[test]
    fn heartbeat_pings_then_times_out() {
        let (mut session, now) = opened(Some(source(10)));
        assert_eq!(
            session.tick(now + Duration::from_secs(1)).unwrap(),
            vec![Effect::Send(PeerMessage::Ping)]
        );

        session
            .handle(ChannelEvent::Received(PeerMessage::Ping), now + Duration::from_secs(3))
            .unwrap();
        assert!(session.tick(now + Duration::from_secs(8)).is_ok());

        let err = session.tick(now + Duration::from_secs(9)).unwrap_err();
        assert!(matches!(err, TransferError::LivenessTimeout { .. }));
        assert_eq!(session.status(), ConnectionStatus::Disconnected);
        assert!(!session.record().is_connected());
    }

    #[test]
    fn close_before_done_disconnects() {
        let (mut session, now) = opened(Some(source(10)));
        assert!(session.handle(ChannelEvent::Closed, now).unwrap().is_empty());
        assert_eq!(session.status(), ConnectionStatus::Disconnected);
    }
}
