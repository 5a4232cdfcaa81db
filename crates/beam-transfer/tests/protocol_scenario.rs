//! End-to-end protocol runs with both sessions wired back to back.
//!
//! Every message goes through the JSON codec, and a delivery hook decides
//! what the client actually sees of each server batch.

use std::collections::VecDeque;

use beam_transfer::{
    ChannelEvent, ClientSession, CompletedDownload, ConnectionStatus, Effect, ServerSession,
    SourceFile, TransferConfig, TransferError,
};
use beam_types::{CHUNK_SIZE, PeerId, PeerMessage, decode};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tokio::time::Instant;

fn wire(msg: &PeerMessage) -> PeerMessage {
    decode(&msg.encode().unwrap()).unwrap()
}

fn patterned(size: u64) -> Vec<u8> {
    (0..size).map(|i| (i * 31 % 256) as u8).collect()
}

struct Link {
    server: ServerSession,
    client: ClientSession,
    now: Instant,
    seeks: Vec<Option<Vec<u64>>>,
}

impl Link {
    fn new(source: Option<SourceFile>, config: &TransferConfig) -> Self {
        let now = Instant::now();
        Self {
            server: ServerSession::new(PeerId::generate(), source, config, now),
            client: ClientSession::new(PeerId::generate(), config, now),
            now,
            seeks: Vec::new(),
        }
    }

    /// Open the channel on both ends and run until neither side has
    /// anything left to say. Returns the download if it completed.
    fn run<F>(&mut self, mut deliver: F) -> Result<Option<CompletedDownload>, TransferError>
    where
        F: FnMut(Vec<PeerMessage>) -> Vec<PeerMessage>,
    {
        let mut to_client: VecDeque<PeerMessage> = VecDeque::new();
        let mut to_server: VecDeque<PeerMessage> = VecDeque::new();

        let opened = self.server.handle(ChannelEvent::Opened, self.now)?;
        to_client.extend(deliver(self.from_server(opened)));
        self.client.handle(ChannelEvent::Opened, self.now)?;

        loop {
            if let Some(msg) = to_server.pop_front() {
                if let PeerMessage::ClientSeek { indexes } = &msg {
                    self.seeks.push(indexes.clone());
                }
                let effects = self.server.handle(ChannelEvent::Received(wire(&msg)), self.now)?;
                to_client.extend(deliver(self.from_server(effects)));
                continue;
            }
            if let Some(msg) = to_client.pop_front() {
                let effects = self.client.handle(ChannelEvent::Received(wire(&msg)), self.now)?;
                to_server.extend(sends(effects));
                continue;
            }
            break;
        }
        Ok(self.client.take_download())
    }

    fn announce(&mut self, source: SourceFile) -> Result<Option<CompletedDownload>, TransferError> {
        let announced = self.server.announce(Some(source));
        let mut to_client: VecDeque<PeerMessage> = self.from_server(announced).into();
        let mut to_server: VecDeque<PeerMessage> = VecDeque::new();
        loop {
            if let Some(msg) = to_server.pop_front() {
                if let PeerMessage::ClientSeek { indexes } = &msg {
                    self.seeks.push(indexes.clone());
                }
                let effects = self.server.handle(ChannelEvent::Received(msg), self.now)?;
                to_client.extend(self.from_server(effects));
                continue;
            }
            if let Some(msg) = to_client.pop_front() {
                to_server.extend(sends(self.client.handle(ChannelEvent::Received(msg), self.now)?));
                continue;
            }
            break;
        }
        Ok(self.client.take_download())
    }

    /// Server output as the transport accepts it, before any loss.
    fn from_server(&mut self, effects: Vec<Effect>) -> Vec<PeerMessage> {
        let batch = sends(effects);
        for msg in &batch {
            self.server.record_sent(msg);
        }
        batch
    }
}

fn sends(effects: Vec<Effect>) -> Vec<PeerMessage> {
    effects
        .into_iter()
        .filter_map(|e| match e {
            Effect::Send(msg) => Some(msg),
            _ => None,
        })
        .collect()
}

fn reliable(batch: Vec<PeerMessage>) -> Vec<PeerMessage> {
    batch
}

#[test]
fn two_chunk_file_in_one_round() {
    let data = patterned(24576);
    let mut link = Link::new(
        Some(SourceFile::new("photo.jpg", data.clone())),
        &TransferConfig::default(),
    );

    let download = link.run(reliable).unwrap().expect("download completes");

    assert_eq!(download.metadata.name, "photo.jpg");
    assert_eq!(download.bytes, data);
    assert_eq!(link.seeks, vec![None]);
    assert_eq!(link.server.status(), ConnectionStatus::Done);
    assert!(link.server.record().is_done());
    assert_eq!(link.server.record().bytes_sent(), 24576);
    assert_eq!(link.client.status(), ConnectionStatus::Done);
}

#[test]
fn lost_chunk_is_re_requested_exactly() {
    let data = patterned(24576);
    let mut link = Link::new(
        Some(SourceFile::new("photo.jpg", data.clone())),
        &TransferConfig::default(),
    );

    let mut dropped = false;
    let download = link
        .run(|batch| {
            batch
                .into_iter()
                .filter(|msg| {
                    let lose =
                        !dropped && matches!(msg, PeerMessage::ServerChunk { index: 12288, .. });
                    if lose {
                        dropped = true;
                    }
                    !lose
                })
                .collect()
        })
        .unwrap()
        .expect("download completes");

    assert_eq!(link.seeks, vec![None, Some(vec![12288])]);
    assert_eq!(download.bytes, data);
    assert_eq!(download.rounds, 2);
}

#[test]
fn shuffled_duplicated_and_lossy_delivery_converges() {
    let size = 40 * CHUNK_SIZE + 500;
    let data = patterned(size);
    let mut link = Link::new(
        Some(SourceFile::new("big.bin", data.clone())),
        &TransferConfig {
            max_stalled_rounds: 64,
            ..TransferConfig::default()
        },
    );

    let mut rng = StdRng::seed_from_u64(0x5eed);
    let download = link
        .run(|batch| {
            let (mut chunks, rest): (Vec<_>, Vec<_>) = batch
                .into_iter()
                .partition(|m| matches!(m, PeerMessage::ServerChunk { .. }));

            let mut extra: Vec<PeerMessage> = chunks
                .iter()
                .filter(|_| rng.random_bool(0.2))
                .cloned()
                .collect();
            chunks.append(&mut extra);
            chunks.retain(|_| !rng.random_bool(0.3));
            chunks.shuffle(&mut rng);

            // server-info / server-done keep their place after the chunks
            chunks.extend(rest);
            chunks
        })
        .unwrap()
        .expect("download completes");

    assert_eq!(download.bytes, data);
    assert!(link.seeks.len() > 1);
    assert_eq!(link.seeks[0], None);
    for later in &link.seeks[1..] {
        let indexes = later.as_ref().expect("repairs name their chunks");
        assert!(!indexes.is_empty());
        assert!(indexes.windows(2).all(|w| w[0] < w[1]));
    }
}

#[test]
fn odd_sized_file_keeps_its_tail() {
    let size = 12 * 1024 + 500;
    let data = patterned(size);
    let mut link = Link::new(
        Some(SourceFile::new("tail.bin", data.clone())),
        &TransferConfig::default(),
    );

    let download = link.run(reliable).unwrap().expect("download completes");
    assert_eq!(download.bytes.len() as u64, size);
    assert_eq!(&download.bytes[12288..], &data[12288..]);
}

#[test]
fn total_loss_ends_in_repair_stall() {
    let mut link = Link::new(
        Some(SourceFile::new("void.bin", patterned(3 * CHUNK_SIZE))),
        &TransferConfig {
            max_stalled_rounds: 4,
            ..TransferConfig::default()
        },
    );

    let err = link
        .run(|batch| {
            batch
                .into_iter()
                .filter(|m| !matches!(m, PeerMessage::ServerChunk { .. }))
                .collect()
        })
        .unwrap_err();

    assert!(matches!(err, TransferError::RepairStalled { rounds: 4, missing: 3 }));
    assert_eq!(link.client.status(), ConnectionStatus::Errored);
}

#[test]
fn late_file_load_reaches_waiting_client() {
    let data = patterned(CHUNK_SIZE * 2 + 1);
    let mut link = Link::new(None, &TransferConfig::default());

    assert!(link.run(reliable).unwrap().is_none());
    assert!(link.client.is_waiting());
    assert_eq!(link.server.status(), ConnectionStatus::Ready);

    let download = link
        .announce(SourceFile::new("late.bin", data.clone()))
        .unwrap()
        .expect("download completes");
    assert_eq!(download.bytes, data);
}

#[test]
fn resumed_connection_seeks_only_the_gap() {
    let data = patterned(4 * CHUNK_SIZE);
    let source = SourceFile::new("resume.bin", data.clone());
    let config = TransferConfig::default();
    let mut link = Link::new(Some(source.clone()), &config);

    // First connection: only the first two chunks make it, then the channel dies
    let err = {
        let now = link.now;
        let mut first = Vec::new();
        first.extend(sends(link.server.handle(ChannelEvent::Opened, now).unwrap()));
        link.client.handle(ChannelEvent::Opened, now).unwrap();
        let seek = sends(link.client.handle(ChannelEvent::Received(first.remove(0)), now).unwrap());
        let batch = sends(
            link.server
                .handle(ChannelEvent::Received(seek[0].clone()), now)
                .unwrap(),
        );
        for msg in batch.into_iter().take(2) {
            link.client.handle(ChannelEvent::Received(msg), now).unwrap();
        }
        link.client.handle(ChannelEvent::Closed, now).unwrap_err()
    };
    assert!(err.is_retryable());

    // Second connection to a fresh server session
    link.client.reattach(link.now);
    link.server = ServerSession::new(PeerId::generate(), Some(source), &config, link.now);
    link.seeks.clear();

    let download = link.run(reliable).unwrap().expect("download completes");
    assert_eq!(link.seeks, vec![Some(vec![2 * CHUNK_SIZE, 3 * CHUNK_SIZE])]);
    assert_eq!(download.bytes, data);
}
