use std::sync::Arc;

use beam_transfer::{
    ConnectionRecord, Registration, ServerSession, SessionRegistry, SourceFile, TransferConfig,
    TransferEvent, TransferLog, TransferLogger,
};
use beam_types::{FileMetadata, PeerId};
use tokio::sync::{RwLock, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::info;
use uuid::Uuid;

use crate::channel::Channel;
use crate::connection::{ConnectionCommand, run_server_connection};

/// Serving side: owns the offered file and one task per connected client.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    local_id: PeerId,
    config: TransferConfig,
    logger: Arc<dyn TransferLogger>,

    /// The offered file, if any
    source: RwLock<Option<SourceFile>>,

    /// peer -> live connection, in arrival order
    connections: RwLock<SessionRegistry<ConnectionEntry>>,
}

struct ConnectionEntry {
    channel_id: Uuid,
    commands: mpsc::UnboundedSender<ConnectionCommand>,
    state: watch::Receiver<ConnectionRecord>,
    _task: AbortOnDrop,
}

/// Aborts the connection task when its registry entry goes away.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl Dispatcher {
    pub fn new(local_id: PeerId, config: TransferConfig, logger: Arc<dyn TransferLogger>) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                local_id,
                config,
                logger,
                source: RwLock::new(None),
                connections: RwLock::new(SessionRegistry::new()),
            }),
        }
    }

    /// Identity clients must target to reach this server.
    pub fn local_id(&self) -> PeerId {
        self.inner.local_id
    }

    pub async fn metadata(&self) -> Option<FileMetadata> {
        self.inner
            .source
            .read()
            .await
            .as_ref()
            .map(|s| s.metadata().clone())
    }

    /// Offer `source`, replacing any previous file. Every open connection is
    /// re-announced.
    pub async fn load_file(&self, source: SourceFile) {
        // Lock order: connections, then source (same as accept)
        let connections = self.inner.connections.read().await;
        *self.inner.source.write().await = Some(source.clone());

        info!(
            name = %source.metadata().name,
            size = source.metadata().size,
            connections = connections.len(),
            "file loaded"
        );
        for entry in connections.values() {
            let _ = entry.commands.send(ConnectionCommand::Announce(Some(source.clone())));
        }
    }

    /// Take over a freshly opened channel from `peer`. A previous connection
    /// from the same peer is torn down and its pending sends discarded.
    pub async fn accept(&self, peer: PeerId, channel: Channel) {
        let mut connections = self.inner.connections.write().await;
        let source = self.inner.source.read().await.clone();

        let session = ServerSession::new(peer, source, &self.inner.config, Instant::now());
        let (state_tx, state_rx) = watch::channel(session.record().clone());
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let channel_id = channel.id();

        let task = tokio::spawn(run_server_connection(
            session,
            channel,
            command_rx,
            state_tx,
            self.inner.config.clone(),
            self.inner.logger.clone(),
        ));

        let entry = ConnectionEntry {
            channel_id,
            commands: command_tx,
            state: state_rx,
            _task: AbortOnDrop(task),
        };
        let event = match connections.register(peer, entry) {
            Registration::Inserted => TransferEvent::Connected,
            // Dropping the old entry aborts its task
            Registration::Replaced(_) => TransferEvent::Replaced,
        };
        self.inner.logger.log(TransferLog {
            component: "server",
            peer,
            event,
        });
    }

    /// Snapshot of every connection record, in arrival order.
    pub async fn connections(&self) -> Vec<ConnectionRecord> {
        self.inner
            .connections
            .read()
            .await
            .values()
            .map(|entry| entry.state.borrow().clone())
            .collect()
    }

    pub async fn connection(&self, peer: PeerId) -> Option<ConnectionRecord> {
        self.inner
            .connections
            .read()
            .await
            .get(&peer)
            .map(|entry| entry.state.borrow().clone())
    }

    /// Channel currently bound to `peer`.
    pub async fn channel_of(&self, peer: PeerId) -> Option<Uuid> {
        self.inner
            .connections
            .read()
            .await
            .get(&peer)
            .map(|entry| entry.channel_id)
    }

    /// Follow the record of `peer`'s current connection as it changes.
    pub async fn watch(&self, peer: PeerId) -> Option<watch::Receiver<ConnectionRecord>> {
        self.inner
            .connections
            .read()
            .await
            .get(&peer)
            .map(|entry| entry.state.clone())
    }
}
