use std::future::Future;
use std::sync::Arc;

use beam_transfer::{
    ChannelEvent, ClientSession, CompletedDownload, Effect, NullLogger, TransferConfig,
    TransferError, TransferEvent, TransferLog, TransferLogger, TransferProgress, TransportErrorKind,
};
use beam_types::{FileMetadata, PeerId, PeerMessage};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

use crate::channel::Channel;

/// Opens channels to a target peer.
pub trait Connector: Send {
    fn connect(
        &mut self,
        target: PeerId,
    ) -> impl Future<Output = Result<Channel, TransportErrorKind>> + Send;
}

/// Receives the finished file.
pub trait MaterializeSink: Send {
    fn materialize(
        &mut self,
        download: CompletedDownload,
    ) -> impl Future<Output = Result<(), TransferError>> + Send;
}

/// Keeps finished downloads in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub downloads: Vec<CompletedDownload>,
}

impl MaterializeSink for MemorySink {
    async fn materialize(&mut self, download: CompletedDownload) -> Result<(), TransferError> {
        self.downloads.push(download);
        Ok(())
    }
}

/// Summary of a finished download.
#[derive(Debug, Clone)]
pub struct DownloadReport {
    pub metadata: FileMetadata,
    pub elapsed_ms: i64,
    pub throughput_bps: u64,
    pub rounds: u32,
    pub reconnects: u32,
}

/// Fetches one file from one server, reconnecting on transient failures and
/// resuming from the chunks already received.
pub struct Downloader {
    target: PeerId,
    config: TransferConfig,
    progress: Option<Arc<TransferProgress>>,
    logger: Arc<dyn TransferLogger>,
}

impl Downloader {
    pub fn new(target: PeerId, config: TransferConfig) -> Self {
        Self {
            target,
            config,
            progress: None,
            logger: Arc::new(NullLogger),
        }
    }

    pub fn with_progress(mut self, progress: Arc<TransferProgress>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_logger(mut self, logger: Arc<dyn TransferLogger>) -> Self {
        self.logger = logger;
        self
    }

    pub async fn run<C, S>(
        &self,
        connector: &mut C,
        sink: &mut S,
    ) -> Result<DownloadReport, TransferError>
    where
        C: Connector,
        S: MaterializeSink,
    {
        let mut session = ClientSession::new(self.target, &self.config, Instant::now());
        let mut reconnects = 0u32;

        loop {
            let outcome = match connector.connect(self.target).await {
                Ok(channel) => {
                    session.reattach(Instant::now());
                    self.log(TransferEvent::Connected);
                    self.drive(&mut session, channel).await
                }
                Err(kind) => Err(TransferError::Transport(kind)),
            };

            let err = match outcome {
                Ok(download) => {
                    let report = DownloadReport {
                        metadata: download.metadata.clone(),
                        elapsed_ms: download.elapsed().num_milliseconds(),
                        throughput_bps: download.throughput_bps(),
                        rounds: download.rounds,
                        reconnects,
                    };
                    self.log(TransferEvent::TransferComplete {
                        total_bytes: report.metadata.size,
                        duration_ms: report.elapsed_ms,
                        rounds: report.rounds,
                    });
                    sink.materialize(download).await?;
                    return Ok(report);
                }
                Err(err) => err,
            };

            if !err.is_retryable() || reconnects >= self.config.max_reconnects {
                self.log(TransferEvent::Error {
                    message: err.to_string(),
                });
                return Err(match err {
                    TransferError::LivenessTimeout { .. } => TransferError::PeerDisappeared,
                    other => other,
                });
            }

            reconnects += 1;
            if let Some(progress) = &self.progress {
                progress.record_reconnect();
            }
            self.log(TransferEvent::Reconnecting {
                attempt: reconnects,
                delay_ms: self.config.reconnect_delay.as_millis() as u64,
            });
            tokio::time::sleep(self.config.reconnect_delay).await;
        }
    }

    /// Run one connection until the download completes or the connection fails.
    async fn drive(
        &self,
        session: &mut ClientSession,
        mut channel: Channel,
    ) -> Result<CompletedDownload, TransferError> {
        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        heartbeat.tick().await;

        loop {
            let outcome = tokio::select! {
                event = channel.recv() => {
                    let event = event.unwrap_or(ChannelEvent::Closed);
                    if let ChannelEvent::Received(PeerMessage::ServerInfo {
                        file_name,
                        file_size,
                    }) = &event
                    {
                        self.log(TransferEvent::Announced {
                            name: file_name.clone(),
                            size: *file_size,
                        });
                    }
                    session.handle(event, Instant::now())
                }
                _ = heartbeat.tick() => session.tick(Instant::now()),
            };

            let effects = match outcome {
                Ok(effects) => effects,
                Err(err) => {
                    channel.close();
                    return Err(err);
                }
            };
            if let Some(progress) = &self.progress {
                progress.update(&session.progress());
            }

            for effect in effects {
                match effect {
                    Effect::Send(message) => {
                        if let PeerMessage::ClientSeek { indexes: Some(missing) } = &message {
                            self.log(TransferEvent::RepairRound {
                                round: session.progress().rounds,
                                missing: missing.len(),
                            });
                        }
                        if channel.send(message).is_err() {
                            debug!("channel gone mid-send");
                            return Err(TransferError::PeerDisappeared);
                        }
                    }
                    Effect::Close => channel.close(),
                    Effect::Complete => {
                        channel.close();
                        return session.take_download().ok_or(TransferError::NotReady);
                    }
                }
            }
        }
    }

    fn log(&self, event: TransferEvent) {
        self.logger.log(TransferLog {
            component: "client",
            peer: self.target,
            event,
        });
    }
}
