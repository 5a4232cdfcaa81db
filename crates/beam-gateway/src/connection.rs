use std::sync::Arc;

use beam_transfer::{
    ChannelEvent, ConnectionRecord, Effect, ServerSession, SourceFile, TransferConfig,
    TransferEvent, TransferLog, TransferLogger,
};
use beam_types::PeerMessage;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::channel::Channel;

/// Orders from the dispatcher to one connection task.
#[derive(Debug)]
pub(crate) enum ConnectionCommand {
    Announce(Option<SourceFile>),
}

/// Drive one client connection until it is done, dead, or replaced.
///
/// Channel events, dispatcher commands and heartbeat ticks are handled one at
/// a time, so the session needs no locking. The latest record is published
/// on `state` after every step.
pub(crate) async fn run_server_connection(
    mut session: ServerSession,
    mut channel: Channel,
    mut commands: mpsc::UnboundedReceiver<ConnectionCommand>,
    state: watch::Sender<ConnectionRecord>,
    config: TransferConfig,
    logger: Arc<dyn TransferLogger>,
) {
    let peer = session.record().peer();
    let log = |event: TransferEvent| {
        logger.log(TransferLog {
            component: "server",
            peer,
            event,
        })
    };

    let mut heartbeat = tokio::time::interval(config.heartbeat_interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    heartbeat.tick().await;

    loop {
        let outcome = tokio::select! {
            event = channel.recv() => {
                let event = event.unwrap_or(ChannelEvent::Closed);
                session.handle(event, Instant::now())
            }
            Some(command) = commands.recv() => match command {
                ConnectionCommand::Announce(source) => {
                    if let Some(source) = &source {
                        log(TransferEvent::Announced {
                            name: Some(source.metadata().name.clone()),
                            size: Some(source.metadata().size),
                        });
                    }
                    Ok(session.announce(source))
                }
            },
            _ = heartbeat.tick() => session.tick(Instant::now()),
        };

        let keep_going = match outcome {
            Ok(effects) => apply(&mut channel, effects, &mut session, &log),
            Err(err) => {
                warn!(peer = %peer, "connection failed: {}", err);
                log(TransferEvent::Error {
                    message: err.to_string(),
                });
                false
            }
        };
        if !keep_going && !session.status().is_terminal() {
            // The transport end went away under us
            let _ = session.handle(ChannelEvent::Closed, Instant::now());
        }
        state.send_replace(session.record().clone());

        if !keep_going || session.status().is_terminal() {
            break;
        }
    }

    channel.close();
    log(TransferEvent::Closed {
        status: session.status().as_str(),
    });
}

fn apply(
    channel: &mut Channel,
    effects: Vec<Effect>,
    session: &mut ServerSession,
    log: &impl Fn(TransferEvent),
) -> bool {
    let mut chunks = 0usize;
    let mut bytes = 0u64;
    for effect in effects {
        match effect {
            Effect::Send(message) => {
                match &message {
                    PeerMessage::ServerChunk { bytes: payload, .. } => {
                        chunks += 1;
                        bytes += payload.len() as u64;
                    }
                    PeerMessage::ServerDone => log(TransferEvent::SeekServed { chunks, bytes }),
                    _ => {}
                }
                if channel.send(message.clone()).is_err() {
                    debug!("channel gone mid-send");
                    return false;
                }
                session.record_sent(&message);
            }
            Effect::Close => {
                if session.record().is_done() {
                    log(TransferEvent::ClientDone {
                        bytes_sent: session.record().bytes_sent(),
                    });
                }
                channel.close();
                return false;
            }
            Effect::Complete => {}
        }
    }
    true
}
