//! WebSocket transport.
//!
//! A client reaches a server at `GET /beam?target=<server-id>&peer=<client-id>`.
//! Each text frame carries one JSON peer message. A target other than the
//! server's own identity is refused with 404 before the upgrade.

use axum::Router;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use beam_transfer::{ChannelEvent, TransportErrorKind};
use beam_types::{LinkError, PeerId, decode, parse_link};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};
use url::Url;

use crate::channel::{Channel, Outbound, TransportSide};
use crate::client::Connector;
use crate::dispatcher::Dispatcher;

pub const WS_PATH: &str = "/beam";

#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    pub target: PeerId,
    pub peer: PeerId,
}

pub fn router(dispatcher: Dispatcher) -> Router {
    Router::new()
        .route(WS_PATH, get(ws_upgrade))
        .layer(TraceLayer::new_for_http())
        .with_state(dispatcher)
}

async fn ws_upgrade(
    State(dispatcher): State<Dispatcher>,
    Query(params): Query<ConnectParams>,
    ws: WebSocketUpgrade,
) -> Response {
    if params.target != dispatcher.local_id() {
        debug!(target_id = %params.target, "connection for unknown peer refused");
        return (StatusCode::NOT_FOUND, "unknown peer").into_response();
    }
    ws.on_upgrade(move |socket| async move {
        let (channel, side) = Channel::new();
        dispatcher.accept(params.peer, channel).await;
        serve_socket(socket, side).await;
    })
}

async fn serve_socket(socket: WebSocket, mut side: TransportSide) {
    let (mut sender, mut receiver) = socket.split();
    side.emit(ChannelEvent::Opened);

    loop {
        tokio::select! {
            outbound = side.next_outbound() => match outbound {
                Some(Outbound::Message(message)) => {
                    let text = match message.encode() {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("failed to encode {}: {}", message.kind(), e);
                            continue;
                        }
                    };
                    if let Err(e) = sender.send(Message::Text(text.into())).await {
                        let kind = TransportErrorKind::Network(e.to_string());
                        side.emit(ChannelEvent::Errored(kind));
                        break;
                    }
                }
                Some(Outbound::Close) | None => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            },
            frame = receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    side.emit(inbound(text.as_str()));
                }
                Some(Ok(Message::Close(_))) | None => {
                    side.emit(ChannelEvent::Closed);
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    side.emit(ChannelEvent::Errored(TransportErrorKind::Network(e.to_string())));
                    break;
                }
            },
        }
    }
}

fn inbound(text: &str) -> ChannelEvent {
    match decode(text) {
        Ok(message) => ChannelEvent::Received(message),
        Err(e) => ChannelEvent::Malformed(e.to_string()),
    }
}

/// Derive the socket endpoint from a share link: same host and port,
/// `http` becomes `ws`, `https` becomes `wss`.
pub fn endpoint_for(link: &Url) -> Result<Url, LinkError> {
    let scheme = match link.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(LinkError::UnsupportedScheme(other.to_string())),
    };
    let mut endpoint = link.clone();
    endpoint.set_query(None);
    endpoint.set_fragment(None);
    endpoint.set_path(WS_PATH);
    endpoint
        .set_scheme(scheme)
        .map_err(|_| LinkError::UnsupportedScheme(link.scheme().to_string()))?;
    Ok(endpoint)
}

/// Dials a server over WebSocket, always as the same local peer.
#[derive(Debug, Clone)]
pub struct WsConnector {
    endpoint: Url,
    local_id: PeerId,
}

impl WsConnector {
    pub fn new(endpoint: Url, local_id: PeerId) -> Self {
        Self { endpoint, local_id }
    }

    /// Build a connector from a share link. Returns it with the target it names.
    pub fn from_link(link: &str, local_id: PeerId) -> Result<(Self, PeerId), LinkError> {
        let target = parse_link(link)?;
        let url = Url::parse(link.trim())?;
        Ok((Self::new(endpoint_for(&url)?, local_id), target))
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn local_id(&self) -> PeerId {
        self.local_id
    }
}

impl Connector for WsConnector {
    async fn connect(&mut self, target: PeerId) -> Result<Channel, TransportErrorKind> {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .clear()
            .append_pair("target", &target.to_string())
            .append_pair("peer", &self.local_id.to_string());

        let (stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| classify(e, target))?;

        let (channel, side) = Channel::new();
        tokio::spawn(pump_client(stream, side));
        Ok(channel)
    }
}

fn classify(err: tungstenite::Error, target: PeerId) -> TransportErrorKind {
    match &err {
        tungstenite::Error::Http(response) if matches!(response.status().as_u16(), 400 | 404) => {
            TransportErrorKind::PeerUnavailable(target.to_string())
        }
        _ => TransportErrorKind::Network(err.to_string()),
    }
}

async fn pump_client(stream: WebSocketStream<MaybeTlsStream<TcpStream>>, mut side: TransportSide) {
    let (mut sender, mut receiver) = stream.split();
    side.emit(ChannelEvent::Opened);

    loop {
        tokio::select! {
            outbound = side.next_outbound() => match outbound {
                Some(Outbound::Message(message)) => {
                    let text = match message.encode() {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("failed to encode {}: {}", message.kind(), e);
                            continue;
                        }
                    };
                    if let Err(e) = sender.send(WsMessage::Text(text.into())).await {
                        let kind = TransportErrorKind::Network(e.to_string());
                        side.emit(ChannelEvent::Errored(kind));
                        break;
                    }
                }
                Some(Outbound::Close) | None => {
                    let _ = sender.send(WsMessage::Close(None)).await;
                    break;
                }
            },
            frame = receiver.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    side.emit(inbound(text.as_str()));
                }
                Some(Ok(WsMessage::Close(_))) | None => {
                    side.emit(ChannelEvent::Closed);
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    side.emit(ChannelEvent::Errored(TransportErrorKind::Network(e.to_string())));
                    break;
                }
            },
        }
    }
}
