//! Async runtime for beam transfers.
//!
//! Drives the pure sessions from `beam-transfer` over real channels: one task
//! per server connection, a reconnecting download loop on the client, and
//! two transports (in-memory and WebSocket).

pub mod channel;
pub mod client;
mod connection;
pub mod dispatcher;
pub mod memory;
pub mod ws;

pub use channel::{Channel, ChannelClosed, Outbound, TransportSide};
pub use client::{Connector, DownloadReport, Downloader, MaterializeSink, MemorySink};
pub use dispatcher::Dispatcher;
pub use memory::{DeliveryProfile, memory_pair};
pub use ws::{WS_PATH, WsConnector, endpoint_for, router};
