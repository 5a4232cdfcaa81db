//! Resumable chunked file transfer between two peers.
//!
//! The serving side splits a file into fixed 12 KB chunks and answers seek
//! requests; the receiving side assembles chunks into a pre-allocated buffer
//! and repairs gaps by re-requesting exactly the missing indexes until the
//! file is complete.
//!
//! Everything here is transport-agnostic: sessions consume channel events and
//! return effects. `beam-gateway` supplies the runtime and the transports.

pub mod assembly;
pub mod chunk;
pub mod config;
pub mod error;
pub mod liveness;
pub mod logging;
pub mod received;
pub mod registry;
pub mod session;
pub mod source;
pub mod stats;

pub use assembly::{AssemblyBuffer, CompletedDownload};
pub use chunk::ChunkLayout;
pub use config::TransferConfig;
pub use error::{ProtocolViolation, TransferError, TransportErrorKind};
pub use logging::{NullLogger, TracingLogger, TransferEvent, TransferLog, TransferLogger};
pub use received::ReceivedSet;
pub use registry::{Registration, SessionRegistry};
pub use session::{
    ChannelEvent, ClientSession, ConnectionRecord, ConnectionStatus, Effect, Role, ServerSession,
};
pub use source::SourceFile;
pub use stats::{Progress, TransferProgress};
