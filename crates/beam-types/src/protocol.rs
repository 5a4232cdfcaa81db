//! Peer channel wire format.
//!
//! Every frame is a JSON object tagged by `"type"`:
//!
//! ```text
//! server-info   {fileName, fileSize}     server → client  (both null: no file yet)
//! server-chunk  {index, bytes}           server → client  (bytes: standard base64)
//! server-done   {}                       server → client
//! client-seek   {indexes}                client → server  (null: every chunk)
//! client-done   {}                       client → server
//! ping          {}                       either way
//! ```
//!
//! `client-start-transfer` is still accepted from older clients and means
//! exactly `client-seek {indexes: null}`.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Chunk size: 12 KB. Every chunk index is a multiple of this.
pub const CHUNK_SIZE: u64 = 12 * 1024;

/// Every `type` tag a peer may send.
const KNOWN_TYPES: &[&str] = &[
    "server-info",
    "server-chunk",
    "server-done",
    "client-seek",
    "client-start-transfer",
    "client-done",
    "ping",
];

/// Name and size of the file offered by a server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub name: String,
    pub size: u64,
}

/// Messages exchanged over a peer channel (JSON, tagged union).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PeerMessage {
    // Server → Client
    #[serde(rename_all = "camelCase")]
    ServerInfo {
        file_name: Option<String>,
        file_size: Option<u64>,
    },
    ServerChunk {
        index: u64,
        #[serde(with = "base64_bytes")]
        bytes: Bytes,
    },
    ServerDone,

    // Client → Server
    ClientSeek {
        indexes: Option<Vec<u64>>,
    },
    ClientStartTransfer,
    ClientDone,

    // Either side
    Ping,
}

/// Why an inbound frame was refused at the deserialization boundary.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("frame is not a valid message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("frame has no \"type\" tag")]
    MissingType,

    #[error("unknown message type {0:?}")]
    UnknownType(String),

    #[error("server-info must set fileName and fileSize together")]
    PartialMetadata,
}

impl PeerMessage {
    /// Build the `server-info` announcement for an optional file.
    pub fn server_info(metadata: Option<&FileMetadata>) -> Self {
        match metadata {
            Some(meta) => Self::ServerInfo {
                file_name: Some(meta.name.clone()),
                file_size: Some(meta.size),
            },
            None => Self::ServerInfo {
                file_name: None,
                file_size: None,
            },
        }
    }

    /// The wire tag of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ServerInfo { .. } => "server-info",
            Self::ServerChunk { .. } => "server-chunk",
            Self::ServerDone => "server-done",
            Self::ClientSeek { .. } => "client-seek",
            Self::ClientStartTransfer => "client-start-transfer",
            Self::ClientDone => "client-done",
            Self::Ping => "ping",
        }
    }

    /// Metadata carried by a `server-info`, if any.
    pub fn metadata(&self) -> Option<FileMetadata> {
        match self {
            Self::ServerInfo {
                file_name: Some(name),
                file_size: Some(size),
            } => Some(FileMetadata {
                name: name.clone(),
                size: *size,
            }),
            _ => None,
        }
    }

    /// Serialize to a JSON text frame.
    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    fn validate(&self) -> Result<(), DecodeError> {
        if let Self::ServerInfo {
            file_name,
            file_size,
        } = self
        {
            if file_name.is_some() != file_size.is_some() {
                return Err(DecodeError::PartialMetadata);
            }
        }
        Ok(())
    }
}

/// Parse and validate a JSON text frame.
pub fn decode(text: &str) -> Result<PeerMessage, DecodeError> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    let tag = value
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or(DecodeError::MissingType)?;
    if !KNOWN_TYPES.contains(&tag) {
        return Err(DecodeError::UnknownType(tag.to_string()));
    }

    let message: PeerMessage = serde_json::from_value(value)?;
    message.validate()?;
    Ok(message)
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD as B64;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&B64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        B64.decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}
