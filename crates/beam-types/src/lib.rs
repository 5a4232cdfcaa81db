pub mod link;
pub mod protocol;

pub use link::{LinkError, PeerId, parse_link, share_link};
pub use protocol::{CHUNK_SIZE, DecodeError, FileMetadata, PeerMessage, decode};
