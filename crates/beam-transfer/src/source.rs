use std::path::Path;

use beam_types::FileMetadata;
use bytes::Bytes;

use crate::chunk::ChunkLayout;
use crate::error::TransferError;

/// A file loaded into memory on the serving side.
///
/// Cloning is cheap: the contents are reference counted and every chunk is a
/// zero-copy slice.
#[derive(Debug, Clone)]
pub struct SourceFile {
    metadata: FileMetadata,
    layout: ChunkLayout,
    bytes: Bytes,
}

impl SourceFile {
    pub fn new(name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        let size = bytes.len() as u64;
        Self {
            metadata: FileMetadata {
                name: name.into(),
                size,
            },
            layout: ChunkLayout::new(size),
            bytes,
        }
    }

    /// Read a local file. The announced name is the final path component.
    pub async fn read(path: impl AsRef<Path>) -> Result<Self, TransferError> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "download.bin".to_string());
        let bytes = tokio::fs::read(path).await?;
        Ok(Self::new(name, bytes))
    }

    pub fn metadata(&self) -> &FileMetadata {
        &self.metadata
    }

    pub fn layout(&self) -> ChunkLayout {
        self.layout
    }

    /// Bytes of the chunk starting at `index`.
    pub fn chunk(&self, index: u64) -> Option<Bytes> {
        let range = self.layout.range(index)?;
        Some(self.bytes.slice(range.start as usize..range.end as usize))
    }
}
