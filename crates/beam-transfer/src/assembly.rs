use beam_types::FileMetadata;
use chrono::{DateTime, Utc};

use crate::chunk::ChunkLayout;
use crate::error::{ProtocolViolation, TransferError};

/// Pre-allocated byte array the client writes chunks into.
#[derive(Debug)]
pub struct AssemblyBuffer {
    metadata: FileMetadata,
    layout: ChunkLayout,
    data: Vec<u8>,
}

impl AssemblyBuffer {
    /// Reserve `metadata.size` zeroed bytes. Refuses sizes above `limit` and
    /// sizes the allocator cannot satisfy.
    pub fn allocate(metadata: FileMetadata, limit: u64) -> Result<Self, TransferError> {
        let size = metadata.size;
        if size > limit {
            return Err(TransferError::AllocationTooLarge { size });
        }
        let len = usize::try_from(size).map_err(|_| TransferError::AllocationTooLarge { size })?;

        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|_| TransferError::AllocationTooLarge { size })?;
        data.resize(len, 0);

        Ok(Self {
            layout: ChunkLayout::new(size),
            metadata,
            data,
        })
    }

    /// Copy one chunk into place. The index must be a chunk start inside the
    /// file and `bytes` must fill that chunk exactly.
    pub fn write(&mut self, index: u64, bytes: &[u8]) -> Result<(), ProtocolViolation> {
        let range = self.layout.locate(index)?;
        let expected = range.end - range.start;
        if bytes.len() as u64 != expected {
            return Err(ProtocolViolation::ChunkLengthMismatch {
                index,
                expected,
                actual: bytes.len() as u64,
            });
        }
        self.data[range.start as usize..range.end as usize].copy_from_slice(bytes);
        Ok(())
    }

    pub fn metadata(&self) -> &FileMetadata {
        &self.metadata
    }

    pub fn layout(&self) -> ChunkLayout {
        self.layout
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_parts(self) -> (FileMetadata, Vec<u8>) {
        (self.metadata, self.data)
    }
}

/// A finished download, handed to the materialization sink exactly once.
#[derive(Debug)]
pub struct CompletedDownload {
    pub metadata: FileMetadata,
    pub bytes: Vec<u8>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Seek rounds it took, the initial full request included.
    pub rounds: u32,
}

impl CompletedDownload {
    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }

    /// Average throughput in bytes per second; zero for instant transfers.
    pub fn throughput_bps(&self) -> u64 {
        let ms = self.elapsed().num_milliseconds();
        if ms <= 0 {
            return 0;
        }
        self.metadata.size.saturating_mul(1000) / ms as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beam_types::CHUNK_SIZE;

    fn meta(size: u64) -> FileMetadata {
        FileMetadata {
            name: "f.bin".into(),
            size,
        }
    }

    #[test]
    fn allocates_zeroed_buffer() {
        let buffer = AssemblyBuffer::allocate(meta(100), u64::MAX).unwrap();
        assert_eq!(buffer.as_bytes(), &[0u8; 100][..]);
    }

    #[test]
    fn refuses_sizes_over_limit() {
        let err = AssemblyBuffer::allocate(meta(1024), 1023).unwrap_err();
        assert!(matches!(err, TransferError::AllocationTooLarge { size: 1024 }));
    }

    #[test]
    fn refuses_sizes_the_allocator_cannot_hold() {
        let err = AssemblyBuffer::allocate(meta(u64::MAX), u64::MAX).unwrap_err();
        assert!(matches!(err, TransferError::AllocationTooLarge { .. }));
    }

    #[test]
    fn writes_land_at_their_offset() {
        let size = CHUNK_SIZE + 3;
        let mut buffer = AssemblyBuffer::allocate(meta(size), u64::MAX).unwrap();

        buffer.write(CHUNK_SIZE, b"xyz").unwrap();
        buffer.write(0, &vec![7u8; CHUNK_SIZE as usize]).unwrap();

        let (_, data) = buffer.into_parts();
        assert!(data[..CHUNK_SIZE as usize].iter().all(|&b| b == 7));
        assert_eq!(&data[CHUNK_SIZE as usize..], b"xyz");
    }

    #[test]
    fn rejects_bad_chunks() {
        let mut buffer = AssemblyBuffer::allocate(meta(2 * CHUNK_SIZE), u64::MAX).unwrap();

        assert!(matches!(
            buffer.write(1, &[0]),
            Err(ProtocolViolation::MisalignedChunk { index: 1, .. })
        ));
        assert!(matches!(
            buffer.write(2 * CHUNK_SIZE, &[0]),
            Err(ProtocolViolation::ChunkOutOfRange { .. })
        ));
        assert!(matches!(
            buffer.write(0, &[0; 10]),
            Err(ProtocolViolation::ChunkLengthMismatch {
                expected: CHUNK_SIZE,
                actual: 10,
                ..
            })
        ));
    }
}
