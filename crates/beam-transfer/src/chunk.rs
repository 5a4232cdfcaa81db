//! Chunk addressing.
//!
//! A file of `size` bytes is split into chunks of `chunk_size` bytes. Each
//! chunk is named by its start offset (its *index*):
//!
//! ```text
//! size = 12*1024 + 500, chunk_size = 12*1024
//!
//! index 0      [0 .. 12288)        full chunk
//! index 12288  [12288 .. 12788)    500-byte tail
//! ```

use std::ops::Range;

use beam_types::CHUNK_SIZE;

use crate::error::ProtocolViolation;

/// Addressing space of one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLayout {
    size: u64,
    chunk_size: u64,
}

impl ChunkLayout {
    /// Layout using the protocol chunk size.
    pub fn new(size: u64) -> Self {
        Self::with_chunk_size(size, CHUNK_SIZE)
    }

    /// # Panics
    /// Panics if `chunk_size` is zero.
    pub fn with_chunk_size(size: u64, chunk_size: u64) -> Self {
        assert!(chunk_size > 0, "chunk size must be non-zero");
        Self { size, chunk_size }
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    #[inline]
    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Number of chunks: ceil(size / chunk_size).
    #[inline]
    pub fn count(&self) -> u64 {
        self.size.div_ceil(self.chunk_size)
    }

    /// True if `index` is a chunk start inside the file.
    #[inline]
    pub fn contains(&self, index: u64) -> bool {
        index < self.size && index % self.chunk_size == 0
    }

    /// Ordinal of the chunk starting at `index`.
    #[inline]
    pub fn position(&self, index: u64) -> Option<u64> {
        self.contains(index).then(|| index / self.chunk_size)
    }

    /// Byte range covered by the chunk at `index`, clipped to the file size.
    pub fn range(&self, index: u64) -> Option<Range<u64>> {
        self.contains(index)
            .then(|| index..index.saturating_add(self.chunk_size).min(self.size))
    }

    /// Like [`range`](Self::range), but says why an index is refused.
    pub fn locate(&self, index: u64) -> Result<Range<u64>, ProtocolViolation> {
        if index >= self.size {
            return Err(ProtocolViolation::ChunkOutOfRange {
                index,
                size: self.size,
            });
        }
        self.range(index).ok_or(ProtocolViolation::MisalignedChunk {
            index,
            chunk_size: self.chunk_size,
        })
    }

    /// Every chunk index, in ascending order.
    pub fn indexes(&self) -> ChunkIndexes {
        ChunkIndexes {
            next: 0,
            end: self.size,
            step: self.chunk_size,
        }
    }
}

/// Iterator over the chunk indexes of a [`ChunkLayout`].
#[derive(Debug, Clone)]
pub struct ChunkIndexes {
    next: u64,
    end: u64,
    step: u64,
}

impl Iterator for ChunkIndexes {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        if self.next >= self.end {
            return None;
        }
        let index = self.next;
        self.next = self.next.saturating_add(self.step);
        Some(index)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.end.saturating_sub(self.next).div_ceil(self.step);
        let remaining = usize::try_from(remaining).unwrap_or(usize::MAX);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for ChunkIndexes {}
