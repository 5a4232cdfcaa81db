//! Which chunks of a file have arrived, as a compact bitfield.
//!
//! One bit per chunk ordinal. Duplicates are detected on insert so the
//! received count stays exact however often a chunk is re-sent.

use crate::chunk::ChunkLayout;

#[derive(Debug, Clone)]
pub struct ReceivedSet {
    layout: ChunkLayout,
    bits: Vec<u64>,
    received: u64,
}

impl ReceivedSet {
    pub fn new(layout: ChunkLayout) -> Self {
        let words = layout.count().div_ceil(64) as usize;
        Self {
            layout,
            bits: vec![0u64; words],
            received: 0,
        }
    }

    /// Mark the chunk at `index` as received. Returns true if it was newly
    /// received, false for duplicates and indexes outside the layout.
    #[inline]
    pub fn insert(&mut self, index: u64) -> bool {
        let Some(pos) = self.layout.position(index) else {
            return false;
        };
        let (word, mask) = Self::slot(pos);
        if self.bits[word] & mask != 0 {
            return false;
        }
        self.bits[word] |= mask;
        self.received += 1;
        true
    }

    #[inline]
    pub fn contains(&self, index: u64) -> bool {
        match self.layout.position(index) {
            Some(pos) => {
                let (word, mask) = Self::slot(pos);
                self.bits[word] & mask != 0
            }
            None => false,
        }
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.received >= self.layout.count()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.received == 0
    }

    /// Number of distinct chunks received.
    #[inline]
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Total chunk count.
    #[inline]
    pub fn total(&self) -> u64 {
        self.layout.count()
    }

    /// Bytes covered by the received chunks.
    pub fn received_bytes(&self) -> u64 {
        let count = self.layout.count();
        if count == 0 {
            return 0;
        }
        let full = self.layout.chunk_size();
        let last = (count - 1) * full;
        if self.contains(last) {
            (self.received - 1) * full + (self.layout.size() - last)
        } else {
            self.received * full
        }
    }

    /// Indexes of every chunk not yet received, ascending.
    pub fn missing(&self) -> Vec<u64> {
        let mut missing = Vec::with_capacity((self.total() - self.received) as usize);
        for index in self.layout.indexes() {
            if !self.contains(index) {
                missing.push(index);
            }
        }
        missing
    }

    #[inline]
    fn slot(pos: u64) -> (usize, u64) {
        ((pos / 64) as usize, 1u64 << (pos % 64))
    }
}
