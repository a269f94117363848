//! Live-block bitmap.
//!
//! One bit per potential block of every page; a set bit means the block is
//! handed out. Only consulted to validate releases.

use alloc::vec;
use alloc::vec::Vec;

pub struct LiveBlockMap {
    words_per_page: usize,
    bits: Vec<u64>,
}

impl LiveBlockMap {
    pub fn new(page_count: usize, max_blocks_per_page: usize) -> Self {
        let words_per_page = max_blocks_per_page.div_ceil(64);
        Self {
            words_per_page,
            bits: vec![0; page_count * words_per_page],
        }
    }

    fn locate(&self, page: usize, block: usize) -> (usize, u64) {
        let word = page * self.words_per_page + block / 64;
        (word, 1u64 << (block % 64))
    }

    pub fn is_live(&self, page: usize, block: usize) -> bool {
        let (word, mask) = self.locate(page, block);
        self.bits[word] & mask != 0
    }

    /// Returns `false` if the block was already live.
    pub fn mark_live(&mut self, page: usize, block: usize) -> bool {
        let (word, mask) = self.locate(page, block);
        let was_live = self.bits[word] & mask != 0;
        self.bits[word] |= mask;
        !was_live
    }

    /// Returns `false` if the block was not live.
    pub fn mark_free(&mut self, page: usize, block: usize) -> bool {
        let (word, mask) = self.locate(page, block);
        let was_live = self.bits[word] & mask != 0;
        self.bits[word] &= !mask;
        was_live
    }

    pub fn live_in_page(&self, page: usize) -> usize {
        let start = page * self.words_per_page;
        self.bits[start..start + self.words_per_page]
            .iter()
            .map(|word| word.count_ones() as usize)
            .sum()
    }

    pub fn clear(&mut self) {
        self.bits.fill(0);
    }
}
