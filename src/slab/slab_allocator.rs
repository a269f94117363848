//! Slab allocator for requests below half a page.
//!
//! Routes each request to the cache of its size class and keeps the
//! live-block bitmap used to validate releases.

use alloc::vec::Vec;

use super::live_map::LiveBlockMap;
use super::size_class::SizeClassTable;
use super::slab_cache::{block_index, SlabCache};
use crate::config::PoolConfig;
use crate::pool::{PageHeader, PageHeaderTable, PagePool};
use crate::{AllocError, AllocResult};

pub struct SlabAllocator {
    classes: SizeClassTable,
    caches: Vec<SlabCache>,
    live: LiveBlockMap,
}

impl SlabAllocator {
    pub fn new(config: &PoolConfig, page_count: usize) -> Self {
        let classes = SizeClassTable::new(config.min_alloc_size(), config.page_size());
        let caches = classes
            .classes()
            .iter()
            .map(|&class_size| SlabCache::new(class_size, page_count))
            .collect();
        Self {
            classes,
            caches,
            live: LiveBlockMap::new(page_count, config.max_blocks_per_page()),
        }
    }

    /// Cache serving blocks of exactly `class_size` bytes.
    pub fn cache(&self, class_size: usize) -> Option<&SlabCache> {
        self.classes
            .index_of(class_size)
            .map(|index| &self.caches[index])
    }

    /// Allocate a block for a `size`-byte request.
    pub fn alloc(
        &mut self,
        table: &mut PageHeaderTable,
        pool: &mut PagePool,
        size: usize,
    ) -> AllocResult<usize> {
        let index = self
            .classes
            .index_for(size)
            .ok_or(AllocError::InvalidParam)?;
        self.caches[index].alloc_object(table, pool, &mut self.live)
    }

    /// Release the block at `addr`, which lies in the divided `page`.
    pub fn dealloc(
        &mut self,
        table: &mut PageHeaderTable,
        pool: &mut PagePool,
        page: usize,
        addr: usize,
    ) -> AllocResult {
        let PageHeader::Divided { class_size, .. } = table.get(page) else {
            return Err(AllocError::InvalidAddress);
        };
        let index = self
            .classes
            .index_of(class_size)
            .ok_or(AllocError::InvalidAddress)?;
        self.caches[index].dealloc_object(table, pool, &mut self.live, page, addr)
    }

    /// Size of the live block at `addr`.
    pub fn block_size(&self, table: &PageHeaderTable, page: usize, addr: usize) -> AllocResult<usize> {
        let PageHeader::Divided { class_size, .. } = table.get(page) else {
            return Err(AllocError::InvalidAddress);
        };
        let index = block_index(table.page_addr(page), class_size, addr)?;
        if !self.live.is_live(page, index) {
            return Err(AllocError::NotAllocated);
        }
        Ok(class_size)
    }

    /// Forget every registered page and live block.
    pub fn reset(&mut self) {
        for cache in self.caches.iter_mut() {
            cache.clear();
        }
        self.live.clear();
    }
}
