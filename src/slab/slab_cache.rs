//! Slab cache implementation for a single size class.
//!
//! A `SlabCache` registers the divided pages of its class that still have at
//! least one free block. Pages leave the registry when they run out of blocks
//! and return to the page pool once every block is free again.

use alloc::vec::Vec;

#[cfg(feature = "log")]
use log::{debug, warn};

use super::free_list::FreeList;
use super::live_map::LiveBlockMap;
use crate::pool::{PageHeader, PageHeaderTable, PagePool};
use crate::{AllocError, AllocResult};

/// Index of the block starting at `addr` in a page of `class_size` blocks.
pub(crate) fn block_index(page_addr: usize, class_size: usize, addr: usize) -> AllocResult<usize> {
    let offset = addr
        .checked_sub(page_addr)
        .ok_or(AllocError::InvalidAddress)?;
    if offset % class_size != 0 {
        warn!(
            "slab cache {}: address {:#x} is not at a block boundary",
            class_size, addr
        );
        return Err(AllocError::InvalidAddress);
    }
    Ok(offset / class_size)
}

/// Slab cache for a specific size class
pub struct SlabCache {
    class_size: usize,
    /// Divided pages of this class with free blocks, most recent last.
    partial: Vec<usize>,
}

impl SlabCache {
    /// Create the cache with room to register every page of a `page_count`
    /// pool, so registering a page never allocates.
    pub fn new(class_size: usize, page_count: usize) -> Self {
        Self {
            class_size,
            partial: Vec::with_capacity(page_count),
        }
    }

    /// Pages with free blocks, most recently registered last.
    pub fn partial_pages(&self) -> &[usize] {
        &self.partial
    }

    pub fn clear(&mut self) {
        self.partial.clear();
    }

    /// Allocate a block, dividing a fresh page when no registered page has room.
    /// Returns the block address.
    pub fn alloc_object(
        &mut self,
        table: &mut PageHeaderTable,
        pool: &mut PagePool,
        live: &mut LiveBlockMap,
    ) -> AllocResult<usize> {
        let page = match self.partial.last() {
            Some(&page) => page,
            None => self.divide_page(table, pool)?,
        };
        let page_addr = table.page_addr(page);

        let PageHeader::Divided {
            free_list,
            free_blocks,
            ..
        } = table.get_mut(page)
        else {
            panic!(
                "slab cache {}: registered page {} is not divided",
                self.class_size, page
            );
        };

        // SAFETY: the page is divided and owned by this pool; every block on
        // its list was linked by `thread` or `push`.
        let Some(block) = (unsafe { free_list.pop() }) else {
            panic!(
                "Allocation from page {} failed despite free_blocks={}, free list inconsistency detected",
                page, free_blocks
            );
        };
        *free_blocks -= 1;
        let exhausted = *free_blocks == 0;

        if exhausted {
            self.unregister(page);
        }
        let fresh = live.mark_live(page, (block - page_addr) / self.class_size);
        debug_assert!(fresh, "block {:#x} handed out twice", block);

        Ok(block)
    }

    /// Take a free page and split it into blocks of this class.
    fn divide_page(&mut self, table: &mut PageHeaderTable, pool: &mut PagePool) -> AllocResult<usize> {
        let page = pool.take_free_page(table)?;
        let page_addr = table.page_addr(page);
        let blocks = table.page_size() / self.class_size;

        // SAFETY: the page was free, so no allocation refers to its bytes, and
        // page addresses and class sizes are multiples of the minimum class.
        let free_list = unsafe { FreeList::thread(page_addr, self.class_size, blocks) };
        table.set(
            page,
            PageHeader::Divided {
                class_size: self.class_size,
                free_list,
                free_blocks: blocks,
            },
        );
        self.partial.push(page);

        debug!(
            "slab cache {}: divided page {} at {:#x} into {} blocks",
            self.class_size, page, page_addr, blocks
        );
        Ok(page)
    }

    /// Give back the block at `addr` in `page`.
    pub fn dealloc_object(
        &mut self,
        table: &mut PageHeaderTable,
        pool: &mut PagePool,
        live: &mut LiveBlockMap,
        page: usize,
        addr: usize,
    ) -> AllocResult {
        let page_addr = table.page_addr(page);
        let blocks_per_page = table.page_size() / self.class_size;

        let PageHeader::Divided {
            class_size,
            free_list,
            free_blocks,
        } = table.get_mut(page)
        else {
            return Err(AllocError::InvalidAddress);
        };
        if *class_size != self.class_size {
            return Err(AllocError::InvalidAddress);
        }

        let index = block_index(page_addr, self.class_size, addr)?;
        if !live.mark_free(page, index) {
            warn!(
                "slab cache {}: block {:#x} in page {} is not allocated",
                self.class_size, addr, page
            );
            return Err(AllocError::NotAllocated);
        }

        // SAFETY: the block was live until now; its owner gave it back.
        unsafe { free_list.push(addr) };
        let was_exhausted = *free_blocks == 0;
        *free_blocks += 1;
        let now_empty = *free_blocks == blocks_per_page;

        if now_empty {
            if !was_exhausted {
                self.unregister(page);
            }
            pool.return_free_page(table, page);
            debug!(
                "slab cache {}: page {} fully free, returned to pool",
                self.class_size, page
            );
        } else if was_exhausted {
            self.partial.push(page);
        }

        Ok(())
    }

    fn unregister(&mut self, page: usize) {
        if let Some(pos) = self.partial.iter().rposition(|&p| p == page) {
            self.partial.remove(pos);
        }
    }
}
