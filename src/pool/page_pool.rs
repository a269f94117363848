//! Free page pool.
//!
//! Pages are kept on a LIFO stack seeded in ascending order, so fresh pages
//! are handed out from the highest index downward.

use alloc::vec::Vec;

use super::page_header::{PageHeader, PageHeaderTable};
use crate::{AllocError, AllocResult};

#[cfg(feature = "log")]
use log::error;

pub struct PagePool {
    free_pages: Vec<usize>,
}

impl PagePool {
    /// Create a pool with every page in `0..page_count` free.
    pub fn new(page_count: usize) -> Self {
        let mut pool = Self {
            free_pages: Vec::with_capacity(page_count),
        };
        pool.reset(page_count);
        pool
    }

    pub fn free_count(&self) -> usize {
        self.free_pages.len()
    }

    /// Free pages, most recently returned last.
    pub fn free_pages(&self) -> &[usize] {
        &self.free_pages
    }

    /// Take the most recently returned free page.
    ///
    /// The header is left `Free`; the caller assigns the new state.
    pub fn take_free_page(&mut self, table: &PageHeaderTable) -> AllocResult<usize> {
        let page = self.free_pages.pop().ok_or(AllocError::NoMemory)?;
        debug_assert!(table.get(page).is_free(), "page {} on free list is not free", page);
        Ok(page)
    }

    /// Mark `page` free and make it available again.
    ///
    /// The caller must ensure the page holds no live allocation.
    pub fn return_free_page(&mut self, table: &mut PageHeaderTable, page: usize) {
        if table.get(page).is_free() && self.free_pages.contains(&page) {
            error!("page pool: page {} returned twice", page);
            return;
        }
        table.set(page, PageHeader::Free);
        self.free_pages.push(page);
    }

    /// Remove the pages `first..first + len` from the free set.
    pub fn claim_run(&mut self, first: usize, len: usize) {
        let run = first..first + len;
        self.free_pages.retain(|page| !run.contains(page));
    }

    /// Make every page in `0..page_count` free again.
    pub fn reset(&mut self, page_count: usize) {
        self.free_pages.clear();
        self.free_pages.extend(0..page_count);
    }
}
