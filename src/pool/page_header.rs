//! Per-page metadata.
//!
//! One header per page, stored in a dense array indexed by page number.

use alloc::vec;
use alloc::vec::Vec;

use crate::slab::FreeList;

/// Coarse interpretation of a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    Free,
    Divided,
    MultiPageRegion,
}

/// Page header. Fields only exist in the state where they are meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageHeader {
    /// Unused, available to either manager.
    Free,
    /// Split into equal blocks of `class_size` bytes.
    Divided {
        class_size: usize,
        free_list: FreeList,
        free_blocks: usize,
    },
    /// Member of a run of `region_length` pages starting at `first_page`.
    MultiPageRegion {
        first_page: usize,
        region_length: usize,
    },
}

impl PageHeader {
    /// Coarse state of the page.
    pub const fn state(&self) -> PageState {
        match self {
            PageHeader::Free => PageState::Free,
            PageHeader::Divided { .. } => PageState::Divided,
            PageHeader::MultiPageRegion { .. } => PageState::MultiPageRegion,
        }
    }

    pub const fn is_free(&self) -> bool {
        matches!(self, PageHeader::Free)
    }
}

/// Header table for the whole pool.
pub struct PageHeaderTable {
    base: usize,
    page_size: usize,
    headers: Vec<PageHeader>,
}

impl PageHeaderTable {
    /// Create a table of `page_count` free pages starting at `base`.
    pub fn new(base: usize, page_size: usize, page_count: usize) -> Self {
        Self {
            base,
            page_size,
            headers: vec![PageHeader::Free; page_count],
        }
    }

    /// Number of pages in the pool.
    pub fn len(&self) -> usize {
        self.headers.len()
    }

    /// Returns `true` if the pool has no pages.
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// Page size in bytes.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Header of `page`, by value.
    pub fn get(&self, page: usize) -> PageHeader {
        self.headers[page]
    }

    /// Header of `page`, for in-place updates.
    pub fn get_mut(&mut self, page: usize) -> &mut PageHeader {
        &mut self.headers[page]
    }

    /// Replace the header of `page`.
    pub fn set(&mut self, page: usize, header: PageHeader) {
        self.headers[page] = header;
    }

    /// Page owning `addr`, or `None` when `addr` lies outside the pool.
    pub fn page_index_of(&self, addr: usize) -> Option<usize> {
        let offset = addr.checked_sub(self.base)?;
        let page = offset / self.page_size;
        (page < self.headers.len()).then_some(page)
    }

    /// Start address of `page`.
    pub fn page_addr(&self, page: usize) -> usize {
        self.base + page * self.page_size
    }

    /// Headers with their page index, in page order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &PageHeader)> {
        self.headers.iter().enumerate()
    }

    /// Mark every page free.
    pub fn reset_all(&mut self) {
        self.headers.fill(PageHeader::Free);
    }
}
