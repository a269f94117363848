//! Multi-page region allocator.
//!
//! Serves requests of at least half a page with a run of contiguous free
//! pages, found by a first-fit scan in physical page order.

#[cfg(feature = "log")]
use log::{debug, warn};

use crate::pool::{PageHeader, PageHeaderTable, PagePool};
use crate::{AllocError, AllocResult};

pub struct RegionAllocator {
    page_size: usize,
}

impl RegionAllocator {
    pub const fn new(page_size: usize) -> Self {
        Self { page_size }
    }

    pub fn pages_needed(&self, size: usize) -> usize {
        size.div_ceil(self.page_size)
    }

    /// First page of the lowest run of `num_pages` consecutive free pages.
    fn find_run(&self, table: &PageHeaderTable, num_pages: usize) -> Option<usize> {
        let mut run_start = 0;
        let mut run_len = 0;

        for (page, header) in table.iter() {
            if !header.is_free() {
                run_len = 0;
                continue;
            }
            if run_len == 0 {
                run_start = page;
            }
            run_len += 1;
            if run_len == num_pages {
                return Some(run_start);
            }
        }
        None
    }

    /// Reserve a region for `size` bytes. Returns the index of its first page.
    pub fn alloc_region(
        &self,
        table: &mut PageHeaderTable,
        pool: &mut PagePool,
        size: usize,
    ) -> AllocResult<usize> {
        let num_pages = self.pages_needed(size);
        if num_pages == 0 {
            return Err(AllocError::InvalidParam);
        }
        if num_pages > pool.free_count() {
            debug!(
                "region allocator: {} pages requested, only {} free",
                num_pages,
                pool.free_count()
            );
            return Err(AllocError::NoMemory);
        }

        let first_page = self.find_run(table, num_pages).ok_or_else(|| {
            debug!(
                "region allocator: no run of {} contiguous free pages",
                num_pages
            );
            AllocError::NoMemory
        })?;

        for page in first_page..first_page + num_pages {
            table.set(
                page,
                PageHeader::MultiPageRegion {
                    first_page,
                    region_length: num_pages,
                },
            );
        }
        pool.claim_run(first_page, num_pages);

        debug!(
            "region allocator: reserved pages [{}, {}) for {} bytes",
            first_page,
            first_page + num_pages,
            size
        );
        Ok(first_page)
    }

    /// Validate that `page` heads a live region and return its length.
    pub fn region_length(&self, table: &PageHeaderTable, page: usize) -> AllocResult<usize> {
        match table.get(page) {
            PageHeader::MultiPageRegion {
                first_page,
                region_length,
            } if first_page == page => Ok(region_length),
            PageHeader::MultiPageRegion {
                first_page: _first_page,
                ..
            } => {
                warn!(
                    "region allocator: page {} is inside the region starting at page {}",
                    page, _first_page
                );
                Err(AllocError::InvalidAddress)
            }
            PageHeader::Free => Err(AllocError::NotAllocated),
            PageHeader::Divided { .. } => Err(AllocError::InvalidAddress),
        }
    }

    /// Return the whole region headed by `page` to the pool.
    /// Returns the number of pages released.
    pub fn dealloc_region(
        &self,
        table: &mut PageHeaderTable,
        pool: &mut PagePool,
        page: usize,
    ) -> AllocResult<usize> {
        let region_length = self.region_length(table, page)?;
        for member in page..page + region_length {
            pool.return_free_page(table, member);
        }
        debug!(
            "region allocator: released pages [{}, {})",
            page,
            page + region_length
        );
        Ok(region_length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PageState;
    use crate::slab::FreeList;

    const PAGE_SIZE: usize = 4096;
    const BASE: usize = 0x20_0000;

    #[test]
    fn test_pages_needed() {
        let regions = RegionAllocator::new(PAGE_SIZE);
        assert_eq!(regions.pages_needed(2048), 1);
        assert_eq!(regions.pages_needed(4096), 1);
        assert_eq!(regions.pages_needed(4097), 2);
        assert_eq!(regions.pages_needed(12288), 3);
    }

    #[test]
    fn test_first_fit_in_physical_order() {
        let mut table = PageHeaderTable::new(BASE, PAGE_SIZE, 8);
        let mut pool = PagePool::new(8);
        let regions = RegionAllocator::new(PAGE_SIZE);

        assert_eq!(regions.alloc_region(&mut table, &mut pool, 4096), Ok(0));
        assert_eq!(regions.alloc_region(&mut table, &mut pool, 12288), Ok(1));

        for page in 1..4 {
            assert_eq!(table.get(page).state(), PageState::MultiPageRegion);
            assert_eq!(
                table.get(page),
                PageHeader::MultiPageRegion {
                    first_page: 1,
                    region_length: 3
                }
            );
        }
        assert_eq!(pool.free_pages(), &[4, 5, 6, 7]);
    }

    #[test]
    fn test_run_resets_on_used_page() {
        let mut table = PageHeaderTable::new(BASE, PAGE_SIZE, 6);
        let mut pool = PagePool::new(6);
        let regions = RegionAllocator::new(PAGE_SIZE);

        // Pages 0, 1 free; page 2 divided; pages 3..6 free.
        table.set(
            2,
            PageHeader::Divided {
                class_size: 16,
                free_list: FreeList::empty(),
                free_blocks: 0,
            },
        );
        pool.claim_run(2, 1);

        assert_eq!(regions.alloc_region(&mut table, &mut pool, 3 * 4096), Ok(3));
        assert_eq!(
            regions.alloc_region(&mut table, &mut pool, 3 * 4096),
            Err(AllocError::NoMemory)
        );
        assert_eq!(regions.alloc_region(&mut table, &mut pool, 2 * 4096), Ok(0));
    }

    #[test]
    fn test_release_whole_run() {
        let mut table = PageHeaderTable::new(BASE, PAGE_SIZE, 4);
        let mut pool = PagePool::new(4);
        let regions = RegionAllocator::new(PAGE_SIZE);

        let first = regions.alloc_region(&mut table, &mut pool, 3 * 4096).unwrap();
        assert_eq!(
            regions.dealloc_region(&mut table, &mut pool, first + 1),
            Err(AllocError::InvalidAddress)
        );
        assert_eq!(regions.dealloc_region(&mut table, &mut pool, first), Ok(3));
        assert!(table.iter().all(|(_, h)| h.is_free()));
        assert_eq!(pool.free_count(), 4);

        assert_eq!(
            regions.dealloc_region(&mut table, &mut pool, first),
            Err(AllocError::NotAllocated)
        );
    }
}
