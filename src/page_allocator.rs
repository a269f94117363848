//! Page-pool allocator facade.
//!
//! Routes requests below half a page to the slab allocator and larger ones to
//! the region allocator, both carving the same reserved buffer.

use core::alloc::Layout;
use core::ptr::{self, NonNull};

use alloc::vec::Vec;

#[cfg(feature = "log")]
use log::{error, info, warn};

use crate::backing::{BackingProvider, HeapBacking};
use crate::config::{ExhaustionPolicy, PoolConfig};
use crate::pool::{PageHeader, PageHeaderTable, PagePool, PageRecord, PageState, PoolStats};
use crate::region_allocator::RegionAllocator;
use crate::slab::SlabAllocator;
use crate::{AllocError, AllocResult, ByteAllocator};

/// Allocator over a single pool of fixed-size pages.
///
/// Not thread-safe. Wrap it in [`LockedPageSlabAllocator`] (one coarse lock
/// per instance) to share it.
///
/// [`LockedPageSlabAllocator`]: crate::LockedPageSlabAllocator
pub struct PageSlabAllocator<B: BackingProvider = HeapBacking> {
    config: PoolConfig,
    base: NonNull<u8>,
    table: PageHeaderTable,
    pool: PagePool,
    slabs: SlabAllocator,
    regions: RegionAllocator,
    backing: B,
}

// SAFETY: the allocator exclusively owns its buffer; moving it to another
// thread moves that ownership along with it.
unsafe impl<B: BackingProvider + Send> Send for PageSlabAllocator<B> {}

impl PageSlabAllocator<HeapBacking> {
    /// Reserve a pool of `ceil(bytes / 4096)` pages from the heap.
    pub fn new(bytes: usize) -> AllocResult<Self> {
        Self::with_config(bytes, PoolConfig::new())
    }

    /// Reserve a heap-backed pool with a custom geometry and policy.
    pub fn with_config(bytes: usize, config: PoolConfig) -> AllocResult<Self> {
        Self::with_backing(bytes, config, HeapBacking)
    }
}

impl<B: BackingProvider> PageSlabAllocator<B> {
    /// Reserve `ceil(bytes / page_size) * page_size` bytes from `backing`.
    pub fn with_backing(bytes: usize, config: PoolConfig, mut backing: B) -> AllocResult<Self> {
        config.validate()?;
        if bytes == 0 {
            return Err(AllocError::InvalidParam);
        }

        let page_size = config.page_size();
        let page_count = config.pages_for(bytes);
        let pool_bytes = page_count
            .checked_mul(page_size)
            .ok_or(AllocError::InvalidParam)?;
        let base = backing.reserve(pool_bytes, page_size)?;

        info!(
            "page pool: reserved {} pages ({} bytes) at {:#x}",
            page_count,
            pool_bytes,
            base.as_ptr() as usize
        );

        Ok(Self {
            config,
            base,
            table: PageHeaderTable::new(base.as_ptr() as usize, page_size, page_count),
            pool: PagePool::new(page_count),
            slabs: SlabAllocator::new(&config, page_count),
            regions: RegionAllocator::new(page_size),
            backing,
        })
    }

    /// Page size in bytes.
    pub fn page_size(&self) -> usize {
        self.config.page_size()
    }

    /// Number of pages in the pool.
    pub fn page_count(&self) -> usize {
        self.table.len()
    }

    /// Pages currently neither divided nor part of a region.
    pub fn free_page_count(&self) -> usize {
        self.pool.free_count()
    }

    /// Start of the backing buffer.
    pub fn base(&self) -> NonNull<u8> {
        self.base
    }

    /// Size of the backing buffer in bytes.
    pub fn total_bytes(&self) -> usize {
        self.page_count() * self.page_size()
    }

    /// Header of `page`, or `None` past the end of the pool.
    pub fn header(&self, page: usize) -> Option<PageHeader> {
        (page < self.table.len()).then(|| self.table.get(page))
    }

    /// Page owning `ptr`, or `None` when it lies outside the pool.
    pub fn page_index_of(&self, ptr: NonNull<u8>) -> Option<usize> {
        self.table.page_index_of(ptr.as_ptr() as usize)
    }

    /// Allocate `size` bytes.
    ///
    /// Requests below half a page get a block of their size class; larger
    /// ones get `ceil(size / page_size)` contiguous pages. Exhaustion is
    /// handled according to the configured [`ExhaustionPolicy`].
    pub fn allocate(&mut self, size: usize) -> AllocResult<NonNull<u8>> {
        let result = self.try_allocate(size);
        if result == Err(AllocError::NoMemory) {
            self.check_exhaustion_policy(size);
        }
        result
    }

    /// Allocate `size` bytes, reporting exhaustion as `NoMemory` whatever the
    /// configured policy. Never panics.
    pub fn try_allocate(&mut self, size: usize) -> AllocResult<NonNull<u8>> {
        if size == 0 {
            return Err(AllocError::InvalidParam);
        }

        let result = if size < self.config.slab_limit() {
            self.slabs.alloc(&mut self.table, &mut self.pool, size)
        } else {
            self.regions
                .alloc_region(&mut self.table, &mut self.pool, size)
                .map(|page| self.table.page_addr(page))
        };

        match result {
            Ok(addr) => Ok(unsafe { NonNull::new_unchecked(addr as *mut u8) }),
            Err(AllocError::NoMemory) => {
                self.print_alloc_failure_stats(size);
                Err(AllocError::NoMemory)
            }
            Err(e) => Err(e),
        }
    }

    fn check_exhaustion_policy(&self, size: usize) {
        if self.config.exhaustion_policy() == ExhaustionPolicy::Abort {
            panic!(
                "page pool exhausted: cannot allocate {} bytes from {} pages",
                size,
                self.page_count()
            );
        }
    }

    #[cfg(feature = "tracking")]
    fn print_alloc_failure_stats(&self, size: usize) {
        crate::pool::MemoryStatsReporter::print_alloc_failure_stats(
            self.page_size(),
            &self.stats(),
            &self.table,
            size,
        );
    }

    #[cfg(not(feature = "tracking"))]
    fn print_alloc_failure_stats(&self, _size: usize) {
        error!(
            "page pool: allocation of {} bytes failed, {} of {} pages free",
            _size,
            self.pool.free_count(),
            self.page_count()
        );
    }

    /// Usable size of the live allocation at `ptr`.
    pub fn usable_size(&self, ptr: NonNull<u8>) -> AllocResult<usize> {
        let addr = ptr.as_ptr() as usize;
        let page = self
            .table
            .page_index_of(addr)
            .ok_or(AllocError::InvalidAddress)?;

        match self.table.get(page).state() {
            PageState::Divided => self.slabs.block_size(&self.table, page, addr),
            PageState::MultiPageRegion => {
                if addr != self.table.page_addr(page) {
                    return Err(AllocError::InvalidAddress);
                }
                let pages = self.regions.region_length(&self.table, page)?;
                Ok(pages * self.page_size())
            }
            PageState::Free => Err(AllocError::NotAllocated),
        }
    }

    /// Give back an allocation made by [`allocate`](Self::allocate) or
    /// [`reallocate`](Self::reallocate).
    pub fn release(&mut self, ptr: NonNull<u8>) -> AllocResult {
        let addr = ptr.as_ptr() as usize;
        let Some(page) = self.table.page_index_of(addr) else {
            warn!("page pool: release of foreign address {:#x}", addr);
            return Err(AllocError::InvalidAddress);
        };

        match self.table.get(page).state() {
            PageState::Divided => self
                .slabs
                .dealloc(&mut self.table, &mut self.pool, page, addr),
            PageState::MultiPageRegion => {
                if addr != self.table.page_addr(page) {
                    warn!("page pool: {:#x} is not the start of a region", addr);
                    return Err(AllocError::InvalidAddress);
                }
                self.regions
                    .dealloc_region(&mut self.table, &mut self.pool, page)
                    .map(|_| ())
            }
            PageState::Free => {
                warn!("page pool: release of {:#x} in free page {}", addr, page);
                Err(AllocError::NotAllocated)
            }
        }
    }

    /// Move an allocation to a fresh block or region of `new_size` bytes.
    ///
    /// Always allocates anew, copies `min(old, new_size)` bytes and releases
    /// the old allocation. If the new allocation fails, the old one is left
    /// untouched.
    pub fn reallocate(&mut self, ptr: NonNull<u8>, new_size: usize) -> AllocResult<NonNull<u8>> {
        self.move_allocation(ptr, new_size, Self::allocate)
    }

    /// [`reallocate`](Self::reallocate) on top of
    /// [`try_allocate`](Self::try_allocate). Never panics.
    pub fn try_reallocate(
        &mut self,
        ptr: NonNull<u8>,
        new_size: usize,
    ) -> AllocResult<NonNull<u8>> {
        self.move_allocation(ptr, new_size, Self::try_allocate)
    }

    fn move_allocation(
        &mut self,
        ptr: NonNull<u8>,
        new_size: usize,
        allocate: fn(&mut Self, usize) -> AllocResult<NonNull<u8>>,
    ) -> AllocResult<NonNull<u8>> {
        let old_size = self.usable_size(ptr)?;
        let new_ptr = allocate(self, new_size)?;

        // SAFETY: both allocations are live, distinct, and at least
        // `min(old_size, new_size)` bytes long.
        unsafe {
            ptr::copy_nonoverlapping(ptr.as_ptr(), new_ptr.as_ptr(), old_size.min(new_size));
        }
        self.release(ptr)?;
        Ok(new_ptr)
    }

    /// Release every allocation at once. Memory contents are left as they are.
    pub fn reset(&mut self) {
        let page_count = self.table.len();
        self.table.reset_all();
        self.pool.reset(page_count);
        self.slabs.reset();
        info!("page pool: reset {} pages", page_count);
    }

    /// Same as [`reset`](Self::reset).
    pub fn release_all(&mut self) {
        self.reset();
    }

    /// One record per page, in page order.
    pub fn dump(&self) -> Vec<PageRecord> {
        self.table
            .iter()
            .map(|(index, header)| PageRecord::from_header(index, header))
            .collect()
    }

    /// Aggregate counters over the whole pool.
    pub fn stats(&self) -> PoolStats {
        PoolStats::collect(&self.table)
    }

    /// Log the pool layout and every non-free page.
    #[cfg(feature = "log")]
    pub fn print_pool_info(&self) {
        let stats = self.stats();
        info!("========== Page Pool Info ==========");
        info!(
            "Base: {:#x}, page size: {:#x}, pages: {}",
            self.base.as_ptr() as usize,
            self.page_size(),
            self.page_count()
        );
        info!(
            "Free: {}, divided: {}, region: {}, live blocks: {}",
            stats.free_pages, stats.divided_pages, stats.region_pages, stats.live_blocks
        );
        for record in self.dump() {
            match record.state {
                PageState::Free => {}
                PageState::Divided => {
                    info!(
                        "  Page {}: divided, class {} bytes, {} blocks free",
                        record.page_index,
                        record.class_size.unwrap_or(0),
                        record.free_blocks.unwrap_or(0)
                    );
                }
                PageState::MultiPageRegion => {
                    info!(
                        "  Page {}: region of {} pages",
                        record.page_index,
                        record.region_length.unwrap_or(0)
                    );
                }
            }
        }
        info!("====================================");
    }

    /// Log the pool layout and every non-free page.
    #[cfg(not(feature = "log"))]
    pub fn print_pool_info(&self) {}

    /// Give the backing buffer back. Equivalent to dropping the allocator.
    pub fn destroy(self) {}
}

impl<B: BackingProvider> Drop for PageSlabAllocator<B> {
    fn drop(&mut self) {
        let pool_bytes = self.total_bytes();
        // SAFETY: `base` and `pool_bytes` are what `reserve` returned and was
        // asked for, with page alignment; nothing uses the buffer after drop.
        unsafe {
            self.backing
                .release(self.base, pool_bytes, self.config.page_size())
        };
        info!(
            "page pool: released {} bytes at {:#x}",
            pool_bytes,
            self.base.as_ptr() as usize
        );
    }
}

impl<B: BackingProvider> ByteAllocator for PageSlabAllocator<B> {
    fn alloc(&mut self, layout: Layout) -> AllocResult<NonNull<u8>> {
        // Blocks are aligned to their class size and regions to the page size.
        if layout.align() > self.page_size() {
            return Err(AllocError::InvalidParam);
        }
        self.allocate(layout.size().max(layout.align()))
    }

    fn dealloc(&mut self, pos: NonNull<u8>, _layout: Layout) {
        if let Err(_e) = self.release(pos) {
            error!(
                "page pool: dealloc of {:#x} failed: {}",
                pos.as_ptr() as usize,
                _e
            );
        }
    }

    fn total_bytes(&self) -> usize {
        self.page_count() * self.page_size()
    }

    fn used_bytes(&self) -> usize {
        self.stats().used_bytes
    }

    fn available_bytes(&self) -> usize {
        self.total_bytes() - self.stats().used_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;

    struct CountingBacking<'a> {
        inner: HeapBacking,
        reserves: &'a Cell<usize>,
        releases: &'a Cell<usize>,
    }

    impl BackingProvider for CountingBacking<'_> {
        fn reserve(&mut self, size: usize, align: usize) -> AllocResult<NonNull<u8>> {
            self.reserves.set(self.reserves.get() + 1);
            self.inner.reserve(size, align)
        }

        unsafe fn release(&mut self, base: NonNull<u8>, size: usize, align: usize) {
            self.releases.set(self.releases.get() + 1);
            unsafe { self.inner.release(base, size, align) };
        }
    }

    #[test]
    fn test_backing_used_once() {
        let reserves = Cell::new(0);
        let releases = Cell::new(0);
        let backing = CountingBacking {
            inner: HeapBacking,
            reserves: &reserves,
            releases: &releases,
        };

        let mut allocator =
            PageSlabAllocator::with_backing(32768, PoolConfig::new(), backing).unwrap();
        for size in [16, 300, 4096, 9000] {
            let ptr = allocator.allocate(size).unwrap();
            allocator.release(ptr).unwrap();
        }
        allocator.reset();
        assert_eq!(reserves.get(), 1);
        assert_eq!(releases.get(), 0);

        allocator.destroy();
        assert_eq!(releases.get(), 1);
    }

    #[test]
    fn test_construction_rounds_up() {
        let allocator = PageSlabAllocator::new(4097).unwrap();
        assert_eq!(allocator.page_count(), 2);
        assert_eq!(allocator.total_bytes(), 8192);
        assert_eq!(allocator.free_page_count(), 2);
        assert_eq!(allocator.base().as_ptr() as usize % 4096, 0);
    }

    #[test]
    fn test_construction_errors() {
        assert_eq!(
            PageSlabAllocator::new(0).err(),
            Some(AllocError::InvalidParam)
        );
        assert_eq!(
            PageSlabAllocator::with_config(4096, PoolConfig::new().with_page_size(1000)).err(),
            Some(AllocError::InvalidParam)
        );
    }

    #[test]
    fn test_zero_size_request() {
        let mut allocator = PageSlabAllocator::new(4096).unwrap();
        assert_eq!(allocator.allocate(0), Err(AllocError::InvalidParam));
    }

    #[test]
    fn test_usable_size() {
        let mut allocator = PageSlabAllocator::new(8 * 4096).unwrap();

        let small = allocator.allocate(100).unwrap();
        let large = allocator.allocate(5000).unwrap();
        assert_eq!(allocator.usable_size(small), Ok(128));
        assert_eq!(allocator.usable_size(large), Ok(8192));

        allocator.release(small).unwrap();
        assert_eq!(allocator.usable_size(small), Err(AllocError::NotAllocated));
    }

    #[test]
    fn test_mid_region_release_rejected() {
        let mut allocator = PageSlabAllocator::new(8 * 4096).unwrap();
        let region = allocator.allocate(3 * 4096).unwrap();

        let second_page = unsafe { NonNull::new_unchecked(region.as_ptr().add(4096)) };
        assert_eq!(
            allocator.release(second_page),
            Err(AllocError::InvalidAddress)
        );
        let inside_first = unsafe { NonNull::new_unchecked(region.as_ptr().add(8)) };
        assert_eq!(
            allocator.release(inside_first),
            Err(AllocError::InvalidAddress)
        );

        assert_eq!(allocator.release(region), Ok(()));
        assert_eq!(allocator.free_page_count(), 8);
    }

    #[test]
    fn test_foreign_address_rejected() {
        let mut allocator = PageSlabAllocator::new(4096).unwrap();
        let mut local = 0u64;
        let foreign = NonNull::from(&mut local).cast::<u8>();
        assert_eq!(allocator.release(foreign), Err(AllocError::InvalidAddress));
        assert_eq!(
            allocator.reallocate(foreign, 16),
            Err(AllocError::InvalidAddress)
        );
    }

    #[test]
    #[should_panic(expected = "page pool exhausted")]
    fn test_abort_policy_panics() {
        let config = PoolConfig::new().with_exhaustion_policy(ExhaustionPolicy::Abort);
        let mut allocator = PageSlabAllocator::with_config(4096, config).unwrap();
        let _ = allocator.allocate(4096).unwrap();
        let _ = allocator.allocate(4096);
    }

    #[test]
    fn test_try_allocate_ignores_abort_policy() {
        let config = PoolConfig::new().with_exhaustion_policy(ExhaustionPolicy::Abort);
        let mut allocator = PageSlabAllocator::with_config(2 * 4096, config).unwrap();

        let region = allocator.try_allocate(4096).unwrap();
        let block = allocator.try_allocate(64).unwrap();
        assert_eq!(allocator.try_allocate(4096), Err(AllocError::NoMemory));
        assert_eq!(allocator.try_allocate(128), Err(AllocError::NoMemory));
        assert_eq!(
            allocator.try_reallocate(block, 2 * 4096),
            Err(AllocError::NoMemory)
        );
        assert_eq!(allocator.usable_size(block), Ok(64));

        allocator.release(region).unwrap();
        let moved = allocator.try_reallocate(block, 4096).unwrap();
        assert_eq!(allocator.usable_size(moved), Ok(4096));
    }

    #[test]
    fn test_byte_allocator() {
        let mut allocator = PageSlabAllocator::new(4 * 4096).unwrap();

        let layout = Layout::from_size_align(24, 64).unwrap();
        let ptr = ByteAllocator::alloc(&mut allocator, layout).unwrap();
        assert_eq!(ptr.as_ptr() as usize % 64, 0);
        assert_eq!(allocator.used_bytes(), 64);
        assert_eq!(allocator.available_bytes(), 4 * 4096 - 64);

        ByteAllocator::dealloc(&mut allocator, ptr, layout);
        assert_eq!(allocator.used_bytes(), 0);

        let too_aligned = Layout::from_size_align(16, 8192).unwrap();
        assert_eq!(
            ByteAllocator::alloc(&mut allocator, too_aligned),
            Err(AllocError::InvalidParam)
        );
    }

    #[test]
    fn test_small_page_geometry() {
        let config = PoolConfig::new().with_page_size(256).with_min_alloc_size(32);
        let mut allocator = PageSlabAllocator::with_config(1024, config).unwrap();
        assert_eq!(allocator.page_count(), 4);

        let block = allocator.allocate(20).unwrap();
        assert_eq!(allocator.usable_size(block), Ok(32));
        let region = allocator.allocate(128).unwrap();
        assert_eq!(allocator.usable_size(region), Ok(256));

        let record = allocator.dump()[3];
        assert_eq!(record.class_size, Some(32));
        assert_eq!(record.free_blocks, Some(7));

        allocator.print_pool_info();
        assert_eq!(allocator.stats().divided_pages, 1);
    }
}
