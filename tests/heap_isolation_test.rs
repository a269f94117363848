//! Checks that a locked pool, once initialized, serves every request without
//! touching the process heap.

#![no_std]

extern crate alloc;
extern crate page_slab_allocator;
extern crate std;

use alloc::vec::Vec;
use core::alloc::{GlobalAlloc, Layout};
use core::cell::Cell;
use page_slab_allocator::{
    ExhaustionPolicy, LockedPageSlabAllocator, PageState, PoolConfig, RegionBacking,
};
use std::alloc::System;

const PAGE_SIZE: usize = 0x1000;
const POOL_PAGES: usize = 64;

std::thread_local! {
    static COUNTING: Cell<bool> = const { Cell::new(false) };
    static HEAP_ALLOCS: Cell<usize> = const { Cell::new(0) };
}

/// System heap that counts allocations made on the current thread while
/// counting is switched on.
struct CountingHeap;

fn record_heap_alloc() {
    let _ = COUNTING.try_with(|counting| {
        if counting.get() {
            let _ = HEAP_ALLOCS.try_with(|count| count.set(count.get() + 1));
        }
    });
}

unsafe impl GlobalAlloc for CountingHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        record_heap_alloc();
        unsafe { System.alloc(layout) }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        unsafe { System.dealloc(ptr, layout) }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        record_heap_alloc();
        unsafe { System.realloc(ptr, layout, new_size) }
    }
}

#[global_allocator]
static HEAP: CountingHeap = CountingHeap;

/// Run `f` and return how many heap allocations it made on this thread.
fn heap_allocs_during(f: impl FnOnce()) -> usize {
    HEAP_ALLOCS.with(|count| count.set(0));
    COUNTING.with(|counting| counting.set(true));
    f();
    COUNTING.with(|counting| counting.set(false));
    HEAP_ALLOCS.with(|count| count.get())
}

fn alloc_test_region(size: usize) -> (*mut u8, Layout) {
    let layout = Layout::from_size_align(size, PAGE_SIZE).unwrap();
    let ptr = unsafe { alloc::alloc::alloc(layout) };
    assert!(!ptr.is_null(), "Failed to allocate test region");
    (ptr, layout)
}

fn init_pool(
    allocator: &LockedPageSlabAllocator<RegionBacking>,
    region: *mut u8,
    config: PoolConfig,
) {
    let backing = unsafe { RegionBacking::new(region as usize, POOL_PAGES * PAGE_SIZE) };
    allocator
        .init(POOL_PAGES * PAGE_SIZE, config, backing)
        .unwrap();
}

#[test]
fn test_counting_heap_sees_allocations() {
    let count = heap_allocs_during(|| {
        let v: Vec<u64> = Vec::with_capacity(4);
        drop(v);
    });
    assert_eq!(count, 1);
}

#[test]
fn test_pool_operations_stay_off_the_heap() {
    let (region, layout) = alloc_test_region(POOL_PAGES * PAGE_SIZE);
    let allocator = LockedPageSlabAllocator::<RegionBacking>::new();
    init_pool(&allocator, region, PoolConfig::new());

    // Enough blocks per class to register several pages in every registry.
    let sizes = [1usize, 24, 48, 100, 200, 500, 1000, 2000];
    let mut live = [[core::ptr::null_mut::<u8>(); 12]; 8];

    let count = heap_allocs_during(|| unsafe {
        for (slots, &size) in live.iter_mut().zip(sizes.iter()) {
            let layout = Layout::from_size_align(size, 1).unwrap();
            for slot in slots.iter_mut() {
                *slot = allocator.alloc(layout);
                assert!(!slot.is_null());
            }
        }

        let big = Layout::from_size_align(3 * PAGE_SIZE, 8).unwrap();
        let region_ptr = allocator.alloc(big);
        assert!(!region_ptr.is_null());

        // Release every other block, so exhausted pages rejoin their registry.
        for (slots, &size) in live.iter().zip(sizes.iter()) {
            let layout = Layout::from_size_align(size, 1).unwrap();
            for slot in slots.iter().step_by(2) {
                allocator.dealloc(*slot, layout);
            }
        }

        let moved = allocator.realloc(region_ptr, big, 100);
        assert!(!moved.is_null());
        allocator.dealloc(moved, Layout::from_size_align(100, 8).unwrap());

        for (slots, &size) in live.iter().zip(sizes.iter()) {
            let layout = Layout::from_size_align(size, 1).unwrap();
            for slot in slots.iter().skip(1).step_by(2) {
                allocator.dealloc(*slot, layout);
            }
        }

        allocator.reset().unwrap();
    });
    assert_eq!(count, 0);

    let records = allocator.dump().unwrap();
    assert!(records.iter().all(|r| r.state == PageState::Free));

    allocator.destroy();
    unsafe { alloc::alloc::dealloc(region, layout) };
}

#[test]
fn test_exhaustion_returns_null_without_heap_use() {
    let (region, layout) = alloc_test_region(POOL_PAGES * PAGE_SIZE);
    let allocator = LockedPageSlabAllocator::<RegionBacking>::new();
    let config = PoolConfig::new().with_exhaustion_policy(ExhaustionPolicy::Abort);
    init_pool(&allocator, region, config);

    let whole = Layout::from_size_align(POOL_PAGES * PAGE_SIZE, PAGE_SIZE).unwrap();
    let count = heap_allocs_during(|| unsafe {
        let all = allocator.alloc(whole);
        assert!(!all.is_null());
        assert!(allocator.alloc(Layout::new::<u64>()).is_null());
        assert!(allocator.alloc(whole).is_null());
        allocator.dealloc(all, whole);
    });
    assert_eq!(count, 0);

    allocator.destroy();
    unsafe { alloc::alloc::dealloc(region, layout) };
}
