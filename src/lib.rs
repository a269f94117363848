//! Page-pool memory allocator
//!
//! This crate manages a single pre-reserved buffer carved into fixed-size
//! pages, featuring:
//! - Size-classed slabs for small requests (intrusive per-page free lists)
//! - Contiguous multi-page regions for large requests
//! - A dense per-page header table with an explicit state machine
//! - An optional coarse-locked wrapper usable as a `GlobalAlloc`
//!
//! The backing buffer is obtained once from a [`BackingProvider`] at
//! construction and given back once when the allocator is dropped.

#![no_std]

extern crate alloc;

use core::alloc::Layout;
use core::fmt;
use core::ptr::NonNull;

// Logging support - conditionally import log crate
#[cfg(feature = "log")]
extern crate log;

// Stub macros when log is disabled - these become no-ops
#[cfg(not(feature = "log"))]
macro_rules! error {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
macro_rules! warn {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
macro_rules! info {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
macro_rules! debug {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
#[allow(unused_macros)]
macro_rules! trace {
    ($($arg:tt)*) => {};
}

/// Default page size
pub const DEFAULT_PAGE_SIZE: usize = 0x1000;

/// Default minimum allocation size (smallest size class)
pub const DEFAULT_MIN_ALLOC_SIZE: usize = 16;

/// The error type used for allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// Invalid `size`, layout or configuration. (e.g. zero-sized request)
    InvalidParam,
    /// No free page or contiguous run of pages can satisfy the request.
    NoMemory,
    /// The address is not the start of a block or region of this pool.
    InvalidAddress,
    /// The address names a block or region that is not currently allocated.
    NotAllocated,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocError::InvalidParam => f.write_str("invalid allocation parameter"),
            AllocError::NoMemory => f.write_str("out of memory"),
            AllocError::InvalidAddress => f.write_str("address not owned by this allocator"),
            AllocError::NotAllocated => f.write_str("address is not currently allocated"),
        }
    }
}

/// A [`Result`] type with [`AllocError`] as the error type.
pub type AllocResult<T = ()> = Result<T, AllocError>;

/// Byte-granularity allocator.
pub trait ByteAllocator {
    /// Allocate memory with the given size (in bytes) and alignment.
    fn alloc(&mut self, layout: Layout) -> AllocResult<NonNull<u8>>;

    /// Deallocate memory at the given position, size, and alignment.
    fn dealloc(&mut self, pos: NonNull<u8>, layout: Layout);

    /// Returns total memory size in bytes.
    fn total_bytes(&self) -> usize;

    /// Returns allocated memory size in bytes.
    fn used_bytes(&self) -> usize;

    /// Returns available memory size in bytes.
    fn available_bytes(&self) -> usize;
}

/// Checks whether the address has the demanded alignment.
///
/// Equivalent to `addr % align == 0`, but the alignment must be a power of two.
#[inline]
const fn is_aligned(base_addr: usize, align: usize) -> bool {
    base_addr & (align - 1) == 0
}

pub mod backing;
pub use backing::{BackingProvider, HeapBacking, RegionBacking};

pub mod config;
pub use config::{ExhaustionPolicy, PoolConfig};

pub mod pool;
pub use pool::{PageHeader, PageRecord, PageState, PoolStats};

pub mod slab;
pub use slab::{SizeClassTable, SlabAllocator};

pub mod region_allocator;
pub use region_allocator::RegionAllocator;

pub mod page_allocator;
pub use page_allocator::PageSlabAllocator;

pub mod global_allocator;
pub use global_allocator::LockedPageSlabAllocator;
