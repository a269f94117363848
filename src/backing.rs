//! Backing-buffer providers.
//!
//! A page pool asks its provider for memory exactly once, when it is built,
//! and hands the buffer back exactly once, when it is dropped.

use core::alloc::Layout;
use core::ptr::NonNull;

use crate::{AllocError, AllocResult};

#[cfg(feature = "log")]
use log::{error, warn};

/// Source of the single buffer a pool manages.
pub trait BackingProvider {
    /// Reserve `size` bytes aligned to `align` (a power of two).
    fn reserve(&mut self, size: usize, align: usize) -> AllocResult<NonNull<u8>>;

    /// Give back a buffer obtained from [`reserve`](Self::reserve).
    ///
    /// # Safety
    ///
    /// `base`, `size` and `align` must be exactly those of a previous
    /// successful `reserve` on this provider, and the buffer must not be
    /// used afterwards.
    unsafe fn release(&mut self, base: NonNull<u8>, size: usize, align: usize);
}

/// Reserves the pool from the global heap.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeapBacking;

impl BackingProvider for HeapBacking {
    fn reserve(&mut self, size: usize, align: usize) -> AllocResult<NonNull<u8>> {
        if size == 0 {
            return Err(AllocError::InvalidParam);
        }
        let layout = Layout::from_size_align(size, align).map_err(|_| AllocError::InvalidParam)?;
        let ptr = unsafe { alloc::alloc::alloc_zeroed(layout) };
        NonNull::new(ptr).ok_or_else(|| {
            error!("heap backing: failed to reserve {} bytes", size);
            AllocError::NoMemory
        })
    }

    unsafe fn release(&mut self, base: NonNull<u8>, size: usize, align: usize) {
        match Layout::from_size_align(size, align) {
            Ok(layout) => unsafe { alloc::alloc::dealloc(base.as_ptr(), layout) },
            Err(_) => {
                error!("heap backing: bad layout on release ({} bytes)", size);
            }
        }
    }
}

/// Hands out a caller-owned memory region.
///
/// Use this to place the pool in memory the heap does not manage, such as a
/// reserved physical range.
#[derive(Debug)]
pub struct RegionBacking {
    start: usize,
    size: usize,
    reserved: bool,
}

impl RegionBacking {
    /// # Safety
    ///
    /// `[start, start + size)` must be valid, writable memory that nothing
    /// else uses for as long as the pool built on it is alive.
    pub const unsafe fn new(start: usize, size: usize) -> Self {
        Self {
            start,
            size,
            reserved: false,
        }
    }

    pub const fn start(&self) -> usize {
        self.start
    }

    pub const fn size(&self) -> usize {
        self.size
    }
}

impl BackingProvider for RegionBacking {
    fn reserve(&mut self, size: usize, align: usize) -> AllocResult<NonNull<u8>> {
        if self.reserved {
            warn!("region backing: region at {:#x} already reserved", self.start);
            return Err(AllocError::NoMemory);
        }
        if !crate::is_aligned(self.start, align) {
            warn!(
                "region backing: start {:#x} not aligned to {:#x}",
                self.start, align
            );
            return Err(AllocError::InvalidParam);
        }
        if size > self.size {
            warn!(
                "region backing: requested {} bytes, region holds {}",
                size, self.size
            );
            return Err(AllocError::NoMemory);
        }
        let base = NonNull::new(self.start as *mut u8).ok_or(AllocError::InvalidParam)?;
        self.reserved = true;
        Ok(base)
    }

    unsafe fn release(&mut self, _base: NonNull<u8>, _size: usize, _align: usize) {
        self.reserved = false;
    }
}
