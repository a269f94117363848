//! Coarse-locked page pool.
//!
//! The pool's free lists, class registries and header table form one tightly
//! coupled unit, so the only supported way to share an allocator is a single
//! lock around the whole instance. This wrapper provides that lock and a
//! [`GlobalAlloc`] implementation on top of it.

use alloc::vec::Vec;
use core::alloc::{GlobalAlloc, Layout};
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicBool, Ordering};

use kspin::SpinNoIrq;

#[cfg(feature = "log")]
use log::{error, warn};

use crate::backing::{BackingProvider, HeapBacking};
use crate::config::PoolConfig;
use crate::page_allocator::PageSlabAllocator;
use crate::pool::{PageRecord, PoolStats};
use crate::{AllocError, AllocResult};

/// Page pool behind one spin lock, initialized at runtime.
///
/// [`init`](Self::init) builds the pool metadata (header table, free page
/// stack, class registries, live-block map) on the global heap, sized for the
/// whole pool. After that, allocating, releasing, reallocating and resetting
/// never touch the global heap. The wrapper therefore cannot be the
/// `#[global_allocator]` itself; it serves as a [`GlobalAlloc`] for a second pool, typically over a
/// [`RegionBacking`](crate::RegionBacking), next to a bootstrap heap.
///
/// The [`GlobalAlloc`] methods never unwind: exhaustion yields a null pointer
/// even under [`ExhaustionPolicy::Abort`](crate::ExhaustionPolicy::Abort).
pub struct LockedPageSlabAllocator<B: BackingProvider = HeapBacking> {
    inner: SpinNoIrq<Option<PageSlabAllocator<B>>>,
    initialized: AtomicBool,
}

impl<B: BackingProvider> LockedPageSlabAllocator<B> {
    /// Create an uninitialized wrapper. Every request fails until
    /// [`init`](Self::init) succeeds.
    pub const fn new() -> Self {
        Self {
            inner: SpinNoIrq::new(None),
            initialized: AtomicBool::new(false),
        }
    }

    /// Build the pool, allocating its metadata from the global heap.
    /// Fails with `InvalidParam` if already initialized.
    pub fn init(&self, bytes: usize, config: PoolConfig, backing: B) -> AllocResult {
        let mut inner = self.inner.lock();
        if inner.is_some() {
            warn!("locked allocator: already initialized");
            return Err(AllocError::InvalidParam);
        }
        *inner = Some(PageSlabAllocator::with_backing(bytes, config, backing)?);
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Returns `true` once [`init`](Self::init) has succeeded.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    fn with_inner<R>(
        &self,
        f: impl FnOnce(&mut PageSlabAllocator<B>) -> AllocResult<R>,
    ) -> AllocResult<R> {
        if !self.is_initialized() {
            error!("locked allocator: Allocator not initialized");
            return Err(AllocError::NoMemory);
        }
        let mut inner = self.inner.lock();
        let allocator = inner.as_mut().ok_or(AllocError::NoMemory)?;
        f(allocator)
    }

    pub fn allocate(&self, size: usize) -> AllocResult<NonNull<u8>> {
        self.with_inner(|allocator| allocator.allocate(size))
    }

    pub fn release(&self, ptr: NonNull<u8>) -> AllocResult {
        self.with_inner(|allocator| allocator.release(ptr))
    }

    pub fn reallocate(&self, ptr: NonNull<u8>, new_size: usize) -> AllocResult<NonNull<u8>> {
        self.with_inner(|allocator| allocator.reallocate(ptr, new_size))
    }

    pub fn usable_size(&self, ptr: NonNull<u8>) -> AllocResult<usize> {
        self.with_inner(|allocator| allocator.usable_size(ptr))
    }

    pub fn reset(&self) -> AllocResult {
        self.with_inner(|allocator| {
            allocator.reset();
            Ok(())
        })
    }

    pub fn dump(&self) -> AllocResult<Vec<PageRecord>> {
        self.with_inner(|allocator| Ok(allocator.dump()))
    }

    pub fn stats(&self) -> AllocResult<PoolStats> {
        self.with_inner(|allocator| Ok(allocator.stats()))
    }

    /// Drop the pool and give its buffer back. The wrapper may be initialized
    /// again afterwards.
    pub fn destroy(&self) {
        let allocator = {
            let mut inner = self.inner.lock();
            self.initialized.store(false, Ordering::SeqCst);
            inner.take()
        };
        drop(allocator);
    }
}

impl<B: BackingProvider> Default for LockedPageSlabAllocator<B> {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl<B: BackingProvider + Send> GlobalAlloc for LockedPageSlabAllocator<B> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let size = layout.size().max(layout.align());
        let result = self.with_inner(|allocator| {
            if layout.align() > allocator.page_size() {
                return Err(AllocError::InvalidParam);
            }
            allocator.try_allocate(size)
        });
        match result {
            Ok(ptr) => ptr.as_ptr(),
            Err(_e) => {
                warn!(
                    "locked allocator: alloc failed for layout {:?}, error: {:?}",
                    layout, _e
                );
                ptr::null_mut()
            }
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        if let Some(ptr) = NonNull::new(ptr) {
            if let Err(_e) = self.release(ptr) {
                warn!(
                    "locked allocator: dealloc of {:#x} failed: {}",
                    ptr.as_ptr() as usize,
                    _e
                );
            }
        }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let Some(old) = NonNull::new(ptr) else {
            let Ok(new_layout) = Layout::from_size_align(new_size, layout.align()) else {
                return ptr::null_mut();
            };
            return unsafe { GlobalAlloc::alloc(self, new_layout) };
        };

        // Never in place: a fresh allocation of the new size every time.
        let new_size = new_size.max(layout.align());
        match self.with_inner(|allocator| allocator.try_reallocate(old, new_size)) {
            Ok(new_ptr) => new_ptr.as_ptr(),
            Err(_e) => {
                warn!(
                    "locked allocator: realloc to {} bytes failed: {}",
                    new_size, _e
                );
                ptr::null_mut()
            }
        }
    }
}
