//! Construction-time options for a page pool.

use core::mem;

use crate::{AllocError, AllocResult, DEFAULT_MIN_ALLOC_SIZE, DEFAULT_PAGE_SIZE};

#[cfg(feature = "log")]
use log::warn;

/// What to do when an allocation cannot be satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExhaustionPolicy {
    /// Return [`AllocError::NoMemory`] to the caller.
    #[default]
    ReturnError,
    /// Panic on exhaustion.
    Abort,
}

/// Pool geometry and policy, fixed for the lifetime of an allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    page_size: usize,
    min_alloc_size: usize,
    exhaustion: ExhaustionPolicy,
}

impl PoolConfig {
    /// 4 KiB pages, 16-byte minimum class, errors on exhaustion.
    pub const fn new() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            min_alloc_size: DEFAULT_MIN_ALLOC_SIZE,
            exhaustion: ExhaustionPolicy::ReturnError,
        }
    }

    /// Set the page size. Must be a power of two.
    pub const fn with_page_size(self, page_size: usize) -> Self {
        Self { page_size, ..self }
    }

    /// Set the smallest size class. Must be a power of two of at least one
    /// machine word.
    pub const fn with_min_alloc_size(self, min_alloc_size: usize) -> Self {
        Self {
            min_alloc_size,
            ..self
        }
    }

    /// Choose how exhaustion is reported by `allocate` and `reallocate`.
    pub const fn with_exhaustion_policy(self, exhaustion: ExhaustionPolicy) -> Self {
        Self { exhaustion, ..self }
    }

    /// Page size in bytes.
    pub const fn page_size(&self) -> usize {
        self.page_size
    }

    /// Smallest size class in bytes.
    pub const fn min_alloc_size(&self) -> usize {
        self.min_alloc_size
    }

    /// Configured exhaustion policy.
    pub const fn exhaustion_policy(&self) -> ExhaustionPolicy {
        self.exhaustion
    }

    /// Requests strictly below this size are served by slabs.
    pub const fn slab_limit(&self) -> usize {
        self.page_size / 2
    }

    /// Largest number of blocks a single divided page can hold.
    pub const fn max_blocks_per_page(&self) -> usize {
        self.page_size / self.min_alloc_size
    }

    /// Number of pages needed to cover `bytes`.
    pub const fn pages_for(&self, bytes: usize) -> usize {
        bytes.div_ceil(self.page_size)
    }

    /// Check the geometry.
    ///
    /// Both sizes must be powers of two, the minimum class must hold a free-list
    /// link, and at least one class must fit below half a page.
    pub fn validate(&self) -> AllocResult {
        if !self.page_size.is_power_of_two() || !self.min_alloc_size.is_power_of_two() {
            warn!(
                "pool config: sizes must be powers of two (page={}, min={})",
                self.page_size, self.min_alloc_size
            );
            return Err(AllocError::InvalidParam);
        }
        if self.min_alloc_size < mem::size_of::<usize>() {
            warn!(
                "pool config: minimum allocation {} cannot hold a free-list link",
                self.min_alloc_size
            );
            return Err(AllocError::InvalidParam);
        }
        if self.min_alloc_size > self.slab_limit() {
            warn!(
                "pool config: minimum allocation {} exceeds half page {}",
                self.min_alloc_size,
                self.slab_limit()
            );
            return Err(AllocError::InvalidParam);
        }
        Ok(())
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new()
    }
}
