//! Size class table.
//!
//! Classes are every power of two from the minimum allocation size up to half
//! a page, built once per pool.

use alloc::vec::Vec;

/// Recognized block sizes for one pool geometry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeClassTable {
    classes: Vec<usize>,
    min_shift: u32,
    limit: usize,
}

impl SizeClassTable {
    /// `min_alloc_size` and `page_size` must be powers of two with
    /// `min_alloc_size <= page_size / 2`.
    pub fn new(min_alloc_size: usize, page_size: usize) -> Self {
        let limit = page_size / 2;
        let mut classes = Vec::new();
        let mut size = min_alloc_size;
        while size <= limit {
            classes.push(size);
            size <<= 1;
        }
        Self {
            classes,
            min_shift: min_alloc_size.trailing_zeros(),
            limit,
        }
    }

    pub fn classes(&self) -> &[usize] {
        &self.classes
    }

    /// `max(min_alloc_size, next_power_of_two(size))`, or `None` when `size`
    /// is zero or not below the slab limit.
    pub fn class_size_for(&self, size: usize) -> Option<usize> {
        let index = self.index_for(size)?;
        Some(self.classes[index])
    }

    /// Table index of the class serving `size`.
    pub fn index_for(&self, size: usize) -> Option<usize> {
        if size == 0 || size >= self.limit {
            return None;
        }
        let shift = size.next_power_of_two().trailing_zeros();
        Some(shift.saturating_sub(self.min_shift) as usize)
    }

    /// Table index of an exact class size.
    pub fn index_of(&self, class_size: usize) -> Option<usize> {
        if !class_size.is_power_of_two() {
            return None;
        }
        let index = class_size.trailing_zeros().checked_sub(self.min_shift)? as usize;
        (index < self.classes.len()).then_some(index)
    }
}
