//! Intrusive free list threaded through the free blocks of a divided page.
//!
//! The first machine word of every free block holds the address of the next
//! free block; `LIST_END` terminates the chain. This is the only module that
//! reads or writes block memory for bookkeeping.

const LIST_END: usize = 0;

/// Head of a page's free-block chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FreeList {
    head: Option<usize>,
}

impl FreeList {
    pub const fn empty() -> Self {
        Self { head: None }
    }

    pub fn head(&self) -> Option<usize> {
        self.head
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Chain `count` blocks of `block_size` bytes in address order, starting at
    /// `page_addr`. The last block is linked to `LIST_END`.
    ///
    /// # Safety
    ///
    /// `[page_addr, page_addr + count * block_size)` must be writable memory
    /// with no live allocations, and `page_addr` and `block_size` must both be
    /// multiples of `align_of::<usize>()`.
    pub unsafe fn thread(page_addr: usize, block_size: usize, count: usize) -> Self {
        if count == 0 {
            return Self::empty();
        }
        for i in 0..count {
            let block = page_addr + i * block_size;
            let next = if i + 1 < count {
                block + block_size
            } else {
                LIST_END
            };
            unsafe { write_link(block, next) };
        }
        Self {
            head: Some(page_addr),
        }
    }

    /// Unlink and return the first free block.
    ///
    /// # Safety
    ///
    /// Every block on the list must still hold the link written when it was
    /// threaded or pushed.
    pub unsafe fn pop(&mut self) -> Option<usize> {
        let block = self.head?;
        let next = unsafe { read_link(block) };
        self.head = if next == LIST_END { None } else { Some(next) };
        Some(block)
    }

    /// Make `block` the new head.
    ///
    /// # Safety
    ///
    /// `block` must be a writable, word-aligned block that is not on any list
    /// and no longer in use by its previous owner.
    pub unsafe fn push(&mut self, block: usize) {
        let next = self.head.unwrap_or(LIST_END);
        unsafe { write_link(block, next) };
        self.head = Some(block);
    }
}

unsafe fn write_link(block: usize, next: usize) {
    unsafe { (block as *mut usize).write(next) };
}

unsafe fn read_link(block: usize) -> usize {
    unsafe { (block as *const usize).read() }
}
