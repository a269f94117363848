//! Slab allocator implementation.
//!
//! This module divides free pages into power-of-two blocks and manages the
//! intrusive free lists of those blocks, one cache per size class.

pub mod free_list;
pub mod live_map;
pub mod size_class;
pub mod slab_allocator;
pub mod slab_cache;

// Re-export public types
pub use free_list::FreeList;
pub use size_class::SizeClassTable;
pub use slab_allocator::SlabAllocator;
pub use slab_cache::SlabCache;
