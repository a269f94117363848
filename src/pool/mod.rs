//! Page pool module
//!
//! This module provides the page-level bookkeeping shared by the slab and
//! region managers:
//! - Dense per-page header table
//! - LIFO free page pool
//! - Page records and statistics

pub mod page_header;
pub mod page_pool;
pub mod stats;

pub use page_header::{PageHeader, PageHeaderTable, PageState};
pub use page_pool::PagePool;
#[cfg(feature = "tracking")]
pub use stats::MemoryStatsReporter;
pub use stats::{PageRecord, PoolStats};
