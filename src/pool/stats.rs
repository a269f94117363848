//! Page records and pool statistics
//!
//! Provides the per-page snapshot returned by `dump` and aggregate counters.

use super::page_header::{PageHeader, PageHeaderTable, PageState};

/// Snapshot of one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRecord {
    pub page_index: usize,
    pub state: PageState,
    /// Block size, when divided.
    pub class_size: Option<usize>,
    /// Blocks still free, when divided.
    pub free_blocks: Option<usize>,
    /// Pages in the owning run, when part of a region.
    pub region_length: Option<usize>,
}

impl PageRecord {
    pub fn from_header(page_index: usize, header: &PageHeader) -> Self {
        let mut record = Self {
            page_index,
            state: header.state(),
            class_size: None,
            free_blocks: None,
            region_length: None,
        };
        match *header {
            PageHeader::Free => {}
            PageHeader::Divided {
                class_size,
                free_blocks,
                ..
            } => {
                record.class_size = Some(class_size);
                record.free_blocks = Some(free_blocks);
            }
            PageHeader::MultiPageRegion { region_length, .. } => {
                record.region_length = Some(region_length);
            }
        }
        record
    }
}

/// Pool statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub total_pages: usize,
    pub free_pages: usize,
    pub divided_pages: usize,
    pub region_pages: usize,
    /// Blocks currently handed out across all divided pages.
    pub live_blocks: usize,
    /// Bytes handed out (block and region granularity).
    pub used_bytes: usize,
    /// Longest run of consecutive free pages.
    pub largest_free_run: usize,
}

impl PoolStats {
    pub fn collect(table: &PageHeaderTable) -> Self {
        let page_size = table.page_size();
        let mut stats = Self {
            total_pages: table.len(),
            ..Self::default()
        };
        let mut run = 0;

        for (_, header) in table.iter() {
            match *header {
                PageHeader::Free => {
                    stats.free_pages += 1;
                    run += 1;
                    stats.largest_free_run = stats.largest_free_run.max(run);
                    continue;
                }
                PageHeader::Divided {
                    class_size,
                    free_blocks,
                    ..
                } => {
                    let live = page_size / class_size - free_blocks;
                    stats.divided_pages += 1;
                    stats.live_blocks += live;
                    stats.used_bytes += live * class_size;
                }
                PageHeader::MultiPageRegion { .. } => {
                    stats.region_pages += 1;
                    stats.used_bytes += page_size;
                }
            }
            run = 0;
        }

        stats
    }

    pub fn total_bytes(&self, page_size: usize) -> usize {
        self.total_pages * page_size
    }
}

/// Detailed memory statistics reporter
#[cfg(feature = "tracking")]
pub struct MemoryStatsReporter;

#[cfg(feature = "tracking")]
impl MemoryStatsReporter {
    /// Print detailed allocation failure statistics
    #[allow(unused_variables)]
    pub fn print_alloc_failure_stats(
        page_size: usize,
        stats: &PoolStats,
        table: &PageHeaderTable,
        request_bytes: usize,
    ) {
        #[cfg(feature = "log")]
        use log::error;
        error!("========================================");
        error!(
            "Request: {} bytes ({} pages)",
            request_bytes,
            request_bytes.div_ceil(page_size)
        );
        error!("Overall Pool State:");
        error!(
            "  Total pages: {} ({} KB)",
            stats.total_pages,
            (stats.total_pages * page_size) / 1024
        );
        error!("  Free pages: {}", stats.free_pages);
        error!("  Largest free run: {} pages", stats.largest_free_run);
        error!("  Divided pages: {}", stats.divided_pages);
        error!("  Region pages: {}", stats.region_pages);
        error!(
            "  Live blocks: {} ({} bytes in use)",
            stats.live_blocks, stats.used_bytes
        );
        error!("----------------------------------------");
        for (index, header) in table.iter() {
            if let PageHeader::Divided {
                class_size,
                free_blocks,
                ..
            } = *header
            {
                error!(
                    "  Page {}: class {} bytes, {} / {} blocks free",
                    index,
                    class_size,
                    free_blocks,
                    page_size / class_size
                );
            }
        }
        error!("========================================");
    }
}
