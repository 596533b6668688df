//! Aggregated counters exposed through `Engine::statistics()` (§6,
//! "Supplemental features").
//!
//! Grounded on the teacher's `BufferPool`/`LogManager` counters
//! (`records_count`, `total_records`) plus this crate's own
//! `CacheStats`/`FlushSchedulerStats`, gathered into one snapshot struct so
//! callers get a single read instead of reaching into each component.

use crate::flush_scheduler::FlushSchedulerStats;
use crate::storage::page_cache::CacheStats;

/// A point-in-time snapshot of engine-wide counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct Statistics {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_evictions: u64,
    pub total_pages: u32,
    pub used_pages: u32,
    pub wal_records_appended: u64,
    pub checkpoints_performed: u64,
    pub background_flush_ticks: u64,
    pub background_flush_swallowed_failures: u64,
}

impl Statistics {
    pub fn cache_hit_ratio(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }

    pub fn from_parts(
        cache: CacheStats,
        total_pages: u32,
        used_pages: u32,
        wal_records_appended: u64,
        checkpoints_performed: u64,
        flush_stats: &FlushSchedulerStats,
    ) -> Self {
        let (ticks, swallowed, _consecutive) = flush_stats.snapshot();
        Self {
            cache_hits: cache.hits,
            cache_misses: cache.misses,
            cache_evictions: cache.evictions,
            total_pages,
            used_pages,
            wal_records_appended,
            checkpoints_performed,
            background_flush_ticks: ticks,
            background_flush_swallowed_failures: swallowed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_ratio_is_zero_with_no_activity() {
        let stats = Statistics::default();
        assert_eq!(stats.cache_hit_ratio(), 0.0);
    }

    #[test]
    fn hit_ratio_reflects_hits_over_total() {
        let stats = Statistics { cache_hits: 3, cache_misses: 1, ..Default::default() };
        assert_eq!(stats.cache_hit_ratio(), 0.75);
    }
}
