use serde::Serialize;

use crate::array::mask;

/// Histogram of line-usage observations, indexed by the number of bytes in a
/// contiguous accessed run (0..=64).
#[derive(Debug, Clone, Serialize)]
pub struct ByteHistogram {
    buckets: Vec<u64>,
}

impl Default for ByteHistogram {
    fn default() -> Self {
        Self {
            buckets: vec![0; 65],
        }
    }
}

impl ByteHistogram {
    pub fn inc(&mut self, bytes: usize) {
        self.buckets[bytes.min(64)] += 1;
    }

    pub fn count(&self, bytes: usize) -> u64 {
        self.buckets[bytes]
    }

    pub fn buckets(&self) -> &[u64] {
        &self.buckets
    }

    pub fn total(&self) -> u64 {
        self.buckets.iter().sum()
    }
}

/// Counters owned by one cache array. Aggregation across arrays is the
/// stats backend's concern, not the array's.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ArrayStats {
    /// Cache line hits that were previously prefetched.
    pub pref_hits: u64,
    /// Prefetched lines evicted before any demand use.
    pub pref_early_miss: u64,
    /// Prefetched lines still in flight when demanded.
    pub pref_late_miss: u64,
    /// Total cycles lost waiting on late prefetches.
    pub pref_total_late_cyc: u64,
    /// Total cycles saved by hitting a prefetched line (also if late).
    pub pref_saved_cyc: u64,
    /// Prefetch that hits the cache.
    pub pref_in_cache: u64,
    /// Prefetch that misses the cache.
    pub pref_not_in_cache: u64,
    /// Prefetch that leads to a replacement.
    pub pref_post_insert: u64,
    /// Prefetch replacing an already prefetched line.
    pub pref_replace_pref: u64,
    /// Prefetch hitting an already prefetched line.
    pub pref_hit_pref: u64,
    /// Total accesses that are prefetches.
    pub pref_accesses: u64,
    /// Useless prefetch state fixups caused by out-of-order requests.
    pub pref_inaccurate_ooo: u64,
    /// Delay cycles demand loads spent on in-flight hits.
    pub hit_delay_cycles: u64,
    /// Usage observations at eviction, by accessed-run length.
    pub cache_line_used_bytes: ByteHistogram,
    /// Block swaps performed during skew-array replacement.
    pub swaps: u64,
    /// Prefetches missing because the resident sub-line extent was too small.
    pub pref_out_of_bounds_miss: u64,
}

impl ArrayStats {
    /// One observation per contiguous accessed run of an evicted line.
    pub fn note_evicted_mask(&mut self, access_mask: u64) {
        if access_mask == 0 {
            return;
        }
        for len in mask::run_lengths(access_mask) {
            self.cache_line_used_bytes.inc(len as usize);
        }
    }

    /// Scalar counters paired with their published names, in dump order.
    pub fn named_counters(&self) -> Vec<(&'static str, u64)> {
        vec![
            ("prefHits", self.pref_hits),
            ("prefEarlyMiss", self.pref_early_miss),
            ("prefLateMiss", self.pref_late_miss),
            ("prefTotalLateCyc", self.pref_total_late_cyc),
            ("prefSavedCyc", self.pref_saved_cyc),
            ("prefInCache", self.pref_in_cache),
            ("prefNotInCache", self.pref_not_in_cache),
            ("prefPostInsert", self.pref_post_insert),
            ("prefReplacePref", self.pref_replace_pref),
            ("prefHitPref", self.pref_hit_pref),
            ("prefAccesses", self.pref_accesses),
            ("prefInaccurateOOO", self.pref_inaccurate_ooo),
            ("hitDelayCycles", self.hit_delay_cycles),
            ("swaps", self.swaps),
            ("prefOutOfBoundsMiss", self.pref_out_of_bounds_miss),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn histogram_counts_by_run_length() {
        let mut stats = ArrayStats::default();
        stats.note_evicted_mask(0b11_1111 << 4);
        assert_eq!(stats.cache_line_used_bytes.count(6), 1);
        assert_eq!(stats.cache_line_used_bytes.total(), 1);
    }

    #[test]
    fn zero_mask_records_nothing() {
        let mut stats = ArrayStats::default();
        stats.note_evicted_mask(0);
        assert_eq!(stats.cache_line_used_bytes.total(), 0);
    }

    #[test]
    fn multi_run_mask_records_each_run() {
        let mut stats = ArrayStats::default();
        stats.note_evicted_mask(0x00FF_0000_0000_00FF);
        assert_eq!(stats.cache_line_used_bytes.count(8), 2);
    }
}
