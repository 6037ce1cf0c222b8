//------------ Types for Statistics -----------------------------------------

use std::sync::atomic::{AtomicUsize, Ordering};

/// Event counters kept by a table for the lifetime of the table. Cheap to
/// update (relaxed increments) and read; none of them participate in the
/// algorithms themselves.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    sentinels: AtomicUsize,
    rehashes: AtomicUsize,
    reclaim_cycles: AtomicUsize,
    reclaimed: AtomicUsize,
}

impl Counters {
    pub(crate) fn inc_sentinels(&self) {
        self.sentinels.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_rehashes(&self) {
        self.rehashes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_reclaim_cycles(&self) {
        self.reclaim_cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_reclaimed(&self, count: usize) {
        self.reclaimed.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn sentinels(&self) -> usize {
        self.sentinels.load(Ordering::Relaxed)
    }

    pub(crate) fn rehashes(&self) -> usize {
        self.rehashes.load(Ordering::Relaxed)
    }

    pub(crate) fn reclaim_cycles(&self) -> usize {
        self.reclaim_cycles.load(Ordering::Relaxed)
    }

    pub(crate) fn reclaimed(&self) -> usize {
        self.reclaimed.load(Ordering::Relaxed)
    }
}

//------------ FibStats ------------------------------------------------------

/// A point-in-time snapshot of a table's size and counters, as returned by
/// [Fib::stats](crate::Fib::stats).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FibStats {
    /// Live (inserted, not deleted) prefixes.
    pub entries: usize,
    /// Current number of buckets.
    pub hash_size: usize,
    /// Binary logarithm of `hash_size`.
    pub hash_order: u8,
    /// Entry count above which the bucket array doubles.
    pub entries_max: usize,
    /// Entry count below which a shrink would be worthwhile. Reported for
    /// observability; the table never shrinks.
    pub entries_min: usize,
    /// Bucket anchors created so far (buckets are populated lazily).
    pub sentinels: usize,
    /// Completed grow operations.
    pub rehashes: usize,
    /// Drain cycles the background reclaimer has run.
    pub reclaim_cycles: usize,
    /// Deleted nodes whose memory has actually been released.
    pub reclaimed: usize,
}

impl std::fmt::Display for FibStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} entries in {} buckets (order {}, grow at {}), \
            {} anchors, {} rehashes, {} reclaimed in {} cycles",
            self.entries,
            self.hash_size,
            self.hash_order,
            self.entries_max,
            self.sentinels,
            self.rehashes,
            self.reclaimed,
            self.reclaim_cycles
        )
    }
}
