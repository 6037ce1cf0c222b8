pub(crate) mod node;
pub(crate) mod reclaim;

pub mod iterators;

use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_epoch::{self as epoch, Atomic, Guard, Owned, Shared};
use crossbeam_utils::Backoff;
use log::{debug, error, log_enabled, trace};

use crate::stats::{Counters, FibStats};
use crate::types::errors::{FatalError, FatalResult, FibError};
use crate::types::{AddressFamily, Meta, PrefixId};

use node::{untag, FibNode, MARK_BIT};
use reclaim::{HandoverQueue, SoftLinks, CURR, MAX_ROWS, SUCC};

// Rehash thresholds, keeping the entry count between size / 5 and
// size * 2. Growing rehashes on demand, one power of two at a time.
const HASH_DEF_ORDER: u8 = 10;
const HASH_HI_MAX: u8 = 24;
const HASH_LO_MIN: u8 = 10;
const HASH_LO_STEP: u8 = 2;

//------------ FibConfig -----------------------------------------------------

/// Tuning knobs for a [Fib]. The defaults suit a routing table expected to
/// hold somewhere between a few hundred and a few million prefixes.
#[derive(Debug, Clone)]
pub struct FibConfig {
    /// Binary logarithm of the initial number of buckets. Zero selects the
    /// default order of 10 (1024 buckets); anything above 24 is clamped.
    pub hash_order: u8,
    /// How long the background reclaimer sleeps between drain cycles.
    pub reclaim_interval: Duration,
}

impl Default for FibConfig {
    fn default() -> Self {
        Self {
            hash_order: HASH_DEF_ORDER,
            reclaim_interval: reclaim::RECLAIM_INTERVAL,
        }
    }
}

//------------ BucketArray ---------------------------------------------------
//
// A power-of-two array of entry points into the list: slot b holds the
// address of bucket b's anchor, or zero while the bucket is untouched.
// The mask lives inside the allocation, so one pointer swap publishes the
// array together with the only mask that is valid for it; a reader can
// never pair a new mask with an old array.

struct BucketArray {
    order: u8,
    mask: u32,
    slots: Box<[AtomicUsize]>,
}

impl BucketArray {
    fn new(order: u8) -> Self {
        let size = 1_usize << order;
        let mut slots = Vec::with_capacity(size);
        slots.resize_with(size, || AtomicUsize::new(0));
        Self {
            order,
            mask: (size - 1) as u32,
            slots: slots.into_boxed_slice(),
        }
    }

    fn size(&self) -> usize {
        self.slots.len()
    }

    fn slot(&self, bucket: u32) -> &AtomicUsize {
        &self.slots[bucket as usize]
    }

    fn bucket_for(&self, hash: u32) -> u32 {
        hash & self.mask
    }
}

/// The parent of a bucket: the bucket index with its highest set bit
/// cleared. The parent's anchor always precedes ours in split order, which
/// is what lets a new bucket bootstrap by scanning from its parent.
fn parent_bucket(bucket: u32) -> u32 {
    if bucket == 0 {
        0
    } else {
        bucket & !(1 << (31 - bucket.leading_zeros()))
    }
}

//------------ Fib -----------------------------------------------------------

/// A concurrent store for network prefixes: a Forwarding Information Base.
///
/// The table supports insertion, deletion, exact lookup, longest-prefix
/// match and enumeration, all callable from any number of threads without
/// external locking. See the crate docs for how the pieces fit together.
pub struct Fib<AF: AddressFamily, M: Meta> {
    inner: Arc<FibInner<AF, M>>,
    reclaimer: Option<JoinHandle<()>>,
}

pub(crate) struct FibInner<AF: AddressFamily, M> {
    buckets: Atomic<BucketArray>,
    entries: AtomicUsize,
    entries_max: AtomicUsize,
    entries_min: AtomicUsize,
    resizing: AtomicBool,
    pub(crate) links: SoftLinks,
    handovers: HandoverQueue,
    stop: AtomicBool,
    counters: Counters,
    _nodes: PhantomData<FibNode<AF, M>>,
}

// Nodes are reached through usize addresses, which hides them from the
// auto traits; the hazard protocol is what actually makes this sound.
unsafe impl<AF: AddressFamily, M: Send + Sync> Send for FibInner<AF, M> {}
unsafe impl<AF: AddressFamily, M: Send + Sync> Sync for FibInner<AF, M> {}

impl<AF: AddressFamily, M: Meta> Fib<AF, M> {
    /// An upper bound on simultaneously active operations (including held
    /// [Entry] guards and live iterators); entrants beyond it spin until
    /// one finishes.
    pub const MAX_CONCURRENT_OPS: usize = MAX_ROWS;

    /// Create a table and start its background reclaimer thread.
    pub fn new(config: FibConfig) -> Self {
        let order = match config.hash_order {
            0 => HASH_DEF_ORDER,
            o => o.min(HASH_HI_MAX),
        };
        let array = BucketArray::new(order);
        let size = array.size();

        // Bucket zero's anchor is the head of the whole list and exists
        // from the start; every other bucket bootstraps from it.
        let head = Box::into_raw(FibNode::<AF, M>::new_sentinel(0)) as usize;
        array.slot(0).store(head, Ordering::Relaxed);

        let entries_max = if order > HASH_HI_MAX - 1 {
            usize::MAX
        } else {
            size * 2
        };
        let entries_min = if order < HASH_LO_MIN + HASH_LO_STEP {
            0
        } else {
            size / 5
        };
        debug!(
            "allocating fib hash of order {}: {} buckets, {} low, {} high",
            order, size, entries_min, entries_max
        );

        let inner = Arc::new(FibInner {
            buckets: Atomic::new(array),
            entries: AtomicUsize::new(0),
            entries_max: AtomicUsize::new(entries_max),
            entries_min: AtomicUsize::new(entries_min),
            resizing: AtomicBool::new(false),
            links: SoftLinks::new(),
            handovers: HandoverQueue::new(),
            stop: AtomicBool::new(false),
            counters: Counters::default(),
            _nodes: PhantomData,
        });
        inner.counters.inc_sentinels();

        let reclaimer = {
            let inner = Arc::clone(&inner);
            let interval = config.reclaim_interval;
            match std::thread::Builder::new()
                .name("fib-reclaimer".into())
                .spawn(move || inner.reclaim_loop(interval))
            {
                Ok(handle) => handle,
                Err(err) => {
                    // Without a reclaimer, deleted nodes would never be
                    // freed; treated like any other allocation failure.
                    error!("cannot spawn the reclaimer ({}): {}", err, FatalError);
                    std::process::abort();
                }
            }
        };

        Self {
            inner,
            reclaimer: Some(reclaimer),
        }
    }

    /// Search for an entry by exact prefix.
    pub fn find(&self, prefix: PrefixId<AF>) -> Option<Entry<'_, AF, M>> {
        let guard = epoch::pin();
        let row = self.inner.links.reserve();
        match self.inner.find_node(&guard, row, prefix) {
            Some(addr) => Some(Entry {
                fib: &*self.inner,
                row,
                node: addr,
            }),
            None => {
                self.inner.links.release(row);
                None
            }
        }
    }

    /// Find the entry for the prefix, or create it, with `init` supplying
    /// the metadata. Returns the entry and whether this call created it;
    /// `init` runs at most once, and only if no entry existed. A prefix
    /// length beyond the address family's bits is refused.
    pub fn get_or_insert_with<F>(
        &self,
        prefix: PrefixId<AF>,
        init: F,
    ) -> Result<(Entry<'_, AF, M>, bool), FibError>
    where
        F: FnOnce() -> M,
    {
        if prefix.get_len() > AF::BITS {
            return Err(FibError::PrefixLengthInvalid);
        }
        let guard = epoch::pin();
        let row = self.inner.links.reserve();
        let (addr, created) =
            self.inner.get_or_insert_node(&guard, row, prefix, init);
        Ok((
            Entry {
                fib: &*self.inner,
                row,
                node: addr,
            },
            created,
        ))
    }

    /// CIDR routing lookup: the entry a router would use to forward
    /// traffic for this network, i.e. the entry with the longest stored
    /// prefix covering it.
    pub fn route(&self, prefix: PrefixId<AF>) -> Option<Entry<'_, AF, M>> {
        let mut id = prefix;
        loop {
            if let Some(entry) = self.find(id) {
                return Some(entry);
            }
            if id.get_len() == 0 {
                return None;
            }
            id = id.shorten();
        }
    }

    /// Remove the entry from the table. `Ok(true)` iff this call performed
    /// the logical removal; `Ok(false)` means someone else already had.
    /// The memory is handed to the reclaimer and released once no reader
    /// can still observe the node. An `Err` means the removal could not
    /// find a predecessor for its marked node: the list is corrupt and the
    /// table should be dropped.
    pub fn remove(&self, entry: Entry<'_, AF, M>) -> FatalResult<bool> {
        assert!(
            std::ptr::eq(entry.fib, &*self.inner),
            "entry was obtained from a different table"
        );
        let guard = epoch::pin();
        let row = entry.row;
        let addr = entry.node;
        // The entry's row carries the removal from here on.
        std::mem::forget(entry);
        let removed = self.inner.remove_node(&guard, row, addr);
        self.inner.links.release(row);
        removed
    }

    /// Find-and-remove in one call. `Ok(true)` iff the prefix was present
    /// and this call removed it.
    pub fn remove_prefix(&self, prefix: PrefixId<AF>) -> FatalResult<bool> {
        match self.find(prefix) {
            Some(entry) => self.remove(entry),
            None => Ok(false),
        }
    }

    /// The number of live entries.
    pub fn len(&self) -> usize {
        self.inner.entries.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A snapshot of the table's sizes and event counters.
    pub fn stats(&self) -> FibStats {
        let guard = epoch::pin();
        let array = self.inner.bucket_array(&guard);
        FibStats {
            entries: self.len(),
            hash_size: array.size(),
            hash_order: array.order,
            entries_max: self.inner.entries_max.load(Ordering::Relaxed),
            entries_min: self.inner.entries_min.load(Ordering::Relaxed),
            sentinels: self.inner.counters.sentinels(),
            rehashes: self.inner.counters.rehashes(),
            reclaim_cycles: self.inner.counters.reclaim_cycles(),
            reclaimed: self.inner.counters.reclaimed(),
        }
    }

    /// Debugging aid: verify the split ordering over the whole list and
    /// recount the live entries. The count comparison is only meaningful
    /// on a quiescent table.
    pub fn consistency_check(&self) -> Result<(), FibError> {
        let guard = epoch::pin();
        let row = self.inner.links.reserve();
        let res = self.inner.check(&guard, row);
        self.inner.links.release(row);
        res
    }
}

impl<AF: AddressFamily, M: Meta> Default for Fib<AF, M> {
    fn default() -> Self {
        Self::new(FibConfig::default())
    }
}

impl<AF: AddressFamily, M: Meta> std::fmt::Debug for Fib<AF, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fib")
            .field("entries", &self.len())
            .finish_non_exhaustive()
    }
}

impl<AF: AddressFamily, M: Meta> Drop for Fib<AF, M> {
    fn drop(&mut self) {
        self.inner.stop.store(true, Ordering::Release);
        if let Some(handle) = self.reclaimer.take() {
            handle.thread().unpark();
            let _ = handle.join();
        }
        // The reclaimer is gone and `drop` has exclusive access; release
        // everything that is left.
        unsafe { self.inner.teardown() };
    }
}

//------------ FibInner ------------------------------------------------------

impl<AF: AddressFamily, M: Meta> FibInner<AF, M> {
    fn bucket_array<'g>(&self, guard: &'g Guard) -> &'g BucketArray {
        unsafe { self.buckets.load(Ordering::Acquire, guard).deref() }
    }

    pub(crate) unsafe fn node(&self, addr: usize) -> &FibNode<AF, M> {
        node::node_ref(addr)
    }

    /// Publish `from`'s successor in the row's SUCC slot and re-read the
    /// word until it is stable. Once this returns, the successor cannot be
    /// freed for as long as the slot holds it: either `from` still links
    /// to it (it is reachable), or `from` is itself unlinked, in which
    /// case its frozen forward reference keeps the successor's link count
    /// up until `from` is freed, and `from` outlives this row's CURR
    /// hazard. Returns the raw word; its low bit is `from`'s delete mark.
    pub(crate) fn protect_successor(
        &self,
        row: usize,
        from: &FibNode<AF, M>,
    ) -> usize {
        let mut raw = from.next_raw();
        loop {
            self.links.protect(row, SUCC, untag(raw));
            let verify = from.next_raw_seqcst();
            if verify == raw {
                return raw;
            }
            raw = verify;
        }
    }

    /// Step the row's CURR hazard onto the node currently held in SUCC.
    pub(crate) fn commit_step(&self, row: usize) {
        let succ = self.links.slot(row, SUCC);
        self.links.protect(row, CURR, succ);
    }

    //--- lookup

    fn find_node(
        &self,
        guard: &Guard,
        row: usize,
        id: PrefixId<AF>,
    ) -> Option<usize> {
        let hash = id.hash();
        let key = id.order_key();
        let backoff = Backoff::new();

        'restart: loop {
            let array = self.bucket_array(guard);
            let bucket = array.bucket_for(hash);
            let mut curr_addr = array.slot(bucket).load(Ordering::Acquire);
            if curr_addr == 0 {
                // First touch of this bucket.
                self.insert_sentinel(guard, row, bucket);
                backoff.spin();
                continue 'restart;
            }
            self.links.protect(row, CURR, curr_addr);

            loop {
                let curr = unsafe { self.node(curr_addr) };
                if curr.key > key {
                    return None;
                }
                if curr.key == key
                    && !curr.is_sentinel()
                    && curr.prefix == id
                {
                    if curr.is_marked() {
                        // Logically gone, but the unlink has not caught
                        // up; start over so we cannot return a dead node.
                        backoff.snooze();
                        continue 'restart;
                    }
                    return Some(curr_addr);
                }
                let raw = self.protect_successor(row, curr);
                let succ_addr = untag(raw);
                if succ_addr == 0 {
                    return None;
                }
                self.commit_step(row);
                curr_addr = succ_addr;
            }
        }
    }

    //--- insertion

    fn get_or_insert_node<F>(
        &self,
        guard: &Guard,
        row: usize,
        id: PrefixId<AF>,
        init: F,
    ) -> (usize, bool)
    where
        F: FnOnce() -> M,
    {
        let hash = id.hash();
        let key = id.order_key();
        // Exactly one of the two is on hand at any time: the initialiser
        // until the first allocation, the allocated node afterwards.
        let mut seed: Result<Box<FibNode<AF, M>>, F> = Err(init);
        let backoff = Backoff::new();

        'restart: loop {
            if self.entries.load(Ordering::Relaxed)
                >= self.entries_max.load(Ordering::Relaxed)
            {
                self.rehash(guard);
            }

            let array = self.bucket_array(guard);
            let bucket = array.bucket_for(hash);
            let mut curr_addr = array.slot(bucket).load(Ordering::Acquire);
            if curr_addr == 0 {
                self.insert_sentinel(guard, row, bucket);
                backoff.spin();
                continue 'restart;
            }
            self.links.protect(row, CURR, curr_addr);

            // Walk to the edge of the equal-key region.
            let mut curr = unsafe { self.node(curr_addr) };
            let mut raw = self.protect_successor(row, curr);
            let mut succ_addr = untag(raw);
            while succ_addr != 0
                && unsafe { self.node(succ_addr) }.key < key
            {
                self.commit_step(row);
                curr_addr = succ_addr;
                curr = unsafe { self.node(curr_addr) };
                raw = self.protect_successor(row, curr);
                succ_addr = untag(raw);
            }

            // A concurrent deletion can drop the scan past its own
            // position; if we stand on our own prefix, start over.
            if curr.key == key && !curr.is_sentinel() && curr.prefix == id {
                backoff.spin();
                continue 'restart;
            }

            // Scan the run of equal keys for a duplicate. Payloads go at
            // the end of their run, behind the bucket anchor and any
            // colliding prefixes.
            while succ_addr != 0 {
                let succ = unsafe { self.node(succ_addr) };
                if succ.key > key {
                    break;
                }
                if succ.key == key
                    && !succ.is_sentinel()
                    && succ.prefix == id
                {
                    if succ.is_marked() {
                        // A dead twin still linked; wait out its unlink.
                        backoff.snooze();
                        continue 'restart;
                    }
                    self.commit_step(row);
                    if let Ok(node) = seed {
                        node.discard();
                    }
                    return (succ_addr, false);
                }
                self.commit_step(row);
                curr_addr = succ_addr;
                curr = unsafe { self.node(curr_addr) };
                if curr.key == key
                    && !curr.is_sentinel()
                    && curr.prefix == id
                {
                    backoff.spin();
                    continue 'restart;
                }
                raw = self.protect_successor(row, curr);
                succ_addr = untag(raw);
            }

            // curr -> succ brackets the position: curr.key <= key and
            // succ is past the run (or the list ends).
            let node_box = match seed {
                Ok(node) => node,
                Err(init) => FibNode::new_payload(key, id, init()),
            };
            node_box.prime_next(succ_addr);
            let node_addr = Box::into_raw(node_box) as usize;

            // Both hazards stay up through the CAS: CURR because the CAS
            // dereferences curr, SUCC so the expected address cannot be
            // recycled under us. The new node needs neither; it is born
            // with an extra in-hand link reference.
            if curr.cas_next(succ_addr, node_addr) {
                self.entries.fetch_add(1, Ordering::Relaxed);
                self.links.protect(row, CURR, node_addr);
                self.links.protect(row, SUCC, 0);
                // Hand the in-hand reference back now that the soft link
                // covers the node.
                unsafe { self.node(node_addr) }.remove_link();
                if log_enabled!(log::Level::Trace) {
                    trace!("inserted {} (key {:032b})", id, key);
                }
                return (node_addr, true);
            }

            // Lost the race for this position; take the node back and
            // rescan.
            seed =
                Ok(unsafe { Box::from_raw(node_addr as *mut FibNode<AF, M>) });
            backoff.spin();
        }
    }

    /// Anchor the sentinel for `bucket`, creating its parent chain as
    /// needed. On return the slot of the current bucket array holds a
    /// sentinel address (a concurrent resize may still replace the array;
    /// callers absorb that in their retry loops).
    fn insert_sentinel(&self, guard: &Guard, row: usize, bucket: u32) {
        let key = bucket.reverse_bits();
        let mut fresh: Option<Box<FibNode<AF, M>>> = None;
        let backoff = Backoff::new();

        'restart: loop {
            let array = self.bucket_array(guard);
            let slot = array.slot(bucket);
            if slot.load(Ordering::Acquire) != 0 {
                return;
            }

            let parent = parent_bucket(bucket);
            let mut curr_addr = array.slot(parent).load(Ordering::Acquire);
            if curr_addr == 0 {
                // Recursion bottoms out at bucket zero, which is seeded
                // at table creation.
                self.insert_sentinel(guard, row, parent);
                backoff.spin();
                continue 'restart;
            }
            self.links.protect(row, CURR, curr_addr);

            let mut curr = unsafe { self.node(curr_addr) };
            let mut raw = self.protect_successor(row, curr);
            let mut succ_addr = untag(raw);
            while succ_addr != 0
                && unsafe { self.node(succ_addr) }.key < key
            {
                self.commit_step(row);
                curr_addr = succ_addr;
                curr = unsafe { self.node(curr_addr) };
                raw = self.protect_successor(row, curr);
                succ_addr = untag(raw);
            }

            if succ_addr != 0 {
                let succ = unsafe { self.node(succ_addr) };
                if succ.key == key && succ.is_sentinel() {
                    // Someone else anchored it. Re-store the slot: this
                    // also repairs a bucket write lost to a concurrent
                    // array swap.
                    slot.store(succ_addr, Ordering::Release);
                    return;
                }
            }

            let node_box =
                fresh.take().unwrap_or_else(|| FibNode::new_sentinel(key));
            node_box.prime_next(succ_addr);
            let node_addr = Box::into_raw(node_box) as usize;

            if curr.cas_next(succ_addr, node_addr) {
                slot.store(node_addr, Ordering::Release);
                self.counters.inc_sentinels();
                trace!("anchored bucket {} (key {:032b})", bucket, key);
                return;
            }

            fresh =
                Some(unsafe { Box::from_raw(node_addr as *mut FibNode<AF, M>) });
            backoff.spin();
        }
    }

    //--- removal

    fn remove_node(
        &self,
        guard: &Guard,
        row: usize,
        node_addr: usize,
    ) -> FatalResult<bool> {
        let node = unsafe { self.node(node_addr) };
        debug_assert!(!node.is_sentinel());

        // The linearisation point: whoever sets the mark owns the
        // removal.
        if !node.mark() {
            return Ok(false);
        }

        // The mark freezes the node's next word. Nothing can be linked
        // after the node any more, and its successor cannot be unlinked
        // (that CAS would have to go through the marked word), so the
        // successor outlives this whole call. Account here for the frozen
        // forward reference the node keeps holding until it is freed.
        let succ_of_node = untag(node.next_raw());
        if succ_of_node != 0 {
            unsafe { self.node(succ_of_node) }.add_link();
        }

        let key = node.key;
        let hash = key.reverse_bits();
        let backoff = Backoff::new();

        'restart: loop {
            let array = self.bucket_array(guard);
            let bucket = array.bucket_for(hash);
            let mut curr_addr = array.slot(bucket).load(Ordering::Acquire);
            if curr_addr == 0 {
                self.insert_sentinel(guard, row, bucket);
                backoff.spin();
                continue 'restart;
            }
            self.links.protect(row, CURR, curr_addr);

            loop {
                let curr = unsafe { self.node(curr_addr) };
                let raw = self.protect_successor(row, curr);
                let succ_addr = untag(raw);

                if succ_addr == node_addr {
                    // Unlink. The expected word must be unmarked, so a
                    // predecessor that is itself deleted fails here and we
                    // rescan once its own removal has unlinked it.
                    if curr.cas_next(node_addr, succ_of_node) {
                        node.remove_link();
                        self.entries.fetch_sub(1, Ordering::Relaxed);
                        self.handovers.push(node_addr);
                        if log_enabled!(log::Level::Trace) {
                            trace!("unlinked {}", node.prefix);
                        }
                        return Ok(true);
                    }
                    backoff.spin();
                    continue 'restart;
                }

                if succ_addr == 0
                    || unsafe { self.node(succ_addr) }.key > key
                {
                    // The marked node is reachable from its bucket until
                    // we unlink it; running past its key means the list
                    // is broken.
                    error!("marked node has no predecessor: {}", FatalError);
                    return Err(FatalError);
                }
                self.commit_step(row);
                curr_addr = succ_addr;
            }
        }
    }

    //--- resizing

    /// Double the bucket array. One grower at a time; contenders return
    /// immediately and go on against the old array, which stays fully
    /// valid under the split ordering.
    fn rehash(&self, guard: &Guard) {
        if self.resizing.swap(true, Ordering::AcqRel) {
            return;
        }

        let current_shared = self.buckets.load(Ordering::Acquire, guard);
        let current = unsafe { current_shared.deref() };
        if current.order >= HASH_HI_MAX {
            self.resizing.store(false, Ordering::Release);
            return;
        }

        let next = BucketArray::new(current.order + 1);
        for i in 0..current.size() {
            next.slots[i].store(
                current.slots[i].load(Ordering::Acquire),
                Ordering::Relaxed,
            );
        }

        let old = self.buckets.swap(Owned::new(next), Ordering::AcqRel, guard);

        // Catch anchors that were written into the old array while we
        // copied. Anything that still slips through is repaired by the
        // next sentinel insertion for that bucket.
        let new = self.bucket_array(guard);
        let old_ref = unsafe { old.deref() };
        for i in 0..old_ref.size() {
            let v = old_ref.slots[i].load(Ordering::Acquire);
            if v != 0 && new.slots[i].load(Ordering::Acquire) == 0 {
                new.slots[i].store(v, Ordering::Release);
            }
        }

        let entries_max = if new.order >= HASH_HI_MAX {
            usize::MAX
        } else {
            new.size() * 2
        };
        self.entries_max.store(entries_max, Ordering::Release);
        if new.order >= HASH_LO_MIN + HASH_LO_STEP {
            self.entries_min.store(new.size() / 5, Ordering::Release);
        }
        self.counters.inc_rehashes();
        debug!(
            "grew fib hash to order {} ({} buckets)",
            new.order,
            new.size()
        );

        self.resizing.store(false, Ordering::Release);

        // Readers may still hold the old array; retire it instead of
        // freeing it in place.
        unsafe { guard.defer_destroy(old) };
    }

    //--- reclaimer & teardown

    fn reclaim_loop(&self, interval: Duration) {
        loop {
            std::thread::park_timeout(interval);
            if self.stop.load(Ordering::Acquire) {
                return;
            }
            let freed = self.handovers.drain::<AF, M>(&self.links);
            self.counters.inc_reclaim_cycles();
            self.counters.add_reclaimed(freed);
        }
    }

    /// Free the deferred queue, the whole list and the bucket array.
    /// Callable exactly once, with no other thread able to touch the
    /// table.
    unsafe fn teardown(&self) {
        let freed = self.handovers.drain_all::<AF, M>();
        self.counters.add_reclaimed(freed);

        let guard = epoch::unprotected();
        let array = self.buckets.swap(Shared::null(), Ordering::Relaxed, guard);
        if let Some(array) = array.as_ref() {
            let mut cursor = array.slot(0).load(Ordering::Relaxed);
            while cursor != 0 {
                let next = untag(self.node(cursor).next_raw());
                node::free_node::<AF, M>(cursor);
                cursor = next;
            }
        }
        if !array.is_null() {
            drop(array.into_owned());
        }
    }

    //--- consistency checking

    fn check(&self, guard: &Guard, row: usize) -> Result<(), FibError> {
        let array = self.bucket_array(guard);
        let mut curr_addr = array.slot(0).load(Ordering::Acquire);
        self.links.protect(row, CURR, curr_addr);

        let mut live = 0_usize;
        while curr_addr != 0 {
            let curr = unsafe { self.node(curr_addr) };
            let raw = self.protect_successor(row, curr);
            let succ_addr = untag(raw);

            if !curr.is_sentinel() && raw & MARK_BIT == 0 {
                live += 1;
            }
            if succ_addr != 0 {
                let succ = unsafe { self.node(succ_addr) };
                if curr.key > succ.key {
                    return Err(FibError::OrderViolation);
                }
                if curr.key == succ.key
                    && !curr.is_sentinel()
                    && succ.is_sentinel()
                {
                    return Err(FibError::OrderViolation);
                }
            }
            self.commit_step(row);
            curr_addr = succ_addr;
        }

        if live != self.entries.load(Ordering::Relaxed) {
            return Err(FibError::EntryCountMismatch);
        }
        Ok(())
    }
}

//------------ Entry ---------------------------------------------------------

/// A live reference to one stored prefix.
///
/// The entry keeps a reservation row for as long as it exists and its node
/// registered as a hazard: the prefix may be deleted concurrently, but the
/// node cannot be freed, so the metadata stays readable. Holding entries
/// for long stretches eats into the table's concurrency budget
/// ([Fib::MAX_CONCURRENT_OPS]); copy out what you need and drop them.
pub struct Entry<'a, AF: AddressFamily, M: Meta> {
    fib: &'a FibInner<AF, M>,
    row: usize,
    node: usize,
}

unsafe impl<AF: AddressFamily, M: Meta> Send for Entry<'_, AF, M> {}
unsafe impl<AF: AddressFamily, M: Meta> Sync for Entry<'_, AF, M> {}

impl<AF: AddressFamily, M: Meta> Entry<'_, AF, M> {
    pub fn prefix(&self) -> PrefixId<AF> {
        unsafe { self.fib.node(self.node) }.prefix
    }

    pub fn meta(&self) -> &M {
        let node = unsafe { self.fib.node(self.node) };
        unsafe { node.meta() }
    }

    /// True if the prefix has been logically deleted since this entry was
    /// obtained. The metadata stays readable either way.
    pub fn is_deleted(&self) -> bool {
        unsafe { self.fib.node(self.node) }.is_marked()
    }
}

impl<AF: AddressFamily, M: Meta> Deref for Entry<'_, AF, M> {
    type Target = M;

    fn deref(&self) -> &M {
        self.meta()
    }
}

impl<AF: AddressFamily, M: Meta> std::fmt::Debug for Entry<'_, AF, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entry")
            .field("prefix", &self.prefix())
            .field("meta", self.meta())
            .finish()
    }
}

impl<AF: AddressFamily, M: Meta> Drop for Entry<'_, AF, M> {
    fn drop(&mut self) {
        self.fib.links.release(self.row);
    }
}
