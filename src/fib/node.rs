use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::types::{AddressFamily, PrefixId};

// Tag bits. The low bit of `next` marks a logically deleted node; setting
// it is the linearisation point of a removal, and a set mark makes every
// CAS against the word fail, so nothing can be linked after a deleted node
// and its successor can no longer be swapped out. The low bit of `state`
// distinguishes bucket anchors (sentinels) from payloads; the remaining
// bits count, in steps of two, the references the reclaimer has to wait
// out before the node may be freed.
pub(crate) const MARK_BIT: usize = 0b1;
const SENTINEL_BIT: usize = 0b1;
const LINK_UNIT: usize = 0b10;

/// Strip the delete mark off a raw `next` word, leaving the address.
#[inline]
pub(crate) fn untag(raw: usize) -> usize {
    raw & !MARK_BIT
}

/// View a node address as a reference. The caller is responsible for the
/// address being a live node, protected by a soft link, a frozen forward
/// reference, or exclusive access to the table.
#[inline]
pub(crate) unsafe fn node_ref<'a, AF: AddressFamily, M>(
    addr: usize,
) -> &'a FibNode<AF, M> {
    &*(addr as *const FibNode<AF, M>)
}

//------------ FibNode -------------------------------------------------------
//
// One element of the split-ordered list: either a payload carrying a
// prefix and its metadata, or a permanent bucket anchor. Nodes are wired
// together through tagged words rather than references so that the delete
// mark and the successor swing stay single-word atomic operations.

#[repr(C)]
pub(crate) struct FibNode<AF: AddressFamily, M> {
    next: AtomicUsize,
    state: AtomicUsize,
    /// The split-order key: the bit-reversed prefix hash for payloads, the
    /// bit-reversed bucket index for sentinels. Cached here so scans never
    /// recompute a hash.
    pub(crate) key: u32,
    pub(crate) prefix: PrefixId<AF>,
    /// Initialised before the node is published; stays untouched until the
    /// node is freed. Never initialised for sentinels.
    meta: MaybeUninit<M>,
}

impl<AF: AddressFamily, M> FibNode<AF, M> {
    pub(crate) fn new_payload(
        key: u32,
        prefix: PrefixId<AF>,
        meta: M,
    ) -> Box<Self> {
        Box::new(FibNode {
            next: AtomicUsize::new(0),
            // Two counted references: the predecessor that will publish
            // us, and the inserting thread's own hand. The inserter drops
            // its reference once the published node sits in a soft link,
            // closing the window in which an immediate deletion could
            // otherwise free the node under it.
            state: AtomicUsize::new(2 * LINK_UNIT),
            key,
            prefix,
            meta: MaybeUninit::new(meta),
        })
    }

    pub(crate) fn new_sentinel(key: u32) -> Box<Self> {
        Box::new(FibNode {
            next: AtomicUsize::new(0),
            state: AtomicUsize::new(SENTINEL_BIT | LINK_UNIT),
            key,
            prefix: PrefixId::zero(),
            meta: MaybeUninit::uninit(),
        })
    }

    /// Tear down an unpublished payload node, running the metadata
    /// destructor the eventual free would otherwise have run.
    pub(crate) fn discard(mut self: Box<Self>) {
        debug_assert!(!self.is_sentinel());
        unsafe { self.meta.as_mut_ptr().drop_in_place() };
    }

    //--- the next word

    pub(crate) fn next_raw(&self) -> usize {
        self.next.load(Ordering::Acquire)
    }

    pub(crate) fn next_raw_seqcst(&self) -> usize {
        self.next.load(Ordering::SeqCst)
    }

    /// Pre-publication only: the node is not reachable by anyone else yet.
    pub(crate) fn prime_next(&self, succ: usize) {
        self.next.store(succ, Ordering::Relaxed);
    }

    /// Set the delete mark. True iff this call made the transition; there
    /// is no way back.
    pub(crate) fn mark(&self) -> bool {
        self.next.fetch_or(MARK_BIT, Ordering::AcqRel) & MARK_BIT == 0
    }

    pub(crate) fn is_marked(&self) -> bool {
        self.next_raw() & MARK_BIT != 0
    }

    /// Swing `next` from one successor to another. Fails if the word
    /// changed underneath us, including by a mark.
    pub(crate) fn cas_next(&self, expected: usize, new: usize) -> bool {
        self.next
            .compare_exchange(
                expected,
                new,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    //--- the state word

    pub(crate) fn is_sentinel(&self) -> bool {
        self.state.load(Ordering::Relaxed) & SENTINEL_BIT != 0
    }

    pub(crate) fn link_count(&self) -> usize {
        self.state.load(Ordering::Acquire) >> 1
    }

    pub(crate) fn add_link(&self) {
        self.state.fetch_add(LINK_UNIT, Ordering::AcqRel);
    }

    pub(crate) fn remove_link(&self) {
        self.state.fetch_sub(LINK_UNIT, Ordering::AcqRel);
    }

    //--- the payload

    /// Only valid on payload nodes; the metadata was written before the
    /// node was published.
    pub(crate) unsafe fn meta(&self) -> &M {
        debug_assert!(!self.is_sentinel());
        self.meta.assume_init_ref()
    }
}

/// Free a node nothing can reach any more: no soft link holds it, its link
/// count is zero, or the whole table is being torn down single-threaded.
pub(crate) unsafe fn free_node<AF: AddressFamily, M>(addr: usize) {
    let ptr = addr as *mut FibNode<AF, M>;
    if !(*ptr).is_sentinel() {
        (*ptr).meta.as_mut_ptr().drop_in_place();
    }
    drop(Box::from_raw(ptr));
}
