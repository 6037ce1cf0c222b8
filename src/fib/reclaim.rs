use std::sync::atomic::{fence, AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use crossbeam_utils::CachePadded;
use log::trace;
use parking_lot_core::SpinWait;

use crate::fib::node::{self, untag};
use crate::types::AddressFamily;

/// Every operation on the table reserves one row for its lifetime, so this
/// caps the number of simultaneously active readers, writers and walkers.
/// Entrants beyond the cap spin until a row frees up.
pub(crate) const MAX_ROWS: usize = 32;

/// Soft-link slots per row: one for the node an operation stands on, one
/// for the successor it is about to step to.
pub(crate) const SLOTS_PER_ROW: usize = 2;

/// How long the reclaimer sleeps between drain cycles by default.
pub(crate) const RECLAIM_INTERVAL: Duration = Duration::from_secs(30);

/// Slot indices within a row.
pub(crate) const CURR: usize = 0;
pub(crate) const SUCC: usize = 1;

//------------ SoftLinks -----------------------------------------------------
//
// The reservation table. A claimed row publishes, through its two slots,
// the node addresses its owner may dereference; the reclaimer refuses to
// free any node whose address shows up in a slot. Rows are padded so two
// operations never bounce the same cache line.

struct Row {
    claimed: AtomicBool,
    slots: [AtomicUsize; SLOTS_PER_ROW],
}

pub(crate) struct SoftLinks {
    rows: [CachePadded<Row>; MAX_ROWS],
}

impl SoftLinks {
    pub(crate) fn new() -> Self {
        Self {
            rows: std::array::from_fn(|_| {
                CachePadded::new(Row {
                    claimed: AtomicBool::new(false),
                    slots: [AtomicUsize::new(0), AtomicUsize::new(0)],
                })
            }),
        }
    }

    /// Claim a free row, spinning until one is available.
    pub(crate) fn reserve(&self) -> usize {
        let mut spinwait = SpinWait::new();
        loop {
            for (i, row) in self.rows.iter().enumerate() {
                if !row.claimed.load(Ordering::Relaxed)
                    && !row.claimed.swap(true, Ordering::Acquire)
                {
                    return i;
                }
            }
            spinwait.spin();
        }
    }

    pub(crate) fn release(&self, row: usize) {
        let row = &self.rows[row];
        for slot in &row.slots {
            slot.store(0, Ordering::Release);
        }
        row.claimed.store(false, Ordering::Release);
    }

    /// Publish a hazard. SeqCst so the store is globally ordered against
    /// the validation load that follows it and against the reclaimer's
    /// scan.
    pub(crate) fn protect(&self, row: usize, slot: usize, addr: usize) {
        self.rows[row].slots[slot].store(addr, Ordering::SeqCst);
    }

    pub(crate) fn slot(&self, row: usize, slot: usize) -> usize {
        self.rows[row].slots[slot].load(Ordering::SeqCst)
    }

    /// True if any slot of any row currently holds the address.
    fn is_hazard(&self, addr: usize) -> bool {
        self.rows.iter().any(|row| {
            row.slots
                .iter()
                .any(|slot| slot.load(Ordering::SeqCst) == addr)
        })
    }
}

//------------ HandoverQueue -------------------------------------------------
//
// Unlinked nodes wait here until no soft link can still observe them.
// Deleters push at the head; the reclaimer is the sole consumer, so
// removing the first entry is a CAS against the head while removing an
// interior entry is a plain store into the predecessor.

struct Handover {
    node: usize,
    next: AtomicUsize,
}

pub(crate) struct HandoverQueue {
    head: AtomicUsize,
}

impl HandoverQueue {
    pub(crate) fn new() -> Self {
        Self {
            head: AtomicUsize::new(0),
        }
    }

    pub(crate) fn push(&self, node_addr: usize) {
        let handover = Box::into_raw(Box::new(Handover {
            node: node_addr,
            next: AtomicUsize::new(0),
        })) as usize;

        let mut head = self.head.load(Ordering::Acquire);
        loop {
            // Not shared yet, a plain store publishes the link.
            unsafe { &*(handover as *const Handover) }
                .next
                .store(head, Ordering::Relaxed);
            match self.head.compare_exchange_weak(
                head,
                handover,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(current) => head = current,
            }
        }
    }

    /// One reclaim cycle: free every waiting node that has a zero link
    /// count and shows up in no soft-link slot. Returns how many nodes
    /// were released.
    ///
    /// Nodes unlinked later sit closer to the head, so walking head to
    /// tail releases a chain of deletions front to back in a single
    /// cycle: freeing a node drops the link count it held on its frozen
    /// successor before the walk reaches that successor.
    pub(crate) fn drain<AF: AddressFamily, M>(
        &self,
        links: &SoftLinks,
    ) -> usize {
        // Order this scan after all mutator hazard stores.
        fence(Ordering::SeqCst);

        let mut freed = 0;
        let mut prev: usize = 0;
        let mut cursor = self.head.load(Ordering::Acquire);

        while cursor != 0 {
            let handover = unsafe { &*(cursor as *const Handover) };
            let next = handover.next.load(Ordering::Acquire);
            let node =
                unsafe { node::node_ref::<AF, M>(handover.node) };

            let clear =
                node.link_count() == 0 && !links.is_hazard(handover.node);
            let unqueued = clear
                && if prev == 0 {
                    // First entry: racing concurrent pushes, so CAS. On
                    // failure the entry just waits for the next cycle.
                    self.head
                        .compare_exchange(
                            cursor,
                            next,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                } else {
                    unsafe { &*(prev as *const Handover) }
                        .next
                        .store(next, Ordering::Release);
                    true
                };

            if unqueued {
                // The node still holds a counted reference to the frozen
                // successor it had when it was unlinked; give it back.
                let succ = untag(node.next_raw());
                if succ != 0 {
                    unsafe { node::node_ref::<AF, M>(succ) }.remove_link();
                }
                unsafe {
                    node::free_node::<AF, M>(handover.node);
                    drop(Box::from_raw(cursor as *mut Handover));
                }
                freed += 1;
            } else {
                prev = cursor;
            }
            cursor = next;
        }

        if freed > 0 {
            trace!("reclaimer freed {} nodes", freed);
        }
        freed
    }

    /// Teardown: free every queued node unconditionally. Only safe once no
    /// other thread can touch the table.
    pub(crate) unsafe fn drain_all<AF: AddressFamily, M>(&self) -> usize {
        let mut freed = 0;
        let mut cursor = self.head.swap(0, Ordering::Relaxed);
        while cursor != 0 {
            let handover = Box::from_raw(cursor as *mut Handover);
            node::free_node::<AF, M>(handover.node);
            cursor = handover.next.load(Ordering::Relaxed);
            freed += 1;
        }
        freed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fib::node::FibNode;
    use crate::types::af::IPv4;
    use crate::types::PrefixId;

    #[test]
    fn reserve_release_cycles_rows() {
        let links = SoftLinks::new();
        let a = links.reserve();
        let b = links.reserve();
        assert_ne!(a, b);
        links.release(a);
        let c = links.reserve();
        assert_eq!(a, c);
        links.release(b);
        links.release(c);
    }

    #[test]
    fn hazard_scan_sees_protected_addresses() {
        let links = SoftLinks::new();
        let row = links.reserve();
        links.protect(row, CURR, 0x1000);
        assert!(links.is_hazard(0x1000));
        assert!(!links.is_hazard(0x2000));
        links.release(row);
        assert!(!links.is_hazard(0x1000));
    }

    #[test]
    fn drain_respects_hazards_and_link_counts() {
        let links = SoftLinks::new();
        let queue = HandoverQueue::new();

        let make = || {
            let node = FibNode::<IPv4, u64>::new_payload(
                1,
                PrefixId::new(1_u32.into(), 32),
                1,
            );
            // Down to zero, as an unlinked node with no frozen referrers.
            node.remove_link();
            node.remove_link();
            Box::into_raw(node) as usize
        };

        let hazardous = make();
        let referenced = make();
        let free = make();
        unsafe { node::node_ref::<IPv4, u64>(referenced) }.add_link();

        queue.push(hazardous);
        queue.push(referenced);
        queue.push(free);

        let row = links.reserve();
        links.protect(row, CURR, hazardous);

        assert_eq!(queue.drain::<IPv4, u64>(&links), 1);

        links.release(row);
        unsafe { node::node_ref::<IPv4, u64>(referenced) }.remove_link();
        assert_eq!(queue.drain::<IPv4, u64>(&links), 2);
        assert_eq!(queue.drain::<IPv4, u64>(&links), 0);
    }
}
