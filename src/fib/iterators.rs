use crossbeam_epoch as epoch;
use std::sync::atomic::Ordering;

use crate::fib::node::{untag, MARK_BIT};
use crate::fib::reclaim::CURR;
use crate::fib::{Fib, FibInner};
use crate::types::{AddressFamily, Meta, PrefixId};

//------------ walk ----------------------------------------------------------

impl<AF: AddressFamily, M: Meta> Fib<AF, M> {
    /// Visit every live prefix in split order.
    ///
    /// The walk reserves one reservation row for its whole duration and
    /// follows the list directly, skipping bucket anchors and logically
    /// deleted nodes. Entries inserted or removed by other threads while
    /// the walk runs may or may not be seen; entries present for the whole
    /// walk are yielded exactly once. Walks nest (each claims its own
    /// row), but the body must not insert into or remove from the table it
    /// is walking.
    pub fn walk<F>(&self, mut f: F)
    where
        F: FnMut(PrefixId<AF>, &M),
    {
        let guard = epoch::pin();
        let row = self.inner.links.reserve();

        let array = self.inner.bucket_array(&guard);
        let mut curr_addr = array.slot(0).load(Ordering::Acquire);
        self.inner.links.protect(row, CURR, curr_addr);

        while curr_addr != 0 {
            let curr = unsafe { self.inner.node(curr_addr) };
            let raw = self.inner.protect_successor(row, curr);
            if !curr.is_sentinel() && raw & MARK_BIT == 0 {
                f(curr.prefix, unsafe { curr.meta() });
            }
            self.inner.commit_step(row);
            curr_addr = untag(raw);
        }

        self.inner.links.release(row);
    }

    /// Start a suspendable enumeration; see [FibIter].
    pub fn iter_suspendable(&self) -> FibIter<'_, AF, M> {
        let guard = epoch::pin();
        let row = self.inner.links.reserve();

        let array = self.inner.bucket_array(&guard);
        let head = array.slot(0).load(Ordering::Acquire);
        self.inner.links.protect(row, CURR, head);

        FibIter {
            fib: &*self.inner,
            row,
            done: false,
        }
    }
}

//------------ FibIter -------------------------------------------------------

/// A suspendable enumeration of a table.
///
/// Between calls to [next](FibIter::next) the iterator stays parked on its
/// current node, registered as a hazard. The table may be mutated freely
/// in the meantime, including deleting the very prefix the iterator is
/// parked on, without invalidating it: a deleted node is merely marked
/// and kept alive until the iterator moves off it, and resuming simply
/// advances past whatever has been deleted. Each iterator occupies one
/// reservation row until it is exhausted, dropped, or ended with
/// [put_end](FibIter::put_end).
pub struct FibIter<'a, AF: AddressFamily, M: Meta> {
    fib: &'a FibInner<AF, M>,
    row: usize,
    done: bool,
}

impl<'a, AF: AddressFamily, M: Meta> FibIter<'a, AF, M> {
    /// Advance to the next live prefix and yield it, or `None` once the
    /// list is exhausted (which also releases the iterator's row).
    ///
    /// The yielded reference stays valid until the next call: the node it
    /// belongs to is the one the iterator parks on.
    pub fn next(&mut self) -> Option<(PrefixId<AF>, &M)> {
        if self.done {
            return None;
        }

        let mut curr_addr = self.fib.links.slot(self.row, CURR);
        loop {
            let curr = unsafe { self.fib.node(curr_addr) };
            let raw = self.fib.protect_successor(self.row, curr);
            let succ_addr = untag(raw);
            self.fib.commit_step(self.row);

            if succ_addr == 0 {
                self.end();
                return None;
            }
            curr_addr = succ_addr;

            let parked = unsafe { self.fib.node(curr_addr) };
            if parked.is_sentinel() || parked.is_marked() {
                continue;
            }
            return Some((parked.prefix, unsafe { parked.meta() }));
        }
    }

    /// Park this iterator at the same position as `other`. Both iterators
    /// then resume from the same node, independently.
    pub fn copy_from(&mut self, other: &FibIter<'_, AF, M>) {
        assert!(
            !self.done && !other.done,
            "cannot copy a finished iterator"
        );
        assert!(
            std::ptr::eq(self.fib, other.fib),
            "iterators belong to different tables"
        );
        // The source row keeps the node protected while we take it over.
        let addr = other.fib.links.slot(other.row, CURR);
        self.fib.links.protect(self.row, CURR, addr);
    }

    /// Abandon the enumeration and release the row immediately. Dropping
    /// the iterator does the same.
    pub fn put_end(mut self) {
        self.end();
    }

    fn end(&mut self) {
        if !self.done {
            self.done = true;
            self.fib.links.release(self.row);
        }
    }
}

impl<AF: AddressFamily, M: Meta> Drop for FibIter<'_, AF, M> {
    fn drop(&mut self) {
        self.end();
    }
}
