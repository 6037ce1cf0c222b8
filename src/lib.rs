//! A concurrent store for network prefixes: a Forwarding Information
//! Base (FIB).
//!
//! The store holds per-prefix data indexed by network prefix and supports
//! insertion, deletion, exact search, `routing` (in the CIDR sense, that
//! is searching for the longest stored prefix matching a given network)
//! and, the part that makes the structure genuinely tricky, asynchronous
//! reading: enumerating the contents while other threads add and remove
//! entries. All operations are lock-free; they retry under contention
//! instead of blocking.
//!
//! # Structure
//!
//! Internally the table is a single linked list of nodes sorted by the
//! *bit-reversed* hash of their prefix, with a power-of-two bucket array
//! pointing at permanent anchor nodes inside the list. Under the reversed
//! ordering every power-of-two bucketing has stable boundaries, so
//! doubling the array only introduces new anchors between existing ones:
//! nodes never move, and a grow is a single pointer swap plus lazy anchor
//! creation. Deletion follows the marked-pointer discipline: a node is
//! first marked dead through the low bit of its successor word (which
//! atomically fences off any insertion behind it), then unlinked.
//!
//! # Reclamation
//!
//! An unlinked node cannot be freed while some reader still holds a
//! pointer into it. Every operation therefore reserves one of a fixed set
//! of *soft-link rows* and publishes the nodes it traverses in the row's
//! slots; deleted nodes queue up for a per-table background reclaimer
//! thread that only releases memory no row can still see. Suspended
//! iterators keep their row, so the node they are parked on survives even
//! its own deletion.
//!
//! # Enumeration
//!
//! [Fib::walk] runs a closure over every live prefix in one go.
//! [Fib::iter_suspendable] returns an iterator that may be put aside
//! mid-flight, with the table mutating underneath, and resumed later.
//!
//! # Example
//!
//! ```
//! use fib_store::{Fib, FibConfig, IPv4, PrefixId};
//!
//! let fib: Fib<IPv4, u32> = Fib::new(FibConfig::default());
//!
//! // 192.168.0.0/16 routes to AS 64512.
//! let pfx = PrefixId::new(0xC0A8_0000_u32.into(), 16);
//! let (entry, created) = fib.get_or_insert_with(pfx, || 64512).unwrap();
//! assert!(created);
//! drop(entry);
//!
//! // Longest-prefix match finds it for any contained address.
//! let route = fib.route(PrefixId::new(0xC0A8_0101_u32.into(), 32));
//! assert_eq!(route.as_deref(), Some(&64512));
//! ```

mod fib;
mod stats;
mod types;

pub use crate::fib::iterators::FibIter;
pub use crate::fib::{Entry, Fib, FibConfig};
pub use crate::stats::FibStats;
pub use crate::types::af::{AddressFamily, IPv4, IPv6};
pub use crate::types::errors::{FatalError, FatalResult, FibError};
pub use crate::types::{Meta, PrefixId};
