//! Epoch-based reclamation of unlinked queue nodes
//!
//! Every queue owns a private [`Domain`]. A thread takes part by registering a
//! [`Participant`] and pinning it for the duration of each push or pop. A node
//! unlinked by a successful pop is *retired*: its destruction is deferred until
//! every participant that was pinned when it was retired has unpinned. No
//! thread can therefore hold a reference to freed memory, and a freed address
//! can never be handed out again while a stale snapshot of it is still being
//! compared against, which rules out ABA on `head` and `tail`.
//!
//! ```text
//! pop: pin ── load head ── CAS head ── retire(old head) ── unpin
//!                                           │
//!                                           ▼
//!                     freed once the global epoch has advanced twice
//! ```

use std::fmt;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use crossbeam_epoch::{Collector, Guard, LocalHandle, Shared};
use crossbeam_utils::CachePadded;

use crate::common::ordering;
use crate::node::Node;

/// Counters describing the reclamation backlog of a domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReclaimStats {
    /// Nodes unlinked and handed to the domain
    pub retired: u64,
    /// Retired nodes whose memory has been freed
    pub reclaimed: u64,
}

impl ReclaimStats {
    /// Nodes retired but not yet freed
    #[inline]
    pub fn pending(&self) -> u64 {
        self.retired - self.reclaimed
    }
}

/// A reclamation domain owned by one queue
pub struct Domain {
    collector: Collector,
    retired: CachePadded<AtomicU64>,
    reclaimed: Arc<CachePadded<AtomicU64>>,
}

impl Domain {
    /// Creates an empty domain with its own epoch collector
    pub fn new() -> Self {
        Self {
            collector: Collector::new(),
            retired: CachePadded::new(AtomicU64::new(0)),
            reclaimed: Arc::new(CachePadded::new(AtomicU64::new(0))),
        }
    }

    /// Registers the calling thread with this domain
    pub fn register(&self) -> Participant {
        Participant {
            handle: self.collector.register(),
        }
    }

    /// Pins a short-lived participant for a single operation
    ///
    /// The returned guard keeps its participant alive until it is dropped.
    /// Threads issuing many operations should [`register`](Self::register)
    /// once instead.
    #[inline]
    pub fn pin_transient(&self) -> Guard {
        self.collector.register().pin()
    }

    /// Defers destruction of an unlinked node
    ///
    /// # Safety
    ///
    /// `node` must have been unlinked from the queue by a successful CAS under
    /// `guard`, so that no thread pinned later can reach it, and it must be
    /// retired exactly once. Its payload must already have been moved out.
    pub(crate) unsafe fn retire<T>(&self, guard: &Guard, node: Shared<'_, Node<T>>) {
        self.retired.fetch_add(1, ordering::X);

        let raw = node.as_raw();
        let reclaimed = Arc::clone(&self.reclaimed);
        guard.defer_unchecked(move || {
            drop(Shared::from(raw).into_owned());
            reclaimed.fetch_add(1, ordering::X);
        });
    }

    /// Snapshot of the retire/reclaim counters
    pub fn stats(&self) -> ReclaimStats {
        // Load reclaimed first so a concurrent retire can only make the
        // snapshot look more pending, never negative.
        let reclaimed = self.reclaimed.load(ordering::A);
        let retired = self.retired.load(ordering::A);
        ReclaimStats { retired, reclaimed }
    }
}

impl Default for Domain {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Domain").field("stats", &self.stats()).finish()
    }
}

/// A thread's registration with a [`Domain`]
///
/// Not `Send`: a participant must be used by the thread that registered it.
pub struct Participant {
    handle: LocalHandle,
}

impl Participant {
    /// Marks the thread active in the current epoch until the guard drops
    #[inline]
    pub fn pin(&self) -> Guard {
        self.handle.pin()
    }

    /// Returns true if a guard from this participant is alive
    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.handle.is_pinned()
    }

    /// Publishes locally buffered garbage and tries to advance the epoch
    pub fn flush(&self) {
        self.handle.pin().flush();
    }
}

impl fmt::Debug for Participant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Participant")
            .field("pinned", &self.is_pinned())
            .finish()
    }
}
