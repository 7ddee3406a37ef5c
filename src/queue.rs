//! Michael-Scott lock-free unbounded queue
//!
//! The queue is a singly linked list with a permanent dummy node at the front:
//! `head` points at the dummy, the first real item lives in `head.next`, and
//! `tail` points at the last linked node or one behind it. Every mutation is a
//! compare-and-swap; no lock is ever taken.
//!
//! ```text
//!   head                        tail
//!    │                           │
//!    ▼                           ▼
//! [dummy] ──► [a] ──► [b] ──► [c] ──► null
//! ```
//!
//! A push links its node onto `tail.next` and then swings `tail` forward. The
//! second step is best-effort: any thread that finds `tail.next` non-null
//! swings `tail` on the laggard's behalf before doing its own work.
//!
//! A pop copies the payload out of `head.next` and swings `head` onto that
//! node, which becomes the new dummy. The old dummy is retired to the queue's
//! reclamation [`Domain`] and freed once no pinned thread can still see it.

use std::fmt;
use std::mem::ManuallyDrop;
use std::sync::atomic::AtomicIsize;

use crossbeam_epoch::{self as epoch, Atomic, Guard, Owned, Shared};
use crossbeam_utils::CachePadded;

use crate::common::{ordering, ConcurrentQueue, Pop, RetryStrategy};
use crate::error::PushError;
use crate::node::Node;
use crate::reclaim::{Domain, Participant, ReclaimStats};

/// A lock-free, unbounded, multi-producer multi-consumer FIFO queue
///
/// Operations called directly on the queue register a short-lived participant
/// with its reclamation domain on every call. Worker threads that issue many
/// operations should call [`register`](MsQueue::register) once and use the
/// returned [`QueueHandle`].
///
/// Each push and pop is linearizable. Items pushed by one producer are
/// dequeued in that producer's order; items from racing producers interleave
/// in whatever order their links succeeded.
pub struct MsQueue<T> {
    /// Dummy node; the queue is empty iff `head.next` is null
    head: CachePadded<Atomic<Node<T>>>,

    /// Last linked node, or its predecessor while a push is half done
    tail: CachePadded<Atomic<Node<T>>>,

    /// Pushes minus pops, racy
    len: CachePadded<AtomicIsize>,

    retry: RetryStrategy,

    domain: Domain,
}

// SAFETY: payloads move between threads through the queue, which only requires
// `T: Send`; nodes are shared exclusively through atomics and the epoch guard.
unsafe impl<T: Send> Send for MsQueue<T> {}
unsafe impl<T: Send> Sync for MsQueue<T> {}

impl<T> MsQueue<T> {
    /// Creates an empty queue holding only its dummy node
    pub fn new() -> Self {
        Self::with_retry(RetryStrategy::default())
    }

    /// Creates an empty queue whose retry loops wait using `retry`
    pub fn with_retry(retry: RetryStrategy) -> Self {
        // SAFETY: the queue is not shared yet.
        let guard = unsafe { epoch::unprotected() };
        let dummy = Owned::new(Node::dummy()).into_shared(guard);

        Self {
            head: CachePadded::new(Atomic::from(dummy)),
            tail: CachePadded::new(Atomic::from(dummy)),
            len: CachePadded::new(AtomicIsize::new(0)),
            retry,
            domain: Domain::new(),
        }
    }

    /// Registers the calling thread with this queue's reclamation domain
    pub fn register(&self) -> QueueHandle<'_, T> {
        QueueHandle {
            queue: self,
            participant: self.domain.register(),
        }
    }

    /// The wait policy used by [`push`](ConcurrentQueue::push) and
    /// [`pop`](ConcurrentQueue::pop)
    #[inline]
    pub fn retry_strategy(&self) -> RetryStrategy {
        self.retry
    }

    /// Retire/reclaim counters of the queue's reclamation domain
    pub fn reclaim_stats(&self) -> ReclaimStats {
        self.domain.stats()
    }

    /// One attempt at linking `node` after the current tail
    ///
    /// Hands the node back untouched when the attempt lost a race, so the
    /// caller can retry without allocating again.
    fn link(&self, node: Owned<Node<T>>, guard: &Guard) -> Result<(), Owned<Node<T>>> {
        let tail = self.tail.load(ordering::A, guard);
        // SAFETY: `tail` is never null, and the guard keeps it from being freed.
        let last = unsafe { tail.deref() };
        let next = last.next.load(ordering::A, guard);

        if tail != self.tail.load(ordering::A, guard) {
            return Err(node);
        }

        if !next.is_null() {
            // Tail is lagging: help the producer that linked `next`.
            let _ = self
                .tail
                .compare_exchange(tail, next, ordering::R, ordering::X, guard);
            return Err(node);
        }

        match last
            .next
            .compare_exchange(Shared::null(), node, ordering::R, ordering::X, guard)
        {
            Ok(linked) => {
                // Best-effort; a failure means someone already helped.
                let _ = self
                    .tail
                    .compare_exchange(tail, linked, ordering::R, ordering::X, guard);
                self.len.fetch_add(1, ordering::X);
                Ok(())
            }
            Err(err) => Err(err.new),
        }
    }

    fn try_push_in(&self, item: T, guard: &Guard) -> Result<(), PushError<T>> {
        self.link(Owned::new(Node::new(item)), guard)
            .map_err(|node| PushError::Contended((*node.into_box()).into_payload()))
    }

    fn push_in(&self, item: T, guard: &Guard) {
        let wait = self.retry.waiter();
        let mut node = Owned::new(Node::new(item));
        loop {
            match self.link(node, guard) {
                Ok(()) => return,
                Err(unlinked) => {
                    node = unlinked;
                    wait.wait();
                }
            }
        }
    }

    /// One attempt at unlinking the oldest item
    fn try_pop_in(&self, guard: &Guard) -> Pop<T> {
        let head = self.head.load(ordering::A, guard);
        let tail = self.tail.load(ordering::A, guard);
        // SAFETY: `head` is never null, and the guard keeps it from being freed.
        let first = unsafe { head.deref() };
        let next = first.next.load(ordering::A, guard);

        if head != self.head.load(ordering::A, guard) {
            return Pop::Retry;
        }

        if head == tail {
            if next.is_null() {
                return Pop::Empty;
            }
            let _ = self
                .tail
                .compare_exchange(tail, next, ordering::R, ordering::X, guard);
            return Pop::Retry;
        }

        // SAFETY: `head != tail` so `next` was linked, and the guard keeps it alive.
        let Some(node) = (unsafe { next.as_ref() }) else {
            return Pop::Retry;
        };

        // The payload must be copied before the CAS: once `head` moves, another
        // consumer may pop `node` itself and retire it.
        // SAFETY: only the winner of the CAS below takes ownership of the copy.
        let item = ManuallyDrop::new(unsafe { node.read_payload() });

        match self
            .head
            .compare_exchange(head, next, ordering::R, ordering::X, guard)
        {
            Ok(_) => {
                self.len.fetch_sub(1, ordering::X);
                // SAFETY: `head` was unlinked by our CAS and is retired once.
                unsafe { self.domain.retire(guard, head) };
                Pop::Item(ManuallyDrop::into_inner(item))
            }
            Err(_) => Pop::Retry,
        }
    }

    fn pop_in(&self, guard: &Guard) -> Option<T> {
        let wait = self.retry.waiter();
        loop {
            match self.try_pop_in(guard) {
                Pop::Item(item) => return Some(item),
                Pop::Empty => return None,
                Pop::Retry => wait.wait(),
            }
        }
    }

    fn was_empty_in(&self, guard: &Guard) -> bool {
        let head = self.head.load(ordering::A, guard);
        // SAFETY: `head` is never null, and the guard keeps it from being freed.
        unsafe { head.deref() }
            .next
            .load(ordering::A, guard)
            .is_null()
    }

    #[inline]
    fn len_hint(&self) -> usize {
        self.len.load(ordering::X).max(0) as usize
    }
}

impl<T> ConcurrentQueue<T> for MsQueue<T> {
    fn try_push(&self, item: T) -> Result<(), PushError<T>> {
        self.try_push_in(item, &self.domain.pin_transient())
    }

    fn try_pop(&self) -> Pop<T> {
        self.try_pop_in(&self.domain.pin_transient())
    }

    fn push(&self, item: T) {
        self.push_in(item, &self.domain.pin_transient());
    }

    fn pop(&self) -> Option<T> {
        self.pop_in(&self.domain.pin_transient())
    }

    fn was_size(&self) -> usize {
        self.len_hint()
    }

    fn was_empty(&self) -> bool {
        self.was_empty_in(&self.domain.pin_transient())
    }
}

impl<T> Default for MsQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for MsQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MsQueue")
            .field("len", &self.len_hint())
            .field("retry", &self.retry)
            .field("reclaim", &self.domain.stats())
            .finish()
    }
}

impl<T> Drop for MsQueue<T> {
    fn drop(&mut self) {
        // SAFETY: `&mut self` means no other thread is inside an operation, so
        // every node still linked is exclusively ours. Retired nodes belong to
        // the domain, which frees them when it drops after this.
        unsafe {
            let guard = epoch::unprotected();
            let head = self.head.load(ordering::X, guard);
            let mut next = head.deref().next.load(ordering::X, guard);
            drop(head.into_owned());

            while !next.is_null() {
                let mut node = next.into_owned();
                next = node.next.load(ordering::X, guard);
                node.drop_payload();
            }
        }
    }
}

/// A thread's registered view of an [`MsQueue`]
///
/// Pins its participant once per operation instead of registering anew.
/// Not `Send`: create one inside each worker thread.
pub struct QueueHandle<'q, T> {
    queue: &'q MsQueue<T>,
    participant: Participant,
}

impl<'q, T> QueueHandle<'q, T> {
    /// The queue this handle operates on
    #[inline]
    pub fn queue(&self) -> &'q MsQueue<T> {
        self.queue
    }

    /// Publishes this thread's retired nodes and tries to advance the epoch
    pub fn flush(&self) {
        self.participant.flush();
    }
}

impl<T> ConcurrentQueue<T> for QueueHandle<'_, T> {
    #[inline]
    fn try_push(&self, item: T) -> Result<(), PushError<T>> {
        self.queue.try_push_in(item, &self.participant.pin())
    }

    #[inline]
    fn try_pop(&self) -> Pop<T> {
        self.queue.try_pop_in(&self.participant.pin())
    }

    #[inline]
    fn push(&self, item: T) {
        self.queue.push_in(item, &self.participant.pin());
    }

    #[inline]
    fn pop(&self) -> Option<T> {
        self.queue.pop_in(&self.participant.pin())
    }

    fn was_size(&self) -> usize {
        self.queue.len_hint()
    }

    fn was_empty(&self) -> bool {
        self.queue.was_empty_in(&self.participant.pin())
    }
}

impl<T> fmt::Debug for QueueHandle<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueHandle")
            .field("queue", self.queue)
            .field("participant", &self.participant)
            .finish()
    }
}
