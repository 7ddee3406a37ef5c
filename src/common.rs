//! Common functionality shared by the queue and its per-thread handles
//!
//! This module provides the memory ordering aliases, the retry policy used by
//! the blocking-style `push`/`pop` loops, and the operations trait that both
//! [`MsQueue`](crate::MsQueue) and [`QueueHandle`](crate::QueueHandle) implement.

use crossbeam_utils::Backoff;

use crate::error::PushError;

/// Memory ordering constants for atomic operations
///
/// Short aliases for the standard library's Ordering values, used throughout
/// the CAS loops to keep them readable.
pub mod ordering {
    pub use std::sync::atomic::Ordering::AcqRel as AR;
    pub use std::sync::atomic::Ordering::Acquire as A;
    pub use std::sync::atomic::Ordering::Relaxed as X;
    pub use std::sync::atomic::Ordering::Release as R;
}

/// How the retry-until-success loops wait between failed attempts
///
/// Neither strategy ever deschedules the calling thread: `Spin` issues a
/// single pause hint per failed attempt, `Backoff` spins exponentially longer
/// (capped) the more consecutive attempts fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryStrategy {
    /// One CPU pause hint per failed attempt
    #[default]
    Spin,
    /// Capped exponential spinning under contention
    Backoff,
}

impl RetryStrategy {
    /// Creates the per-call wait state for one retry loop
    #[inline]
    pub(crate) fn waiter(self) -> RetryWait {
        RetryWait {
            strategy: self,
            backoff: Backoff::new(),
        }
    }
}

/// Wait state for a single retry loop
pub(crate) struct RetryWait {
    strategy: RetryStrategy,
    backoff: Backoff,
}

impl RetryWait {
    /// Waits before the next attempt
    #[inline]
    pub(crate) fn wait(&self) {
        match self.strategy {
            RetryStrategy::Spin => std::hint::spin_loop(),
            RetryStrategy::Backoff => self.backoff.spin(),
        }
    }
}

/// Outcome of a single dequeue attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pop<T> {
    /// The oldest item was removed and is returned
    Item(T),
    /// No item was observed; the queue state was not touched
    Empty,
    /// A concurrent operation interfered; the caller should retry
    Retry,
}

impl<T> Pop<T> {
    /// Converts into the item, discarding the empty/retry distinction
    #[inline]
    pub fn item(self) -> Option<T> {
        match self {
            Pop::Item(item) => Some(item),
            Pop::Empty | Pop::Retry => None,
        }
    }

    /// Returns true if this attempt observed an empty queue
    #[inline]
    pub fn is_empty(&self) -> bool {
        matches!(self, Pop::Empty)
    }
}

/// Trait for concurrent queue operations
///
/// This trait defines the common interface of the queue and its registered
/// per-thread handles.
pub trait ConcurrentQueue<T> {
    /// Makes a single attempt to append `item`
    ///
    /// Returns the item inside [`PushError::Contended`] when another producer
    /// won the race for the tail; the caller retries.
    fn try_push(&self, item: T) -> Result<(), PushError<T>>;

    /// Makes a single attempt to remove the oldest item
    fn try_pop(&self) -> Pop<T>;

    /// Appends `item`, retrying on contention until it is linked
    fn push(&self, item: T);

    /// Removes the oldest item, retrying on contention
    ///
    /// Returns `None` only when the queue was observed empty.
    fn pop(&self) -> Option<T>;

    /// Returns the number of items the queue held during this call
    ///
    /// The value may be stale when called concurrently with push/pop.
    fn was_size(&self) -> usize;

    /// Checks if the queue was empty during this call
    fn was_empty(&self) -> bool;

    /// Busy-waits until an item can be removed
    ///
    /// Used by consumers that poll until an end-of-stream marker arrives.
    fn pop_wait(&self, strategy: RetryStrategy) -> T {
        let wait = strategy.waiter();
        loop {
            if let Some(item) = self.pop() {
                return item;
            }
            wait.wait();
        }
    }
}
