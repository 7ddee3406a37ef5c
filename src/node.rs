//! Linked-list cell of the queue

use std::mem::MaybeUninit;
use std::ptr;

use crossbeam_epoch::Atomic;

/// A cell holding one payload and a successor link
///
/// The payload is written once at allocation and never mutated afterwards;
/// only `next` changes, from null to the successor, by the producer whose CAS
/// on it succeeds. The payload slot is uninitialized for the dummy node, and
/// it is logically moved out once the node becomes the new dummy after a pop.
/// Dropping a `Node` therefore never drops the payload.
pub(crate) struct Node<T> {
    payload: MaybeUninit<T>,
    pub(crate) next: Atomic<Node<T>>,
}

impl<T> Node<T> {
    /// Creates a node carrying `item`
    #[inline]
    pub(crate) fn new(item: T) -> Self {
        Self {
            payload: MaybeUninit::new(item),
            next: Atomic::null(),
        }
    }

    /// Creates the payload-less node that `head` always points at
    #[inline]
    pub(crate) fn dummy() -> Self {
        Self {
            payload: MaybeUninit::uninit(),
            next: Atomic::null(),
        }
    }

    /// Bitwise-copies the payload out of the node
    ///
    /// # Safety
    ///
    /// The node must have been created by [`Node::new`], and the copy must be
    /// used as the owned value at most once across all threads. A copy taken
    /// speculatively before a CAS that then fails must be forgotten, not dropped.
    #[inline]
    pub(crate) unsafe fn read_payload(&self) -> T {
        ptr::read(self.payload.as_ptr())
    }

    /// Takes the payload out of a node that was never linked
    #[inline]
    pub(crate) fn into_payload(self) -> T {
        // SAFETY: callers only hold an owned, unlinked node built by `Node::new`.
        unsafe { self.payload.assume_init() }
    }

    /// Drops the payload in place
    ///
    /// # Safety
    ///
    /// The payload must be initialized and not moved out.
    #[inline]
    pub(crate) unsafe fn drop_payload(&mut self) {
        self.payload.assume_init_drop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_epoch::{self as epoch, Owned};
    use std::sync::atomic::Ordering;

    #[test]
    fn payload_round_trips_through_owned_node() {
        let node = Owned::new(Node::new(String::from("hello")));
        assert_eq!((*node.into_box()).into_payload(), "hello");
    }

    #[test]
    fn fresh_nodes_have_no_successor() {
        let guard = epoch::pin();
        let dummy = Node::<u64>::dummy();
        assert!(dummy.next.load(Ordering::Relaxed, &guard).is_null());

        let node = Node::new(5u64);
        assert!(node.next.load(Ordering::Relaxed, &guard).is_null());
        assert_eq!(unsafe { node.read_payload() }, 5);
    }
}
