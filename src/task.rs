//! Process-wide source of sequential task ids

use std::sync::atomic::AtomicU64;

use crossbeam_utils::CachePadded;

use crate::common::ordering;

/// Hands out the ids `1, 2, 3, ...` exactly once each
///
/// Producers keep drawing until an id exceeds the task count; from then on
/// every draw is past the end.
#[derive(Debug)]
pub struct TaskSource {
    counter: CachePadded<AtomicU64>,
    ntasks: u64,
}

impl TaskSource {
    /// Creates a source of `ntasks` ids
    pub fn new(ntasks: u64) -> Self {
        Self {
            counter: CachePadded::new(AtomicU64::new(0)),
            ntasks,
        }
    }

    /// Atomically draws the next id, starting at 1
    ///
    /// No two callers ever receive the same value, including past `ntasks`.
    #[inline]
    pub fn next_id(&self) -> u64 {
        self.counter.fetch_add(1, ordering::AR) + 1
    }

    /// Draws the next id, or `None` once all `ntasks` ids are handed out
    #[inline]
    pub fn next_task(&self) -> Option<u64> {
        let id = self.next_id();
        (id <= self.ntasks).then_some(id)
    }

    /// Number of ids in the space
    #[inline]
    pub fn ntasks(&self) -> u64 {
        self.ntasks
    }

    /// Number of draws so far, including those past the end
    pub fn issued(&self) -> u64 {
        self.counter.load(ordering::A)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::thread;

    #[test]
    fn ids_start_at_one_and_increase() {
        let source = TaskSource::new(3);
        assert_eq!(source.next_task(), Some(1));
        assert_eq!(source.next_task(), Some(2));
        assert_eq!(source.next_task(), Some(3));
        assert_eq!(source.next_task(), None);
        assert_eq!(source.next_id(), 5);
        assert_eq!(source.issued(), 5);
    }

    #[test]
    fn empty_space_never_yields() {
        let source = TaskSource::new(0);
        assert_eq!(source.next_task(), None);
        assert_eq!(source.ntasks(), 0);
    }

    #[test]
    fn concurrent_draws_are_unique() {
        const THREADS: usize = 8;
        const NTASKS: u64 = 10_000;

        let source = &TaskSource::new(NTASKS);
        let drawn: Vec<Vec<u64>> = thread::scope(|s| {
            let workers: Vec<_> = (0..THREADS)
                .map(|_| {
                    s.spawn(move || {
                        let mut ids = Vec::new();
                        let mut last = 0;
                        while let Some(id) = source.next_task() {
                            assert!(id > last, "ids must increase per thread");
                            last = id;
                            ids.push(id);
                        }
                        ids
                    })
                })
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).collect()
        });

        let all: HashSet<u64> = drawn.iter().flatten().copied().collect();
        assert_eq!(all.len() as u64, NTASKS);
        assert_eq!(drawn.iter().map(Vec::len).sum::<usize>() as u64, NTASKS);
        assert!(all.iter().all(|&id| (1..=NTASKS).contains(&id)));
    }
}
