//! Multi-producer/multi-consumer stress harness
//!
//! Producers drain a [`TaskSource`] into an [`MsQueue`], consumers record
//! every id they dequeue into a [`ResultBuffer`], and the coordinator checks
//! afterwards that each id in `1..=ntasks` was delivered exactly once.
//!
//! Shutdown is cooperative: once every producer has been joined the
//! coordinator pushes one [`Message::EndOfStream`] per consumer, and each
//! consumer exits on the first one it receives. No task can be pushed after a
//! sentinel, so no consumer leaves work behind.

use std::fmt;
use std::process;
use std::sync::atomic::AtomicU64;
use std::sync::Barrier;
use std::thread::{self, Scope, ScopedJoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::common::{ordering, ConcurrentQueue, RetryStrategy};
use crate::error::{HarnessError, Role};
use crate::queue::MsQueue;
use crate::task::TaskSource;

/// What travels through the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    /// A task id drawn from the [`TaskSource`]
    Task(u64),
    /// Tells exactly one consumer to stop
    EndOfStream,
}

impl Message {
    #[inline]
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Message::EndOfStream)
    }
}

/// Parameters of one stress run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StressConfig {
    pub ntasks: u64,
    pub producers: usize,
    pub consumers: usize,
    pub retry: RetryStrategy,
}

impl StressConfig {
    pub fn new(ntasks: u64, producers: usize, consumers: usize) -> Self {
        Self {
            ntasks,
            producers,
            consumers,
            retry: RetryStrategy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryStrategy) -> Self {
        self.retry = retry;
        self
    }

    /// Checks the thread counts and that the result buffer is addressable
    pub fn validate(&self) -> Result<(), HarnessError> {
        if self.producers == 0 {
            return Err(HarnessError::InvalidConfig(
                "at least one producer is required".into(),
            ));
        }
        if self.consumers == 0 {
            return Err(HarnessError::InvalidConfig(
                "at least one consumer is required".into(),
            ));
        }
        self.slot_count().map(|_| ())
    }

    fn slot_count(&self) -> Result<usize, HarnessError> {
        usize::try_from(self.ntasks).map_err(|_| {
            HarnessError::InvalidConfig(format!("{} tasks do not fit in memory", self.ntasks))
        })
    }
}

/// One slot that did not hold its expected id after the run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mismatch {
    pub slot: usize,
    /// `None` if no consumer ever recorded into the slot
    pub found: Option<u64>,
    pub expected: u64,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.found {
            Some(found) => write!(f, "WRONG result {} should be {}", found, self.expected),
            None => write!(f, "WRONG result unset should be {}", self.expected),
        }
    }
}

/// Per-task result slots shared by all consumers
///
/// Slot `k - 1` is written only by the consumer that dequeued id `k`, so no
/// two consumers ever touch the same slot while the queue behaves.
#[derive(Debug)]
pub struct ResultBuffer {
    /// 0 marks an unset slot; valid ids start at 1
    slots: Box<[AtomicU64]>,
}

impl ResultBuffer {
    /// Creates `ntasks` unset slots
    pub fn new(ntasks: usize) -> Self {
        Self {
            slots: (0..ntasks).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    /// Records that task `id` was consumed
    ///
    /// Fails with [`HarnessError::ProtocolViolation`] if `id` is outside
    /// `[1, ntasks]`.
    pub fn record(&self, id: u64) -> Result<(), HarnessError> {
        let slot = id
            .checked_sub(1)
            .and_then(|slot| usize::try_from(slot).ok())
            .and_then(|slot| self.slots.get(slot))
            .ok_or(HarnessError::ProtocolViolation {
                id,
                ntasks: self.slots.len() as u64,
            })?;
        slot.store(id, ordering::X);
        Ok(())
    }

    /// The id recorded in `slot`, if any
    pub fn get(&self, slot: usize) -> Option<u64> {
        self.slots
            .get(slot)
            .map(|value| value.load(ordering::X))
            .filter(|&value| value != 0)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Lists every slot `i` that does not hold `i + 1`
    pub fn verify(&self) -> Vec<Mismatch> {
        (0..self.slots.len())
            .filter_map(|slot| {
                let expected = slot as u64 + 1;
                let found = self.get(slot);
                (found != Some(expected)).then_some(Mismatch {
                    slot,
                    found,
                    expected,
                })
            })
            .collect()
    }
}

/// Outcome of a completed stress run
#[derive(Debug, Clone, PartialEq)]
pub struct StressReport {
    pub ntasks: u64,
    pub producers: usize,
    pub consumers: usize,
    /// Task messages pushed by all producers
    pub pushed: u64,
    /// Task messages popped by all consumers
    pub consumed: u64,
    pub sentinels_sent: usize,
    /// Consumers that exited after receiving their end-of-stream marker
    pub sentinels_observed: usize,
    /// From the start rendezvous until every consumer was joined
    pub elapsed: Duration,
    pub mismatches: Vec<Mismatch>,
}

impl StressReport {
    /// True if every id was delivered exactly once and every consumer stopped
    /// on its own sentinel
    pub fn is_ok(&self) -> bool {
        self.mismatches.is_empty()
            && self.pushed == self.ntasks
            && self.consumed == self.ntasks
            && self.sentinels_observed == self.consumers
    }

    /// Tasks moved through the queue per second
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.consumed as f64 / secs
        } else {
            0.0
        }
    }
}

/// Runs one stress test as described by `config`
///
/// All producers and consumers, plus the calling thread, meet on a barrier
/// before any queue traffic so the timed region covers steady state only.
pub fn run(config: &StressConfig) -> Result<StressReport, HarnessError> {
    config.validate()?;

    let queue = MsQueue::with_retry(config.retry);
    let tasks = TaskSource::new(config.ntasks);
    let results = ResultBuffer::new(config.slot_count()?);
    let barrier = Barrier::new(config.producers + config.consumers + 1);

    info!(
        ntasks = config.ntasks,
        producers = config.producers,
        consumers = config.consumers,
        retry = ?config.retry,
        "starting stress run"
    );

    let (queue, tasks, results, barrier) = (&queue, &tasks, &results, &barrier);
    let retry = config.retry;

    let (outcome, elapsed) = thread::scope(|s| {
        let consumers: Vec<_> = (0..config.consumers)
            .map(|index| {
                spawn_worker(s, Role::Consumer, index, move || {
                    consume(queue, results, barrier, retry)
                })
            })
            .collect();

        let producers: Vec<_> = (0..config.producers)
            .map(|index| {
                spawn_worker(s, Role::Producer, index, move || produce(queue, tasks, barrier))
            })
            .collect();

        let handle = queue.register();
        barrier.wait();
        let start = Instant::now();

        let mut first_error = None;
        let mut pushed = 0;
        for (index, producer) in producers.into_iter().enumerate() {
            match producer.join() {
                Ok(count) => pushed += count,
                Err(_) => {
                    warn!(index, "producer panicked");
                    first_error.get_or_insert(HarnessError::WorkerPanicked {
                        role: Role::Producer,
                        index,
                    });
                }
            }
        }

        // Sent even if a producer failed, otherwise consumers would spin forever.
        info!(pushed, "producers done, sending end-of-stream");
        for _ in 0..config.consumers {
            handle.push(Message::EndOfStream);
        }

        let mut consumed = 0;
        let mut sentinels_observed = 0;
        for (index, consumer) in consumers.into_iter().enumerate() {
            match consumer.join() {
                Ok(received) => {
                    consumed += received;
                    sentinels_observed += 1;
                }
                Err(_) => {
                    warn!(index, "consumer panicked");
                    first_error.get_or_insert(HarnessError::WorkerPanicked {
                        role: Role::Consumer,
                        index,
                    });
                }
            }
        }
        let elapsed = start.elapsed();

        let outcome = match first_error {
            Some(err) => Err(err),
            None => Ok((pushed, consumed, sentinels_observed)),
        };
        (outcome, elapsed)
    });

    let (pushed, consumed, sentinels_observed) = outcome?;
    let mismatches = results.verify();

    let report = StressReport {
        ntasks: config.ntasks,
        producers: config.producers,
        consumers: config.consumers,
        pushed,
        consumed,
        sentinels_sent: config.consumers,
        sentinels_observed,
        elapsed,
        mismatches,
    };

    if report.is_ok() {
        info!(elapsed = ?report.elapsed, throughput = report.throughput(), "stress run passed");
    } else {
        warn!(
            mismatches = report.mismatches.len(),
            pushed = report.pushed,
            consumed = report.consumed,
            "stress run failed verification"
        );
    }
    Ok(report)
}

fn spawn_worker<'scope, 'env, F, R>(
    s: &'scope Scope<'scope, 'env>,
    role: Role,
    index: usize,
    f: F,
) -> ScopedJoinHandle<'scope, R>
where
    F: FnOnce() -> R + Send + 'scope,
    R: Send + 'scope,
{
    match thread::Builder::new()
        .name(format!("{role}-{index}"))
        .spawn_scoped(s, f)
    {
        Ok(handle) => handle,
        Err(err) => {
            // Threads already spawned are parked on the start barrier and
            // can never be released.
            error!(%role, index, %err, "failed to spawn worker, aborting");
            process::abort();
        }
    }
}

fn produce(queue: &MsQueue<Message>, tasks: &TaskSource, barrier: &Barrier) -> u64 {
    let handle = queue.register();
    barrier.wait();

    let mut pushed = 0;
    while let Some(id) = tasks.next_task() {
        handle.push(Message::Task(id));
        pushed += 1;
    }
    debug!(pushed, "producer exhausted task source");
    pushed
}

fn consume(
    queue: &MsQueue<Message>,
    results: &ResultBuffer,
    barrier: &Barrier,
    retry: RetryStrategy,
) -> u64 {
    let handle = queue.register();
    barrier.wait();

    let mut received = 0;
    loop {
        match handle.pop_wait(retry) {
            Message::EndOfStream => break,
            Message::Task(id) => {
                if let Err(err) = results.record(id) {
                    error!(%err, "aborting");
                    process::abort();
                }
                received += 1;
            }
        }
    }
    debug!(received, "consumer saw end-of-stream");
    received
}
