//! Error types for queue operations and the stress harness

use std::fmt;

use thiserror::Error;

/// Failure of a single push attempt
///
/// The queue is unbounded, so a failed attempt is always transient: the item
/// is handed back and the caller retries.
#[derive(Error, PartialEq, Eq)]
pub enum PushError<T> {
    /// Another producer linked its node first
    #[error("lost the race for the tail, retry")]
    Contended(T),
}

impl<T> PushError<T> {
    /// Recovers the item that was not enqueued
    #[inline]
    pub fn into_inner(self) -> T {
        match self {
            PushError::Contended(item) => item,
        }
    }
}

// Manual impl so `T` does not need to be `Debug`.
impl<T> fmt::Debug for PushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PushError::Contended(_) => f.write_str("Contended(..)"),
        }
    }
}

/// Which side of the pipeline a worker thread belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Producer,
    Consumer,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Producer => f.write_str("producer"),
            Role::Consumer => f.write_str("consumer"),
        }
    }
}

/// Errors reported by the stress harness
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A consumer dequeued an id that was never issued
    #[error("received task {id} outside [1, {ntasks}]")]
    ProtocolViolation { id: u64, ntasks: u64 },

    #[error("{role} thread {index} panicked")]
    WorkerPanicked { role: Role, index: usize },
}
