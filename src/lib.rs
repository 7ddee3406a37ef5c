//! # msqueue_rs
//!
//! A lock-free, unbounded, multiple-producer-multiple-consumer FIFO queue
//! following the Michael-Scott algorithm, with epoch-based memory reclamation,
//! plus the stress harness that validates it.
//!
//! ```
//! use msqueue_rs::{ConcurrentQueue, MsQueue};
//!
//! let queue = MsQueue::new();
//! queue.push(1u64);
//! queue.push(2);
//! assert_eq!(queue.pop(), Some(1));
//! assert_eq!(queue.pop(), Some(2));
//! assert_eq!(queue.pop(), None);
//! ```
//!
//! Worker threads should register once and go through a handle:
//!
//! ```
//! use msqueue_rs::{ConcurrentQueue, MsQueue};
//! use std::thread;
//!
//! let queue = MsQueue::new();
//! thread::scope(|s| {
//!     s.spawn(|| {
//!         let handle = queue.register();
//!         for i in 0..100u64 {
//!             handle.push(i);
//!         }
//!     });
//! });
//! assert_eq!(queue.was_size(), 100);
//! ```

mod common;
mod error;
mod node;
mod queue;
mod reclaim;

pub mod stress;
pub mod task;
pub mod trace;

pub use common::{ConcurrentQueue, Pop, RetryStrategy};
pub use error::{HarnessError, PushError, Role};
pub use queue::{MsQueue, QueueHandle};
pub use reclaim::ReclaimStats;
pub use stress::{Message, StressConfig, StressReport};
pub use task::TaskSource;
