//! test_mpmc: stress test for the Michael-Scott MPMC queue.
//!
//! # Usage
//!
//! ```bash
//! test_mpmc 1000000 4 4
//! RUST_LOG=msqueue_rs=info test_mpmc 1000000 4 4 --backoff
//! ```
//!
//! Exits 0 when every task id was delivered exactly once.

use std::process::ExitCode;

use clap::Parser;
use tracing::error;

use msqueue_rs::stress::{self, StressConfig};
use msqueue_rs::trace::init_tracing;
use msqueue_rs::RetryStrategy;

/// Push ntasks ids through the queue with P producers and C consumers, then
/// check that each id arrived exactly once.
#[derive(Parser, Debug)]
#[command(name = "test_mpmc")]
#[command(about = "Multi-producer/multi-consumer stress test for the MS queue")]
struct Cli {
    /// Total number of tasks.
    ntasks: u64,

    /// Number of producer threads.
    producers: usize,

    /// Number of consumer threads.
    consumers: usize,

    /// Back off exponentially on CAS contention instead of a single pause.
    #[arg(long)]
    backoff: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    let retry = if cli.backoff {
        RetryStrategy::Backoff
    } else {
        RetryStrategy::Spin
    };
    let config = StressConfig::new(cli.ntasks, cli.producers, cli.consumers).with_retry(retry);

    let report = match stress::run(&config) {
        Ok(report) => report,
        Err(err) => {
            error!(%err, "stress run failed");
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };

    println!("Time: {:.3} ms", report.elapsed.as_secs_f64() * 1e3);
    println!("Checking result...");

    for mismatch in &report.mismatches {
        eprintln!("{mismatch}");
    }

    if report.is_ok() {
        println!("Ok. Done!");
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
