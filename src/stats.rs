//! Run-wide shared state and statistics.
//!
//! Workers keep their own counters and only ever touch the shared record
//! through [`RunState`]: the failure count and the high/low latency
//! watermarks, all guarded by a single mutex held just for the update.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Counters a single worker accumulates privately.
#[derive(Debug, Clone, Default)]
pub struct WorkerStats {
    /// The worker's id.
    pub id: usize,
    /// URLs resolved successfully (after redirect/auth follow-up).
    pub hits: u64,
    /// Entity bytes received, summed over every hop.
    pub bytes: u64,
    /// Transaction time, summed over every hop.
    pub elapsed: Duration,
    /// Transactions answered below 400, plus 401 and 407.
    pub code_ok: u64,
    /// Transactions answered 400 and up, except 401 and 407.
    pub code_fail: u64,
    /// Exact `200` answers.
    pub ok200: u64,
    /// Slowest transaction this worker saw.
    pub longest: Duration,
    /// Fastest transaction this worker saw.
    pub shortest: Option<Duration>,
}

impl WorkerStats {
    pub(crate) fn new(id: usize) -> WorkerStats {
        WorkerStats {
            id,
            ..WorkerStats::default()
        }
    }

    pub(crate) fn observe(&mut self, elapsed: Duration) {
        if elapsed > self.longest {
            self.longest = elapsed;
        }
        if self.shortest.map_or(true, |s| elapsed < s) {
            self.shortest = Some(elapsed);
        }
    }
}

#[derive(Debug, Default)]
struct Marks {
    failed: u64,
    high: Duration,
    low: Option<Duration>,
}

/// The run clock plus the only mutable state shared between workers.
#[derive(Debug)]
pub(crate) struct RunState {
    started: Instant,
    deadline: Option<Duration>,
    budget: u64,
    marks: Mutex<Marks>,
}

impl RunState {
    pub(crate) fn new(deadline: Option<Duration>, budget: u64) -> RunState {
        RunState {
            started: Instant::now(),
            deadline,
            budget,
            marks: Mutex::new(Marks::default()),
        }
    }

    pub(crate) fn deadline_reached(&self) -> bool {
        matches!(self.deadline, Some(limit) if self.started.elapsed() >= limit)
    }

    pub(crate) fn record_failure(&self) -> u64 {
        let mut marks = self.marks.lock().unwrap();
        marks.failed += 1;
        marks.failed
    }

    pub(crate) fn budget_exceeded(&self) -> bool {
        self.budget > 0 && self.marks.lock().unwrap().failed >= self.budget
    }

    pub(crate) fn failed(&self) -> u64 {
        self.marks.lock().unwrap().failed
    }

    pub(crate) fn observe(&self, elapsed: Duration) {
        let mut marks = self.marks.lock().unwrap();
        if elapsed > marks.high {
            marks.high = elapsed;
        }
        if marks.low.map_or(true, |low| elapsed < low) {
            marks.low = Some(elapsed);
        }
    }

    pub(crate) fn watermarks(&self) -> (Duration, Duration) {
        let marks = self.marks.lock().unwrap();
        (marks.high, marks.low.unwrap_or(Duration::ZERO))
    }
}

/// The folded outcome of a whole run.
#[derive(Debug)]
pub struct RunReport {
    /// URLs resolved successfully, across all workers.
    pub transactions: u64,
    /// `code_ok` transactions as a percentage of all classified ones.
    pub availability: f64,
    /// Wall-clock duration of the run.
    pub elapsed: Duration,
    /// Entity bytes received.
    pub bytes: u64,
    /// Mean transaction time.
    pub response_time: Duration,
    /// Successful URLs per wall-clock second.
    pub transaction_rate: f64,
    /// Received megabytes per wall-clock second.
    pub throughput: f64,
    /// Mean number of simultaneously busy workers.
    pub concurrency: f64,
    /// Transactions classified okay.
    pub code_ok: u64,
    /// Globally counted failures (transport, 5xx, exhausted retries).
    pub failed: u64,
    /// Exact `200` answers.
    pub ok200: u64,
    /// Slowest transaction of the run.
    pub longest: Duration,
    /// Fastest transaction of the run.
    pub shortest: Duration,
    /// True when the failure budget ended the run early.
    pub aborted: bool,
    /// The per-worker breakdown.
    pub workers: Vec<WorkerStats>,
}

impl RunReport {
    pub(crate) fn assemble(
        workers: Vec<WorkerStats>,
        state: &RunState,
        wall: Duration,
        aborted: bool,
    ) -> RunReport {
        let hits: u64 = workers.iter().map(|w| w.hits).sum();
        let bytes: u64 = workers.iter().map(|w| w.bytes).sum();
        let busy: Duration = workers.iter().map(|w| w.elapsed).sum();
        let code_ok: u64 = workers.iter().map(|w| w.code_ok).sum();
        let code_fail: u64 = workers.iter().map(|w| w.code_fail).sum();
        let ok200: u64 = workers.iter().map(|w| w.ok200).sum();
        let (longest, shortest) = state.watermarks();

        let wall_secs = wall.as_secs_f64();
        let classified = code_ok + code_fail;
        RunReport {
            transactions: hits,
            availability: if classified == 0 {
                0.0
            } else {
                code_ok as f64 * 100.0 / classified as f64
            },
            elapsed: wall,
            bytes,
            response_time: if hits == 0 {
                Duration::ZERO
            } else {
                busy / hits as u32
            },
            transaction_rate: if wall_secs > 0.0 {
                hits as f64 / wall_secs
            } else {
                0.0
            },
            throughput: if wall_secs > 0.0 {
                bytes as f64 / (1024.0 * 1024.0) / wall_secs
            } else {
                0.0
            },
            concurrency: if wall_secs > 0.0 {
                busy.as_secs_f64() / wall_secs
            } else {
                0.0
            },
            code_ok,
            failed: state.failed(),
            ok200,
            longest,
            shortest,
            aborted,
            workers,
        }
    }
}
