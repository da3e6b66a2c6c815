//! Block task scheduler.
//!
//! Large least-squares assemblies are cut into chunks by [`block_sizes`] and
//! pushed onto one shared queue. Any worker may execute any queued task; the
//! worker that issued a job waits only for its own results, running stray
//! tasks from the queue while it waits, so no thread idles while work is
//! pending. Results come back tagged with their slot so the caller can
//! combine them in a fixed order, independent of which thread ran what.

use std::f64::consts::TAU;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::{select, unbounded, Receiver, Sender};

/// Dot counts below this are never split.
pub const BLOCK_STEP: usize = 1024;

/// Relative amplitude of the sinusoidal correction to the chunk curve.
const WOBBLE: f64 = 0.02;

/// A queued unit of work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Chunk sizes for `total` items: positive, summing to exactly `total`.
///
/// Below [`BLOCK_STEP`] the whole is one chunk. Otherwise there are about
/// `√(2·total / step)` chunks whose cumulative sums follow the inverse of the
/// triangular numbers, so sizes shrink roughly linearly: the first tasks
/// queued are the largest and the last ones, picked up by whichever workers
/// finish early, are small. A small sinusoidal term breaks up ties between
/// chunks of equal size.
#[must_use]
pub fn block_sizes(total: usize) -> Vec<usize> {
    if total == 0 {
        return Vec::new();
    }
    if total < BLOCK_STEP {
        return vec![total];
    }
    let chunks = ((2.0 * total as f64 / BLOCK_STEP as f64).sqrt().round() as usize).max(2);
    let mut sizes = Vec::with_capacity(chunks);
    let mut done = 0_usize;
    for k in 1..=chunks {
        let x = k as f64 / chunks as f64;
        let curve = 1.0 - (1.0 - x) * (1.0 - x) + WOBBLE * (TAU * x).sin() / TAU;
        let target = if k == chunks {
            total
        } else {
            ((total as f64 * curve).round() as usize).clamp(done, total)
        };
        if target > done {
            sizes.push(target - done);
            done = target;
        }
    }
    sizes
}

/// Shared task queue.
#[derive(Debug)]
pub struct TaskPool {
    sender: Sender<Task>,
    receiver: Receiver<Task>,
    issued: AtomicU64,
    stray: AtomicU64,
}

impl Default for TaskPool {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskPool {
    /// An empty pool.
    #[must_use]
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self {
            sender,
            receiver,
            issued: AtomicU64::new(0),
            stray: AtomicU64::new(0),
        }
    }

    /// Tasks waiting in the queue.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.receiver.len()
    }

    /// Tasks issued so far, and how many of those ran on a thread other than
    /// the issuer's own wait loop.
    #[must_use]
    pub fn counts(&self) -> (u64, u64) {
        (self.issued.load(Ordering::Relaxed), self.stray.load(Ordering::Relaxed))
    }

    /// Runs up to `max` queued tasks on the calling thread; returns how many
    /// ran.
    pub fn run_pending(&self, max: usize) -> usize {
        let mut ran = 0;
        while ran < max {
            let Ok(task) = self.receiver.try_recv() else { break };
            self.stray.fetch_add(1, Ordering::Relaxed);
            task();
            ran += 1;
        }
        ran
    }

    /// Queues one task per job and returns their results in job order.
    ///
    /// The caller executes queued tasks (its own or other workers') until
    /// all of its results are in.
    ///
    /// # Panics
    ///
    /// Re-raises, on the calling thread, a panic from any of the jobs.
    pub fn run_job<T, F>(&self, jobs: Vec<F>) -> Vec<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let count = jobs.len();
        let (results_tx, results_rx) = unbounded();
        for (slot, job) in jobs.into_iter().enumerate() {
            let results_tx = results_tx.clone();
            let task: Task = Box::new(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(job));
                let _ = results_tx.send((slot, outcome));
            });
            // The pool owns a receiver, so the queue never disconnects.
            let _ = self.sender.send(task);
        }
        drop(results_tx);
        self.issued.fetch_add(count as u64, Ordering::Relaxed);

        let mut results: Vec<Option<T>> = (0..count).map(|_| None).collect();
        let mut received = 0;
        while received < count {
            select! {
                recv(results_rx) -> msg => {
                    let Ok((slot, outcome)) = msg else { break };
                    match outcome {
                        Ok(value) => results[slot] = Some(value),
                        Err(payload) => panic::resume_unwind(payload),
                    }
                    received += 1;
                }
                recv(self.receiver) -> task => {
                    if let Ok(task) = task {
                        task();
                    }
                }
            }
        }
        results.into_iter().flatten().collect()
    }
}
