//! The command word shared by the controller and the workers, and each
//! worker's acknowledgement of it.
//!
//! The controller stores a [`ThreadCommand`] together with a generation
//! number that changes on every issue; every worker, between transactions,
//! reads both and echoes them back. A command only takes effect once
//! [`Control::wait_for_threads`] sees every worker acknowledge that very
//! issue, so a pause never interrupts a transaction, and a status left over
//! from an earlier pause never counts for a later one.

use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Status bit set while a worker is in a backoff sleep.
const SLEEPING: u32 = 1 << 8;

/// Generations wrap here, so one fits above the command byte and the
/// sleeping bit of a status word.
const GENERATIONS: u32 = 1 << 23;

/// What the workers should be doing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ThreadCommand {
    /// Refine.
    #[default]
    Run = 0,
    /// Hold still; the mesh may be read.
    Pause = 1,
    /// Hold still until further notice.
    Wait = 2,
    /// Draw rough contours.
    RoughContour = 3,
    /// Prune rough contours.
    PruneContour = 4,
    /// Smooth pruned contours.
    SmoothContour = 5,
    /// Exit.
    Stop = 6,
}

impl ThreadCommand {
    const fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Run,
            1 => Self::Pause,
            2 => Self::Wait,
            3 => Self::RoughContour,
            4 => Self::PruneContour,
            5 => Self::SmoothContour,
            _ => Self::Stop,
        }
    }

    /// True for the three contour states.
    #[must_use]
    pub const fn is_contour(self) -> bool {
        matches!(self, Self::RoughContour | Self::PruneContour | Self::SmoothContour)
    }
}

/// One issue of a command.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Order {
    /// What to do.
    pub command: ThreadCommand,
    /// Which issue this is.
    pub generation: u32,
}

impl Order {
    const fn from_word(word: u32) -> Self {
        Self {
            command: ThreadCommand::from_u8((word & 0xff) as u8),
            generation: word >> 8,
        }
    }

    const fn word(self) -> u32 {
        self.generation << 8 | self.command as u32
    }
}

/// A worker's last published status.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorkerStatus {
    /// The order the worker is obeying.
    pub acknowledged: Order,
    /// True while the worker sleeps off contention or starvation.
    pub sleeping: bool,
}

/// Command word, per-worker statuses and pending re-sleeps.
#[derive(Debug)]
pub struct Control {
    order: AtomicU32,
    status: Vec<AtomicU32>,
    backoff_ms: Vec<AtomicU32>,
    resleep_ms: Vec<AtomicU32>,
}

impl Control {
    /// Control block for `threads` workers, commanded to run.
    ///
    /// Workers start out acknowledging [`ThreadCommand::Wait`] of
    /// generation 0 so a controller can tell when they have all come up.
    #[must_use]
    pub fn new(threads: usize) -> Self {
        let word = |v: u32| (0..threads).map(|_| AtomicU32::new(v)).collect();
        Self {
            order: AtomicU32::new(ThreadCommand::Run as u32),
            status: word(ThreadCommand::Wait as u32),
            backoff_ms: word(0),
            resleep_ms: word(0),
        }
    }

    /// Number of workers.
    #[must_use]
    pub fn threads(&self) -> usize {
        self.status.len()
    }

    /// The current order.
    #[must_use]
    pub fn order(&self) -> Order {
        Order::from_word(self.order.load(Ordering::Acquire))
    }

    /// The current command.
    #[must_use]
    pub fn command(&self) -> ThreadCommand {
        self.order().command
    }

    /// Issues `command` to every worker under a fresh generation.
    pub fn set(&self, command: ThreadCommand) -> Order {
        let mut issued = Order { command, generation: 0 };
        let _ = self.order.fetch_update(Ordering::AcqRel, Ordering::Acquire, |word| {
            let generation = (Order::from_word(word).generation + 1) % GENERATIONS;
            issued = Order { command, generation };
            Some(issued.word())
        });
        issued
    }

    /// Publishes the order `thread` is obeying.
    pub fn report(&self, thread: usize, order: Order, sleeping: bool) {
        let word = (order.generation % GENERATIONS) << 9
            | order.command as u32
            | if sleeping { SLEEPING } else { 0 };
        self.status[thread].store(word, Ordering::Release);
    }

    /// Publishes the backoff `thread` would currently sleep.
    pub fn report_backoff(&self, thread: usize, sleep: Duration) {
        let ms = u32::try_from(sleep.as_millis()).unwrap_or(u32::MAX);
        self.backoff_ms[thread].store(ms, Ordering::Relaxed);
    }

    /// Last status of `thread`.
    #[must_use]
    pub fn status(&self, thread: usize) -> WorkerStatus {
        let word = self.status[thread].load(Ordering::Acquire);
        WorkerStatus {
            acknowledged: Order {
                command: ThreadCommand::from_u8((word & 0xff) as u8),
                generation: word >> 9,
            },
            sleeping: word & SLEEPING != 0,
        }
    }

    /// True if every worker acknowledges `order`.
    #[must_use]
    pub fn all_acknowledge(&self, order: Order) -> bool {
        (0..self.threads()).all(|t| self.status(t).acknowledged == order)
    }

    /// Issues `command` and blocks until every worker acknowledges this
    /// issue of it, checking every `poll`.
    pub fn wait_for_threads(&self, command: ThreadCommand, poll: Duration) {
        let order = self.set(command);
        while !self.all_acknowledge(order) {
            thread::sleep(poll);
        }
    }

    /// Workers whose backoff is at least `threshold`.
    #[must_use]
    pub fn backing_off(&self, threshold: Duration) -> usize {
        let threshold = u32::try_from(threshold.as_millis()).unwrap_or(u32::MAX);
        self.backoff_ms
            .iter()
            .filter(|ms| ms.load(Ordering::Relaxed) >= threshold)
            .count()
    }

    /// Asks every worker to sleep the matching duration once.
    pub fn resleep(&self, sleeps: &[Duration]) {
        for (slot, sleep) in self.resleep_ms.iter().zip(sleeps) {
            let ms = u32::try_from(sleep.as_millis()).unwrap_or(u32::MAX);
            slot.store(ms, Ordering::Release);
        }
    }

    /// Takes the re-sleep requested for `thread`, if any.
    pub fn take_resleep(&self, thread: usize) -> Option<Duration> {
        let ms = self.resleep_ms[thread].swap(0, Ordering::AcqRel);
        (ms > 0).then(|| Duration::from_millis(u64::from(ms)))
    }
}
