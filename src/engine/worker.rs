//! The worker loop.
//!
//! Each worker owns a position in the edge array and one in the triangle
//! array and, while the command is [`ThreadCommand::Run`], advances both by
//! its own stride and runs [`Refiner::edgeop`] then [`Refiner::triop`].
//! Contention backs off through a [`BackoffPolicy`]; a full lap of the
//! triangles without any change means there is nothing left to do at this
//! stage, and the worker rests for a controller poll. Sleeping workers first
//! help with queued adjustment blocks.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::concurrency::backoff::BackoffPolicy;
use crate::core::handles::{EdgeId, TriangleId};
use crate::core::mesh::Mesh;
use crate::engine::command::{Control, Order, ThreadCommand};
use crate::engine::strides::Strides;
use crate::refine::refiner::{OpOutcome, Refiner};

/// Work done by collaborators while the workers are in a contour state.
///
/// Called once per worker each time a contour state is entered, before the
/// worker acknowledges it. The mesh is not being refined meanwhile.
pub trait ContourWorker: Send + Sync {
    /// Does `thread`'s share of `state`.
    fn contour(&self, thread: usize, state: ThreadCommand, mesh: &Mesh);
}

/// One refinement thread.
pub(crate) struct Worker {
    thread: usize,
    refiner: Arc<Refiner>,
    control: Arc<Control>,
    contour: Option<Arc<dyn ContourWorker>>,
    backoff: Box<dyn BackoffPolicy>,
    strides: Strides,
    order: Order,
    poll: Duration,
    edge: usize,
    triangle: usize,
    idle: usize,
}

impl Worker {
    pub(crate) fn new(
        thread: usize,
        refiner: Arc<Refiner>,
        control: Arc<Control>,
        contour: Option<Arc<dyn ContourWorker>>,
        backoff: Box<dyn BackoffPolicy>,
        poll: Duration,
    ) -> Self {
        let order = control.order();
        Self {
            thread,
            refiner,
            control,
            contour,
            backoff,
            strides: Strides::new(thread),
            order,
            poll,
            edge: thread,
            triangle: thread,
            idle: 0,
        }
    }

    /// Obeys the command word until told to stop.
    pub(crate) fn run(mut self) {
        let mut last = None;
        loop {
            self.order = self.control.order();
            let command = self.order.command;
            match command {
                ThreadCommand::Stop => {
                    self.control.report(self.thread, self.order, false);
                    break;
                }
                ThreadCommand::Run => {
                    self.control.report(self.thread, self.order, false);
                    self.step();
                }
                ThreadCommand::Pause | ThreadCommand::Wait => {
                    self.control.report(self.thread, self.order, false);
                    thread::sleep(self.poll / 4);
                }
                ThreadCommand::RoughContour
                | ThreadCommand::PruneContour
                | ThreadCommand::SmoothContour => {
                    if last != Some(command) {
                        if let Some(hook) = &self.contour {
                            hook.contour(self.thread, command, self.refiner.mesh());
                        }
                    }
                    self.control.report(self.thread, self.order, false);
                    thread::sleep(self.poll / 4);
                }
            }
            last = Some(command);
        }
        tracing::trace!(thread = self.thread, "worker stopped");
    }

    /// One edge operation and one triangle operation.
    fn step(&mut self) {
        if let Some(sleep) = self.control.take_resleep(self.thread) {
            self.backoff.force(sleep);
            self.rest(self.backoff.current());
            return;
        }
        let (edges, triangles) = {
            let topo = self.refiner.mesh().read();
            (topo.number_of_edges(), topo.number_of_triangles())
        };
        if triangles == 0 {
            self.rest(self.poll);
            return;
        }
        self.edge = self.strides.advance(self.edge, edges);
        self.triangle = self.strides.advance(self.triangle, triangles);

        let started = Instant::now();
        let outcomes = [
            self.refiner.edgeop(self.thread, EdgeId::new(self.edge)),
            self.refiner.triop(self.thread, TriangleId::new(self.triangle)),
        ];
        self.backoff.observe(started.elapsed());

        if outcomes.iter().any(|o| o.is_contended()) {
            let sleep = self.backoff.contended();
            self.rest(sleep);
        } else if outcomes.iter().any(|o| o.is_changed()) {
            self.backoff.progressed();
            self.idle = 0;
        } else {
            debug_assert!(outcomes.iter().all(|&o| o == OpOutcome::Unchanged));
            self.idle += 1;
            if self.idle > triangles {
                self.idle = 0;
                self.rest(self.poll);
            }
        }
        self.control.report_backoff(self.thread, self.backoff.current());
    }

    /// Helps with queued blocks, then sleeps whatever is left of `sleep`.
    fn rest(&self, sleep: Duration) {
        let started = Instant::now();
        self.control.report(self.thread, self.order, true);
        let _ = self.refiner.tasks().run_pending(usize::MAX);
        if let Some(left) = sleep.checked_sub(started.elapsed()) {
            thread::sleep(left);
        }
        self.control.report(self.thread, self.order, false);
    }
}
