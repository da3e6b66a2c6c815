//! The refinement engine: bootstrap, worker pool and stage control.
//!
//! Refinement proceeds in stages. The first stage tolerance is the target
//! doubled until it covers the worst residual left after the bootstrap
//! adjustment; each finished stage halves it. A stage finishes when every
//! triangle is within its tolerance and all coverage buckets are clean, or,
//! above the target, when every triangle is within tolerance or too small to
//! subdivide. Between stages the workers are paused, the spatial index is
//! rebuilt and the stage observer runs.
//!
//! The smallest triangle subdivided in a stage has area
//! `(stage / target)² / densify / density`, so early stages stay coarse.
//!
//! # Example
//!
//! ```rust
//! use tinfit::engine::config::EngineConfigBuilder;
//! use tinfit::engine::controller::Engine;
//! use tinfit::geometry::point::Xyz;
//!
//! let cloud: Vec<Xyz> = (0..400)
//!     .map(|i| {
//!         let (x, y) = (f64::from(i % 20), f64::from(i / 20));
//!         Xyz::new(x, y, 0.5 * x - 0.25 * y)
//!     })
//!     .collect();
//! let config = EngineConfigBuilder::default()
//!     .tolerance(0.01)
//!     .threads(2_usize)
//!     .seed(1_u64)
//!     .build()
//!     .unwrap();
//! let mut engine = Engine::new(&cloud, config).unwrap();
//! let report = engine.run().unwrap();
//! assert!(report.converged);
//! assert!(report.worst_residual <= 0.01);
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::concurrency::backoff::AdaptiveBackoff;
use crate::core::bootstrap::{bootstrap, Bootstrap, BootstrapError, ClipLimits};
use crate::core::checkpoint::{Checkpoint, CheckpointError};
use crate::core::mesh::Mesh;
use crate::engine::command::{Control, ThreadCommand};
use crate::engine::config::EngineConfig;
use crate::engine::livelock::{jitter, LivelockDetector};
use crate::engine::worker::{ContourWorker, Worker};
use crate::geometry::angle::Angle;
use crate::geometry::point::Xyz;
use crate::refine::refiner::Refiner;

/// Backoff at or above which a worker counts as sleeping for livelock
/// detection.
const MEANINGFUL_SLEEP: Duration = Duration::from_millis(2);

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Why the engine could not start or finish.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The cloud cannot be meshed.
    #[error("bootstrap failed: {source}")]
    Bootstrap {
        /// The underlying failure.
        #[from]
        source: BootstrapError,
    },

    /// The checkpoint to resume from is unusable.
    #[error("cannot resume: {source}")]
    Checkpoint {
        /// The underlying failure.
        #[from]
        source: CheckpointError,
    },

    /// The operating system refused a worker thread.
    #[error("failed to spawn worker {thread}: {source}")]
    Spawn {
        /// Index of the worker.
        thread: usize,
        /// The OS error.
        source: std::io::Error,
    },

    /// A worker died, which only a topology fault in a debug build causes.
    #[error("worker {thread} panicked")]
    WorkerPanicked {
        /// Index of the worker.
        thread: usize,
    },
}

// =============================================================================
// REPORTS
// =============================================================================

/// Passed to the stage observer at the end of each stage.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StageEvent {
    /// Tolerance of the stage just finished.
    pub tolerance: f64,
    /// Fraction of the area within that tolerance.
    pub coverage: f64,
    /// Triangles in the mesh.
    pub triangles: usize,
}

/// Callback run between stages with the workers paused.
pub type StageObserver = Box<dyn FnMut(&StageEvent, &Mesh) + Send>;

/// Outcome of [`Engine::run`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RefineReport {
    /// True if the target stage finished.
    pub converged: bool,
    /// Tolerance of the last stage worked on.
    pub final_tolerance: f64,
    /// Fraction of the area within the final tolerance.
    pub coverage: f64,
    /// Triangles in the mesh.
    pub triangles: usize,
    /// Points in the mesh.
    pub points: usize,
    /// Largest residual of any dot.
    pub worst_residual: f64,
    /// Recent adjustment RMS, if anything was adjusted.
    pub rms_adjustment: Option<f64>,
    /// Wall-clock time of the run.
    pub elapsed: Duration,
    /// Livelocks declared.
    pub livelocks: u32,
}

/// Read-only view of a running engine's progress, for another thread.
#[derive(Clone, Debug)]
pub struct Progress {
    refiner: Arc<Refiner>,
    coverage: Arc<AtomicU64>,
}

impl Progress {
    /// Tolerance of the current stage.
    #[must_use]
    pub fn stage_tolerance(&self) -> f64 {
        self.refiner.stage_tolerance()
    }

    /// Fraction of the area within the stage tolerance at the last poll.
    #[must_use]
    pub fn coverage(&self) -> f64 {
        f64::from_bits(self.coverage.load(Ordering::Acquire))
    }
}

/// How the control loop ended.
struct Ending {
    converged: bool,
    stage: f64,
    coverage: f64,
    livelocks: u32,
}

// =============================================================================
// STAGE ARITHMETIC
// =============================================================================

/// The target doubled until it is at least `initial_error`.
#[must_use]
pub fn first_stage(target: f64, initial_error: f64) -> f64 {
    let mut stage = target;
    while stage < initial_error && stage.is_finite() {
        stage *= 2.0;
    }
    stage
}

/// Smallest area subdivided at `stage`.
#[must_use]
pub fn min_area(stage: f64, target: f64, densify: f64, density: f64) -> f64 {
    let ratio = stage / target;
    ratio * ratio / densify / density
}

// =============================================================================
// ENGINE
// =============================================================================

/// Owns the shared state and drives the worker pool.
pub struct Engine {
    config: EngineConfig,
    refiner: Arc<Refiner>,
    control: Arc<Control>,
    density: f64,
    rng: StdRng,
    coverage: Arc<AtomicU64>,
    observer: Option<StageObserver>,
    contour: Option<Arc<dyn ContourWorker>>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("stage", &self.refiner.stage_tolerance())
            .field("density", &self.density)
            .field("observer", &self.observer.is_some())
            .field("contour", &self.contour.is_some())
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Bootstraps `cloud` and fits the initial octagon.
    ///
    /// No thread is started until [`run`](Self::run).
    ///
    /// # Errors
    ///
    /// [`EngineError::Bootstrap`] for an empty, non-finite or arealess
    /// cloud.
    pub fn new(cloud: &[Xyz], config: EngineConfig) -> Result<Self, EngineError> {
        let mut rng = config
            .seed
            .map_or_else(StdRng::from_os_rng, StdRng::seed_from_u64);
        let orientation = Angle(rng.random::<i32>());
        let Bootstrap {
            topology,
            density,
            clip,
            ..
        } = bootstrap(cloud, orientation)?;
        let engine = Self::assemble(Mesh::new(topology), config, density, clip, rng);
        let initial_error = engine.refiner.adjust_all();
        let stage = first_stage(engine.config.tolerance, initial_error);
        engine.enter_stage(stage);
        tracing::info!(
            dots = cloud.len(),
            initial_error,
            stage,
            "bootstrapped"
        );
        Ok(engine)
    }

    /// Continues from a checkpoint, at its stage tolerance or the target,
    /// whichever is larger.
    ///
    /// # Errors
    ///
    /// [`EngineError::Checkpoint`] if the checkpoint does not verify, or
    /// [`EngineError::Bootstrap`] if it holds no dots or no area.
    pub fn resume(checkpoint: &Checkpoint, config: EngineConfig) -> Result<Self, EngineError> {
        let mesh = Mesh::from_checkpoint(checkpoint)?;
        let (area, dots, lo, hi) = {
            let topo = mesh.read();
            let area: f64 = topo.triangles().map(|(_, t)| t.area()).sum();
            let (mut lo, mut hi) = (f64::INFINITY, f64::NEG_INFINITY);
            for (_, t) in topo.triangles() {
                for d in t.dots() {
                    lo = lo.min(d.z);
                    hi = hi.max(d.z);
                }
            }
            (area, topo.dot_count(), lo, hi)
        };
        if dots == 0 {
            return Err(BootstrapError::EmptyCloud.into());
        }
        if area.is_nan() || area <= 0.0 {
            return Err(BootstrapError::NoArea.into());
        }
        let rng = config
            .seed
            .map_or_else(StdRng::from_os_rng, StdRng::seed_from_u64);
        let density = dots as f64 / area;
        let engine = Self::assemble(mesh, config, density, ClipLimits::around(lo, hi), rng);
        let stage = if checkpoint.stage_tolerance.is_finite() {
            checkpoint.stage_tolerance.max(engine.config.tolerance)
        } else {
            engine.config.tolerance
        };
        engine.enter_stage(stage);
        tracing::info!(dots, stage, "resumed from checkpoint");
        Ok(engine)
    }

    fn assemble(
        mesh: Mesh,
        config: EngineConfig,
        density: f64,
        clip: ClipLimits,
        rng: StdRng,
    ) -> Self {
        let refiner = Refiner::new(
            Arc::new(mesh),
            config.threads,
            config.buckets_per_thread,
            config.params.clone(),
            clip,
            config.tolerance,
        );
        Self {
            control: Arc::new(Control::new(config.threads)),
            refiner: Arc::new(refiner),
            density,
            rng,
            coverage: Arc::new(AtomicU64::new(0.0_f64.to_bits())),
            observer: None,
            contour: None,
            config,
        }
    }

    /// Installs a callback run at the end of every stage.
    #[must_use]
    pub fn on_stage(mut self, observer: impl FnMut(&StageEvent, &Mesh) + Send + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    /// Installs contour work run by every worker after convergence.
    #[must_use]
    pub fn with_contour_worker(mut self, contour: Arc<dyn ContourWorker>) -> Self {
        self.contour = Some(contour);
        self
    }

    /// The configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Shared refinement state.
    #[must_use]
    pub const fn refiner(&self) -> &Arc<Refiner> {
        &self.refiner
    }

    /// The mesh.
    #[must_use]
    pub fn mesh(&self) -> &Arc<Mesh> {
        self.refiner.mesh()
    }

    /// The command word and worker statuses.
    #[must_use]
    pub const fn control(&self) -> &Arc<Control> {
        &self.control
    }

    /// Dots per unit area.
    #[must_use]
    pub const fn density(&self) -> f64 {
        self.density
    }

    /// A handle for watching progress from another thread.
    #[must_use]
    pub fn progress(&self) -> Progress {
        Progress {
            refiner: Arc::clone(&self.refiner),
            coverage: Arc::clone(&self.coverage),
        }
    }

    /// A checkpoint of the mesh as it stands.
    #[must_use]
    pub fn checkpoint(&self) -> Checkpoint {
        self.mesh()
            .to_checkpoint(self.config.tolerance, self.refiner.stage_tolerance())
    }

    fn enter_stage(&self, stage: f64) {
        let area = min_area(stage, self.config.tolerance, self.config.params.densify, self.density);
        self.refiner.set_stage(stage, area);
    }

    /// Refines until the target stage finishes, a stage at the target
    /// stalls, or the time limit passes.
    ///
    /// May be called again to continue an unconverged run.
    ///
    /// # Errors
    ///
    /// [`EngineError::Spawn`] if a worker cannot be started, or
    /// [`EngineError::WorkerPanicked`] if one dies.
    pub fn run(&mut self) -> Result<RefineReport, EngineError> {
        let started = Instant::now();
        self.control.set(ThreadCommand::Run);
        let mut handles = Vec::with_capacity(self.config.threads);
        for thread in 0..self.config.threads {
            let worker = Worker::new(
                thread,
                Arc::clone(&self.refiner),
                Arc::clone(&self.control),
                self.contour.clone(),
                Box::new(AdaptiveBackoff::new(self.config.backoff_cap)),
                self.config.poll_interval,
            );
            let spawned = thread::Builder::new()
                .name(format!("tinfit-worker-{thread}"))
                .spawn(move || worker.run());
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(source) => {
                    let _ = self.shut_down(handles);
                    return Err(EngineError::Spawn { thread, source });
                }
            }
        }

        let driven = self.drive(&handles, started);
        let driven = match driven {
            Ok(ending) if ending.converged && self.contour.is_some() => {
                self.contour_pass(&handles).map(|()| ending)
            }
            other => other,
        };
        let joined = self.shut_down(handles);
        let ending = driven?;
        joined?;

        let worst_residual = self.mesh().worst_residual();
        let topo = self.mesh().read();
        let report = RefineReport {
            converged: ending.converged,
            final_tolerance: ending.stage,
            coverage: ending.coverage,
            triangles: topo.number_of_triangles(),
            points: topo.number_of_points(),
            worst_residual,
            rms_adjustment: self.refiner.log().recent_rms(),
            elapsed: started.elapsed(),
            livelocks: ending.livelocks,
        };
        drop(topo);
        tracing::info!(
            converged = report.converged,
            tolerance = report.final_tolerance,
            triangles = report.triangles,
            worst = report.worst_residual,
            elapsed = ?report.elapsed,
            "refinement finished"
        );
        Ok(report)
    }

    /// The control loop.
    fn drive(&mut self, handles: &[JoinHandle<()>], started: Instant) -> Result<Ending, EngineError> {
        let target = self.config.tolerance;
        let mut livelock = LivelockDetector::new(self.config.livelock_polls);
        let mut livelocks = 0;
        let mut last = None;
        let mut stalled = 0;
        loop {
            thread::sleep(self.config.poll_interval);
            check_workers(handles)?;
            let stage = self.refiner.stage_tolerance();
            let coverage = {
                let topo = self.mesh().read();
                self.refiner
                    .buckets()
                    .refresh(&topo, stage, self.refiner.min_area())
            };
            self.coverage.store(coverage.done.to_bits(), Ordering::Release);
            let rms = self.refiner.log().recent_rms().unwrap_or(0.0);
            tracing::trace!(stage, done = coverage.done, rms, "poll");

            let quiet = coverage.all_clean && self.control.backing_off(MEANINGFUL_SLEEP) == 0;
            if livelock.observe(coverage.done, rms, quiet) {
                livelocks += 1;
                tracing::warn!(stage, coverage = coverage.done, "livelock; desynchronizing workers");
                let sleeps = jitter(&mut self.rng, self.config.threads, self.config.backoff_cap);
                self.control.resleep(&sleeps);
            }

            let now = (coverage.done.to_bits(), rms.to_bits());
            if last == Some(now) {
                stalled += 1;
            } else {
                stalled = 0;
                last = Some(now);
            }

            if self.config.time_limit.is_some_and(|limit| started.elapsed() >= limit) {
                tracing::warn!(stage, coverage = coverage.done, "time limit reached");
                self.command_all(ThreadCommand::Pause, handles)?;
                return Ok(Ending {
                    converged: false,
                    stage,
                    coverage: coverage.done,
                    livelocks,
                });
            }

            let finished = (coverage.done >= 1.0 && coverage.all_clean)
                || (coverage.done_or_small >= 1.0 && stage > target);
            let stalled_out = stalled >= self.config.stall_polls;
            if !(finished || stalled_out) {
                continue;
            }

            self.command_all(ThreadCommand::Pause, handles)?;
            if finished {
                self.mesh().rebuild_index();
                let event = StageEvent {
                    tolerance: stage,
                    coverage: coverage.done,
                    triangles: self.mesh().read().number_of_triangles(),
                };
                if let Some(observer) = self.observer.as_mut() {
                    observer(&event, self.refiner.mesh());
                }
                tracing::info!(stage, triangles = event.triangles, "stage finished");
            } else {
                tracing::warn!(stage, coverage = coverage.done, "stage stalled");
            }
            if stage <= target {
                return Ok(Ending {
                    converged: finished,
                    stage,
                    coverage: coverage.done,
                    livelocks,
                });
            }

            self.enter_stage((stage / 2.0).max(target));
            livelock.reset();
            last = None;
            stalled = 0;
            tracing::debug!(stage = self.refiner.stage_tolerance(), "next stage");
            self.control.set(ThreadCommand::Run);
        }
    }

    /// Takes the workers through the three contour states in turn.
    fn contour_pass(&self, handles: &[JoinHandle<()>]) -> Result<(), EngineError> {
        for state in [
            ThreadCommand::RoughContour,
            ThreadCommand::PruneContour,
            ThreadCommand::SmoothContour,
        ] {
            self.command_all(state, handles)?;
        }
        Ok(())
    }

    /// Issues `command` and waits until every worker acknowledges it.
    fn command_all(&self, command: ThreadCommand, handles: &[JoinHandle<()>]) -> Result<(), EngineError> {
        let order = self.control.set(command);
        while !self.control.all_acknowledge(order) {
            check_workers(handles)?;
            thread::sleep(self.config.poll_interval / 4);
        }
        Ok(())
    }

    fn shut_down(&self, handles: Vec<JoinHandle<()>>) -> Result<(), EngineError> {
        self.control.set(ThreadCommand::Stop);
        let mut result = Ok(());
        for (thread, handle) in handles.into_iter().enumerate() {
            if handle.join().is_err() && result.is_ok() {
                result = Err(EngineError::WorkerPanicked { thread });
            }
        }
        result
    }
}

/// Fails if any worker has exited; they only exit on stop or panic.
fn check_workers(handles: &[JoinHandle<()>]) -> Result<(), EngineError> {
    match handles.iter().position(JoinHandle::is_finished) {
        Some(thread) => Err(EngineError::WorkerPanicked { thread }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::config::EngineConfigBuilder;
    use approx::assert_relative_eq;
    use std::sync::Mutex;

    fn grid(surface: impl Fn(f64, f64) -> f64, side: u32) -> Vec<Xyz> {
        (0..side * side)
            .map(|i| {
                let (x, y) = (f64::from(i % side), f64::from(i / side));
                Xyz::new(x, y, surface(x, y))
            })
            .collect()
    }

    fn config(tolerance: f64, threads: usize) -> EngineConfig {
        EngineConfigBuilder::default()
            .tolerance(tolerance)
            .threads(threads)
            .seed(42_u64)
            .poll_interval(Duration::from_millis(5))
            .time_limit(Duration::from_secs(60))
            .build()
            .unwrap()
    }

    #[test]
    fn stage_arithmetic() {
        assert_relative_eq!(first_stage(0.1, 0.0), 0.1);
        assert_relative_eq!(first_stage(0.1, 0.1), 0.1);
        assert_relative_eq!(first_stage(0.1, 0.75), 0.8);
        assert_relative_eq!(min_area(0.8, 0.1, 1.0, 4.0), 16.0);
        assert_relative_eq!(min_area(0.4, 0.1, 2.0, 4.0), 2.0);
    }

    #[test]
    fn coincident_points_never_start_workers() {
        let cloud = vec![Xyz::new(1.0, 1.0, 1.0); 10];
        let err = Engine::new(&cloud, config(0.1, 2)).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Bootstrap {
                source: BootstrapError::NoArea
            }
        ));
    }

    #[test]
    fn stages_halve_down_to_the_target() {
        let cloud = grid(|x, y| 0.02 * (x - 7.0).powi(2) + 0.01 * x * y, 16);
        let events = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&events);
        let mut engine = Engine::new(&cloud, config(0.1, 2))
            .unwrap()
            .on_stage(move |event, mesh| {
                assert_eq!(mesh.read().dot_count(), 256);
                seen.lock().unwrap().push(*event);
            });
        let report = engine.run().unwrap();
        assert!(report.converged, "{report:?}");
        assert!(report.worst_residual <= 0.1);
        assert_relative_eq!(report.final_tolerance, 0.1);

        let events = events.lock().unwrap();
        assert_relative_eq!(events.last().unwrap().tolerance, 0.1);
        for pair in events.windows(2) {
            assert_relative_eq!(pair[1].tolerance, pair[0].tolerance / 2.0);
        }
        let last = engine.control().order();
        assert_eq!(last.command, ThreadCommand::Stop);
        assert!(engine.control().all_acknowledge(last));
    }

    #[test]
    fn checkpoints_resume_where_they_left_off() {
        let cloud = grid(|x, y| (x * 0.3).sin() + 0.1 * y, 12);
        let mut engine = Engine::new(&cloud, config(0.1, 1)).unwrap();
        let before = engine.run().unwrap();
        let saved = engine.checkpoint();

        let mut resumed = Engine::resume(&saved, config(0.1, 1)).unwrap();
        assert_relative_eq!(resumed.refiner().stage_tolerance(), 0.1);
        assert_eq!(resumed.mesh().read().number_of_triangles(), before.triangles);
        let after = resumed.run().unwrap();
        assert!(after.converged);
        assert!(after.worst_residual <= 0.1);
    }

    #[test]
    fn contour_states_reach_every_worker() {
        struct Count(Mutex<Vec<(usize, ThreadCommand)>>);
        impl ContourWorker for Count {
            fn contour(&self, thread: usize, state: ThreadCommand, _mesh: &Mesh) {
                self.0.lock().unwrap().push((thread, state));
            }
        }
        let hook = Arc::new(Count(Mutex::new(Vec::new())));
        let cloud = grid(|x, _| x, 8);
        let mut engine = Engine::new(&cloud, config(0.1, 3))
            .unwrap()
            .with_contour_worker(hook.clone());
        assert!(engine.run().unwrap().converged);
        let calls = hook.0.lock().unwrap();
        assert_eq!(calls.len(), 9);
        for state in [
            ThreadCommand::RoughContour,
            ThreadCommand::PruneContour,
            ThreadCommand::SmoothContour,
        ] {
            assert_eq!(calls.iter().filter(|(_, s)| *s == state).count(), 3);
        }
    }
}
