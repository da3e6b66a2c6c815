//! Sleep policies for contended workers.
//!
//! A worker that fails to take its locks asks its policy how long to sleep.
//! [`AdaptiveBackoff`] grows the delay on repeated contention, bounded by a
//! cap, shrinks it on progress, and scales the step by a moving average of
//! recent operation latency so slow meshes back off in proportion.

use std::fmt::Debug;
use std::time::Duration;

/// Longest sleep any policy hands out unless configured otherwise.
pub const DEFAULT_CAP: Duration = Duration::from_millis(1000);

/// Smoothing factor of the latency average.
const LATENCY_WEIGHT: f64 = 0.125;

/// Decides how long a contended worker sleeps.
pub trait BackoffPolicy: Debug + Send {
    /// Records how long the last operation took.
    fn observe(&mut self, latency: Duration);

    /// A lock request failed; returns how long to sleep before the next try.
    fn contended(&mut self) -> Duration;

    /// An operation completed without contention.
    fn progressed(&mut self);

    /// Sleep the policy would currently hand out.
    fn current(&self) -> Duration;

    /// Overrides the current sleep, e.g. to desynchronize livelocked workers.
    fn force(&mut self, sleep: Duration);
}

/// Latency-scaled additive increase, multiplicative decrease.
#[derive(Clone, Debug)]
pub struct AdaptiveBackoff {
    sleep: Duration,
    cap: Duration,
    latency: f64,
}

impl AdaptiveBackoff {
    /// A policy whose sleeps never exceed `cap`.
    #[must_use]
    pub const fn new(cap: Duration) -> Self {
        Self {
            sleep: Duration::ZERO,
            cap,
            latency: 0.0,
        }
    }

    /// Smoothed operation latency.
    #[must_use]
    pub fn average_latency(&self) -> Duration {
        Duration::from_secs_f64(self.latency)
    }
}

impl Default for AdaptiveBackoff {
    fn default() -> Self {
        Self::new(DEFAULT_CAP)
    }
}

impl BackoffPolicy for AdaptiveBackoff {
    fn observe(&mut self, latency: Duration) {
        let sample = latency.as_secs_f64();
        if sample.is_finite() {
            self.latency += LATENCY_WEIGHT * (sample - self.latency);
        }
    }

    fn contended(&mut self) -> Duration {
        let step = Duration::from_secs_f64(self.latency).max(Duration::from_millis(1));
        self.sleep = (self.sleep + step).min(self.cap);
        self.sleep
    }

    fn progressed(&mut self) {
        self.sleep /= 2;
    }

    fn current(&self) -> Duration {
        self.sleep
    }

    fn force(&mut self, sleep: Duration) {
        self.sleep = sleep.min(self.cap);
    }
}

/// Never sleeps. Useful for single-threaded runs and tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoBackoff;

impl BackoffPolicy for NoBackoff {
    fn observe(&mut self, _latency: Duration) {}

    fn contended(&mut self) -> Duration {
        Duration::ZERO
    }

    fn progressed(&mut self) {}

    fn current(&self) -> Duration {
        Duration::ZERO
    }

    fn force(&mut self, _sleep: Duration) {}
}
