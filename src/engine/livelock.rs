//! Livelock detection.
//!
//! Workers can keep each other busy without progress: every transaction
//! contends with another one that started at the same moment, and both
//! retry in step. The controller declares a livelock when coverage and the
//! recent adjustment RMS stay exactly the same for several polls while no
//! bucket is dirty and no worker is backing off. The cure is to make every
//! worker sleep once, for a random duration, so they fall out of step.

use std::time::Duration;

use rand::Rng;

/// Watches successive polls for a frozen mesh.
#[derive(Clone, Debug)]
pub struct LivelockDetector {
    polls: u32,
    streak: u32,
    last: Option<(f64, f64)>,
}

impl LivelockDetector {
    /// A detector that fires after `polls` unchanged polls.
    #[must_use]
    pub const fn new(polls: u32) -> Self {
        Self {
            polls,
            streak: 0,
            last: None,
        }
    }

    /// Consecutive qualifying polls so far.
    #[must_use]
    pub const fn streak(&self) -> u32 {
        self.streak
    }

    /// Feeds one poll. Returns true, and starts counting afresh, when a
    /// livelock is declared.
    ///
    /// `quiet` means every bucket is clean and no worker is backing off.
    pub fn observe(&mut self, coverage: f64, rms: f64, quiet: bool) -> bool {
        let now = (coverage, rms);
        let unchanged = self
            .last
            .is_some_and(|(c, r)| c.to_bits() == coverage.to_bits() && r.to_bits() == rms.to_bits());
        self.last = Some(now);
        if !(unchanged && quiet) {
            self.streak = 0;
            return false;
        }
        self.streak += 1;
        if self.streak < self.polls {
            return false;
        }
        self.streak = 0;
        true
    }

    /// Forgets history, e.g. after a stage change.
    pub fn reset(&mut self) {
        self.streak = 0;
        self.last = None;
    }
}

/// One random sleep per worker, uniform up to `cap`.
pub fn jitter<R: Rng + ?Sized>(rng: &mut R, threads: usize, cap: Duration) -> Vec<Duration> {
    let cap_ms = u64::try_from(cap.as_millis()).unwrap_or(u64::MAX).max(1);
    (0..threads)
        .map(|_| Duration::from_millis(rng.random_range(1..=cap_ms)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn fires_after_enough_frozen_polls() {
        let mut detector = LivelockDetector::new(3);
        assert!(!detector.observe(0.5, 0.1, true));
        assert!(!detector.observe(0.5, 0.1, true));
        assert!(!detector.observe(0.5, 0.1, true));
        assert!(detector.observe(0.5, 0.1, true));
        assert_eq!(detector.streak(), 0);
    }

    #[test]
    fn any_change_or_activity_resets_the_streak() {
        let mut detector = LivelockDetector::new(2);
        assert!(!detector.observe(0.5, 0.1, true));
        assert!(!detector.observe(0.5, 0.1, true));
        assert!(!detector.observe(0.6, 0.1, true));
        assert_eq!(detector.streak(), 0);
        assert!(!detector.observe(0.6, 0.1, false));
        assert!(!detector.observe(0.6, 0.1, true));
        assert_eq!(detector.streak(), 1);
        detector.reset();
        assert!(!detector.observe(0.6, 0.1, true));
        assert_eq!(detector.streak(), 0);
    }

    #[test]
    fn jitter_stays_within_the_cap() {
        let mut rng = StdRng::seed_from_u64(11);
        let sleeps = jitter(&mut rng, 8, Duration::from_millis(40));
        assert_eq!(sleeps.len(), 8);
        assert!(sleeps
            .iter()
            .all(|s| *s >= Duration::from_millis(1) && *s <= Duration::from_millis(40)));
    }
}
