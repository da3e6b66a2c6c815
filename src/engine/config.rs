//! Engine configuration.
//!
//! [`EngineConfig`] is assembled with the derived [`EngineConfigBuilder`];
//! only the target tolerance is required. The build step rejects values no
//! run could use.
//!
//! # Example
//!
//! ```rust
//! use tinfit::engine::config::EngineConfigBuilder;
//!
//! let config = EngineConfigBuilder::default()
//!     .tolerance(0.05)
//!     .threads(4_usize)
//!     .seed(7_u64)
//!     .build()
//!     .unwrap();
//! assert_eq!(config.threads, 4);
//! assert!(EngineConfigBuilder::default().tolerance(-1.0).build().is_err());
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::concurrency::backoff::DEFAULT_CAP;
use crate::refine::refiner::RefineParams;

/// Fewest lock buckets per worker; fewer makes unrelated transactions
/// collide on bucket mutexes.
pub const MIN_BUCKETS_PER_THREAD: usize = 33;

fn default_threads() -> usize {
    std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
}

/// Parameters of one refinement run.
#[derive(Builder, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[builder(build_fn(validate = "Self::validate"))]
pub struct EngineConfig {
    /// Target vertical tolerance.
    pub tolerance: f64,
    /// Worker threads.
    #[builder(default = "default_threads()")]
    pub threads: usize,
    /// Lock buckets per worker.
    #[builder(default = "64")]
    pub buckets_per_thread: usize,
    /// Seed for the bootstrap orientation and livelock jitter; entropy if
    /// unset.
    #[builder(setter(strip_option), default)]
    pub seed: Option<u64>,
    /// Controller polling period.
    #[builder(default = "Duration::from_millis(20)")]
    pub poll_interval: Duration,
    /// Polls without any change in coverage or adjustment before a stage is
    /// abandoned.
    #[builder(default = "1500")]
    pub stall_polls: u32,
    /// Unchanged polls, with every bucket clean and no worker backing off,
    /// before a livelock is declared.
    #[builder(default = "5")]
    pub livelock_polls: u32,
    /// Wall-clock limit of the whole run.
    #[builder(setter(strip_option), default)]
    pub time_limit: Option<Duration>,
    /// Longest backoff sleep.
    #[builder(default = "DEFAULT_CAP")]
    pub backoff_cap: Duration,
    /// Operator tunables.
    #[builder(default)]
    pub params: RefineParams,
}

impl EngineConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if let Some(tolerance) = self.tolerance {
            if !(tolerance.is_finite() && tolerance > 0.0) {
                return Err(format!("tolerance must be finite and positive, got {tolerance}"));
            }
        }
        if self.threads == Some(0) {
            return Err("at least one worker thread is required".to_owned());
        }
        if let Some(buckets) = self.buckets_per_thread {
            if buckets < MIN_BUCKETS_PER_THREAD {
                return Err(format!(
                    "buckets_per_thread must be at least {MIN_BUCKETS_PER_THREAD}, got {buckets}"
                ));
            }
        }
        if self.poll_interval == Some(Duration::ZERO) {
            return Err("poll_interval must be positive".to_owned());
        }
        if let Some(params) = &self.params {
            let finite = [
                params.fit_weight,
                params.circle_weight,
                params.min_angle_degrees,
                params.densify,
                params.touch_up_fraction,
            ]
            .iter()
            .all(|x| x.is_finite());
            if !finite {
                return Err("refinement parameters must be finite".to_owned());
            }
            if params.densify <= 0.0 {
                return Err(format!("densify must be positive, got {}", params.densify));
            }
        }
        Ok(())
    }
}

impl EngineConfig {
    /// A configuration with defaults for everything but the tolerance.
    ///
    /// # Errors
    ///
    /// Returns [`EngineConfigBuilderError::ValidationError`] if `tolerance`
    /// is not finite and positive.
    pub fn with_tolerance(tolerance: f64) -> Result<Self, EngineConfigBuilderError> {
        EngineConfigBuilder::default().tolerance(tolerance).build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_everything_but_the_tolerance() {
        let config = EngineConfig::with_tolerance(0.1).unwrap();
        assert!(config.threads >= 1);
        assert_eq!(config.buckets_per_thread, 64);
        assert_eq!(config.seed, None);
        assert_eq!(config.backoff_cap, DEFAULT_CAP);
        assert_eq!(config.params, RefineParams::default());
    }

    #[test]
    fn missing_tolerance_is_reported() {
        let err = EngineConfigBuilder::default().build().unwrap_err();
        assert!(matches!(err, EngineConfigBuilderError::UninitializedField("tolerance")));
    }

    #[test]
    fn invalid_values_are_rejected() {
        for tolerance in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(EngineConfig::with_tolerance(tolerance).is_err(), "{tolerance}");
        }
        assert!(EngineConfigBuilder::default()
            .tolerance(0.1)
            .threads(0_usize)
            .build()
            .is_err());
        assert!(EngineConfigBuilder::default()
            .tolerance(0.1)
            .buckets_per_thread(32_usize)
            .build()
            .is_err());
        let params = RefineParams {
            fit_weight: f64::NAN,
            ..RefineParams::default()
        };
        let err = EngineConfigBuilder::default()
            .tolerance(0.1)
            .params(params)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("finite"));
    }

    #[test]
    fn serializes_with_serde() {
        let config = EngineConfigBuilder::default()
            .tolerance(0.25)
            .threads(3_usize)
            .time_limit(Duration::from_secs(5))
            .build()
            .unwrap();
        let json = serde_json::to_string(&config).unwrap();
        let back: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
