//! Job system startup descriptor (C10).

use forge_core::env::{env_get_bool, env_get};
use forge_core::kprint::{self, LogLevel};

/// Error returned by `JobSystemDesc::validate`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// `field` was zero or not a power of two.
    NotPowerOfTwo { field: &'static str, value: usize },
    /// `fiber_count` didn't leave room for `worker_count` root fibers plus
    /// the fixed extended-fiber reservation.
    FiberCountTooSmall { fiber_count: usize, worker_count: usize },
    /// `worker_count` was zero.
    ZeroWorkers,
    /// `worker_count` exceeded `forge_core::constants::MAX_WORKERS`.
    TooManyWorkers { worker_count: usize, max: usize },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::NotPowerOfTwo { field, value } => {
                write!(f, "{field} must be a nonzero power of two, got {value}")
            }
            ConfigError::FiberCountTooSmall { fiber_count, worker_count } => write!(
                f,
                "fiber_count {fiber_count} too small for {worker_count} workers plus the extended-fiber reservation"
            ),
            ConfigError::ZeroWorkers => write!(f, "worker_count must be nonzero"),
            ConfigError::TooManyWorkers { worker_count, max } => {
                write!(f, "worker_count {worker_count} exceeds the maximum of {max}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Startup descriptor for the job system (§6).
#[derive(Debug, Clone)]
pub struct JobSystemDesc {
    /// Number of OS worker threads. Defaults to
    /// `available_parallelism() - 1` (reserving one core for the host
    /// thread) when built via `JobSystemDesc::default()`.
    pub worker_count: usize,
    /// Total fiber count, power of two, ≤ 256 — includes the `worker_count`
    /// root fibers.
    pub fiber_count: usize,
    /// Stack size, in bytes, for normal-class fibers.
    pub normal_stack_size: usize,
    /// Stack size, in bytes, for extended-class fibers.
    pub extended_stack_size: usize,
    /// Pin each worker thread to a distinct core.
    pub pin_workers_to_cores: bool,
    /// Capacity of each priority job queue (power of two).
    pub job_queue_capacity: usize,
    /// Number of job counters in the pool (power of two).
    pub counter_count: usize,
}

const DEFAULT_FIBER_COUNT: usize = 128;
const DEFAULT_NORMAL_STACK_SIZE: usize = 64 * 1024;
const DEFAULT_EXTENDED_STACK_SIZE: usize = 512 * 1024;
const DEFAULT_JOB_QUEUE_CAPACITY: usize = 4096;
const DEFAULT_COUNTER_COUNT: usize = 256;

impl Default for JobSystemDesc {
    fn default() -> Self {
        let available = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(2);
        Self {
            worker_count: env_get("FORGE_WORKERS", available.saturating_sub(1).max(1)),
            fiber_count: DEFAULT_FIBER_COUNT,
            normal_stack_size: DEFAULT_NORMAL_STACK_SIZE,
            extended_stack_size: DEFAULT_EXTENDED_STACK_SIZE,
            pin_workers_to_cores: env_get_bool("FORGE_PIN_WORKERS", true),
            job_queue_capacity: DEFAULT_JOB_QUEUE_CAPACITY,
            counter_count: DEFAULT_COUNTER_COUNT,
        }
    }
}

impl JobSystemDesc {
    /// Validate the power-of-two / capacity constraints from §4.4.1 and
    /// §7's "programming error" row, before the job system is built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_count == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        let max_workers = forge_core::constants::MAX_WORKERS;
        if self.worker_count > max_workers {
            return Err(ConfigError::TooManyWorkers {
                worker_count: self.worker_count,
                max: max_workers,
            });
        }
        if self.fiber_count == 0 || !self.fiber_count.is_power_of_two() || self.fiber_count > 256 {
            return Err(ConfigError::NotPowerOfTwo {
                field: "fiber_count",
                value: self.fiber_count,
            });
        }
        let extended = forge_core::constants::EXTENDED_FIBER_COUNT;
        if self.fiber_count <= self.worker_count + extended {
            return Err(ConfigError::FiberCountTooSmall {
                fiber_count: self.fiber_count,
                worker_count: self.worker_count,
            });
        }
        if self.job_queue_capacity == 0 || !self.job_queue_capacity.is_power_of_two() {
            return Err(ConfigError::NotPowerOfTwo {
                field: "job_queue_capacity",
                value: self.job_queue_capacity,
            });
        }
        if self.counter_count == 0 || !self.counter_count.is_power_of_two() {
            return Err(ConfigError::NotPowerOfTwo {
                field: "counter_count",
                value: self.counter_count,
            });
        }
        Ok(())
    }
}

/// Apply `FORGE_LOG_LEVEL`/`FORGE_LOG_TIME` to the process-wide logger.
/// Called once by the job system at startup.
pub fn apply_log_env() {
    kprint::init();
    if env_get_bool("FORGE_DEBUG", false) {
        kprint::set_log_level(LogLevel::Debug);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_desc_validates() {
        let desc = JobSystemDesc::default();
        assert!(desc.validate().is_ok());
    }

    #[test]
    fn rejects_non_power_of_two_fiber_count() {
        let mut desc = JobSystemDesc::default();
        desc.fiber_count = 100;
        assert!(matches!(
            desc.validate(),
            Err(ConfigError::NotPowerOfTwo { field: "fiber_count", value: 100 })
        ));
    }

    #[test]
    fn rejects_fiber_count_too_small_for_workers() {
        let mut desc = JobSystemDesc {
            worker_count: 8,
            fiber_count: 8,
            ..JobSystemDesc::default()
        };
        desc.fiber_count = 8;
        assert!(matches!(desc.validate(), Err(ConfigError::FiberCountTooSmall { .. })));
    }

    #[test]
    fn rejects_zero_workers() {
        let desc = JobSystemDesc {
            worker_count: 0,
            ..JobSystemDesc::default()
        };
        assert_eq!(desc.validate(), Err(ConfigError::ZeroWorkers));
    }

    #[test]
    fn rejects_worker_count_past_max() {
        let desc = JobSystemDesc {
            worker_count: forge_core::constants::MAX_WORKERS + 1,
            ..JobSystemDesc::default()
        };
        assert!(matches!(desc.validate(), Err(ConfigError::TooManyWorkers { .. })));
    }
}
