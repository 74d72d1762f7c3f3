//! Recorded benchmark samples

use std::time::Duration;

use serde::Serialize;

use super::dispatcher::DispatchOutcome;
use crate::variant::VariantKind;

/// Benchmark phase a sample belongs to
///
/// Warmup samples are recorded but non-authoritative; the reporting
/// layer excludes them from final statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Warmup,
    Measurement,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Warmup => "warmup",
            Self::Measurement => "measurement",
        }
    }

    pub fn is_measurement(&self) -> bool {
        matches!(self, Self::Measurement)
    }
}

/// The measured outcome of one dispatcher invocation
#[derive(Debug, Clone)]
pub struct RunSample {
    pub variant: VariantKind,
    pub phase: Phase,
    pub fork: u32,
    pub iteration: u32,
    pub elapsed: Duration,
    pub completed: u64,
    pub failed: u64,
    pub timed_out: bool,
    /// Unit-of-work latency percentiles, microseconds
    pub p50_us: u64,
    pub p99_us: u64,
}

impl RunSample {
    pub fn from_outcome(
        variant: VariantKind,
        phase: Phase,
        fork: u32,
        iteration: u32,
        outcome: &DispatchOutcome,
    ) -> Self {
        Self {
            variant,
            phase,
            fork,
            iteration,
            elapsed: outcome.elapsed,
            completed: outcome.completed,
            failed: outcome.failed,
            timed_out: outcome.timed_out,
            p50_us: outcome.latency.value_at_percentile(50.0),
            p99_us: outcome.latency.value_at_percentile(99.0),
        }
    }

    /// Completed operations per second
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.completed as f64 / secs
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(completed: u64, millis: u64) -> RunSample {
        RunSample {
            variant: VariantKind::Text,
            phase: Phase::Measurement,
            fork: 0,
            iteration: 0,
            elapsed: Duration::from_millis(millis),
            completed,
            failed: 0,
            timed_out: false,
            p50_us: 0,
            p99_us: 0,
        }
    }

    #[test]
    fn test_throughput() {
        assert_eq!(sample(100, 500).throughput(), 200.0);
        assert_eq!(sample(0, 500).throughput(), 0.0);
    }

    #[test]
    fn test_phase_flags() {
        assert!(Phase::Measurement.is_measurement());
        assert!(!Phase::Warmup.is_measurement());
    }
}
