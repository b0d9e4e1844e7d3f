use std::rc::Rc;
use std::time::{Duration, SystemTime};

use super::ring::BoundedRing;

/// Timing of one reducer invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceSample {
    pub domain: String,
    pub action_type: String,
    pub duration: Duration,
    pub timestamp: SystemTime,
}

impl PerformanceSample {
    #[inline]
    pub fn duration_ms(&self) -> f64 {
        self.duration.as_secs_f64() * 1000.0
    }
}

pub type SampleCallback = Rc<dyn Fn(&PerformanceSample)>;

/// Records reducer samples into a bounded ring and flags slow reducers.
pub(crate) struct PerformanceMonitor {
    samples: BoundedRing<PerformanceSample>,
    slow_threshold: Duration,
    log_samples: bool,
}

/// What the caller should report for a recorded sample.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum SampleVerdict {
    Normal,
    Slow,
}

impl PerformanceMonitor {
    pub(crate) fn new(capacity: usize, slow_threshold: Duration, log_samples: bool) -> Self {
        Self {
            samples: BoundedRing::new(capacity),
            slow_threshold,
            log_samples,
        }
    }

    pub(crate) fn record(&mut self, sample: PerformanceSample) -> SampleVerdict {
        let verdict = if sample.duration >= self.slow_threshold {
            SampleVerdict::Slow
        } else {
            SampleVerdict::Normal
        };

        if self.log_samples {
            match verdict {
                SampleVerdict::Slow => log::warn!(
                    "slow reducer `{}` on {}: {:.3}ms (threshold {:.3}ms)",
                    sample.domain,
                    sample.action_type,
                    sample.duration_ms(),
                    self.slow_threshold.as_secs_f64() * 1000.0,
                ),
                SampleVerdict::Normal => log::debug!(
                    "reducer `{}` on {}: {:.3}ms",
                    sample.domain,
                    sample.action_type,
                    sample.duration_ms(),
                ),
            }
        }

        self.samples.push(sample);
        verdict
    }

    pub(crate) fn samples(&self) -> Vec<PerformanceSample> {
        self.samples.iter().cloned().collect()
    }

    pub(crate) fn clear(&mut self) {
        self.samples.clear();
    }
}
