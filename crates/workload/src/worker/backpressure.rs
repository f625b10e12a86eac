//! Executor capacity for load shedding
//!
//! LOAD_SHED admits a workload by taking an [`InFlightGuard`]. The decision is
//! made against launches already in flight, never counting the workload being
//! judged, and the count and the decision change together in one atomic step.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Capacity thresholds
///
/// # Example
///
/// ```
/// use workload_engine::worker::BackpressureConfig;
///
/// let config = BackpressureConfig::default()
///     .with_high_watermark(0.9)
///     .with_low_watermark(0.6);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackpressureConfig {
    /// Start shedding once in-flight / max_concurrency reaches this ratio
    pub high_watermark: f64,

    /// Admit again once the ratio falls to this value
    pub low_watermark: f64,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            high_watermark: 1.0,
            low_watermark: 0.8,
        }
    }
}

impl BackpressureConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_high_watermark(mut self, watermark: f64) -> Self {
        self.high_watermark = watermark.clamp(0.0, 1.0);
        self
    }

    pub fn with_low_watermark(mut self, watermark: f64) -> Self {
        self.low_watermark = watermark.clamp(0.0, 1.0);
        self
    }

    pub fn validate(&self) -> Result<(), BackpressureError> {
        if self.high_watermark <= 0.0 {
            return Err(BackpressureError::InvalidConfig(
                "high_watermark must be greater than zero".into(),
            ));
        }
        if self.low_watermark >= self.high_watermark {
            return Err(BackpressureError::InvalidConfig(
                "low_watermark must be less than high_watermark".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum BackpressureError {
    #[error("invalid backpressure configuration: {0}")]
    InvalidConfig(String),
}

/// Admission refused
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("executor at capacity: {in_flight}/{max_concurrency} launches in flight")]
pub struct OverCapacity {
    pub in_flight: usize,
    pub max_concurrency: usize,
}

/// Launches in flight across one executor
///
/// Shared by every pipeline in the process so LOAD_SHED sees the total.
pub struct BackpressureState {
    config: BackpressureConfig,
    max_concurrency: usize,
    in_flight: AtomicUsize,
    shedding: AtomicBool,
}

impl BackpressureState {
    pub fn new(config: BackpressureConfig, max_concurrency: usize) -> Self {
        Self {
            config,
            max_concurrency: max_concurrency.max(1),
            in_flight: AtomicUsize::new(0),
            shedding: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &BackpressureConfig {
        &self.config
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Admit one workload, counting it as in flight until the guard drops
    ///
    /// Once the high watermark is reached admission stays closed until load
    /// falls back to the low watermark.
    pub fn try_admit(self: &Arc<Self>) -> Result<InFlightGuard, OverCapacity> {
        let mut current = self.in_flight.load(Ordering::Acquire);
        loop {
            let ratio = current as f64 / self.max_concurrency as f64;

            if self.shedding.load(Ordering::Acquire) {
                if ratio > self.config.low_watermark {
                    return Err(self.over_capacity(current));
                }
                self.shedding.store(false, Ordering::Release);
            }

            if current >= self.max_concurrency || ratio >= self.config.high_watermark {
                self.shedding.store(true, Ordering::Release);
                return Err(self.over_capacity(current));
            }

            match self.in_flight.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Ok(InFlightGuard {
                        state: Arc::clone(self),
                    })
                }
                Err(actual) => current = actual,
            }
        }
    }

    fn over_capacity(&self, in_flight: usize) -> OverCapacity {
        OverCapacity {
            in_flight,
            max_concurrency: self.max_concurrency,
        }
    }
}

/// Releases one admission on drop
pub struct InFlightGuard {
    state: Arc<BackpressureState>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.state.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}
