//! Progress steps, effort accumulation and progress listeners
//!
//! A *progress step* is one unit of application progress, advanced only by an
//! explicit signal. Between steps, effort vectors are summed per call path.
//! Every step advance notifies registered listeners, each at its own
//! frequency.
//!
//! ```
//! use libra_effort::progress::EffortAccumulator;
//! use libra_effort::callpath::CallPathId;
//!
//! let mut acc = EffortAccumulator::new(false);
//! acc.init_metrics(&["flops", "bytes"]).unwrap();
//! acc.set_active_path(CallPathId(1));
//! acc.record(&[120.0, 4096.0]).unwrap();
//! acc.advance_step();
//! assert_eq!(acc.series(CallPathId(1), 0), vec![120.0]);
//! ```

mod accumulator;
mod listener;

pub use accumulator::{EffortAccumulator, PathEffort, TIME_METRIC};
pub use listener::{ListenerHandle, ListenerRegistry, ProgressCallback};

use crate::callpath::CallPathId;
use std::collections::BTreeMap;
use thiserror::Error;

/// Misuse of the effort API, reported to the immediate caller
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EffortError {
    #[error("Metrics already initialized; init_metrics may be called once")]
    MetricsAlreadyInitialized,

    #[error("Metrics not initialized; call init_metrics first")]
    MetricsNotInitialized,

    #[error("At least one metric name is required")]
    NoMetrics,

    #[error("Duplicate metric name: {0}")]
    DuplicateMetric(String),

    #[error("Expected {expected} metric values, got {actual}")]
    ArityMismatch { expected: usize, actual: usize },

    #[error("Elapsed time is not tracked by this accumulator")]
    TimeNotTracked,

    #[error("Listener frequency must be at least 1")]
    InvalidFrequency,

    #[error("Unknown listener handle")]
    UnknownListener,
}

pub type Result<T> = std::result::Result<T, EffortError>;

/// Read-only view of one closed progress step
#[derive(Debug, Clone, PartialEq)]
pub struct EffortSnapshot {
    /// Number of steps completed, including the one this snapshot describes
    pub step: u64,
    /// Metric column names
    pub metric_names: Vec<String>,
    /// Effort recorded during the step, per call path
    pub effort: BTreeMap<CallPathId, Vec<f64>>,
}

impl EffortSnapshot {
    /// Sum of one metric over every path in the step
    pub fn total(&self, metric: usize) -> f64 {
        self.effort
            .values()
            .filter_map(|v| v.get(metric))
            .sum()
    }
}
