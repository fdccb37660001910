//! Per-process effort accumulator
//!
//! Effort is recorded against the active call path and summed element-wise
//! within the current progress step. Advancing the step closes the current
//! interval into per-path time series, increments the counter, and then
//! notifies listeners with a read-only snapshot of the interval just closed.

use super::listener::{ListenerHandle, ListenerRegistry, ProgressCallback};
use super::{EffortError, EffortSnapshot, Result};
use crate::callpath::CallPathId;
use std::collections::BTreeMap;

/// Name of the implicit elapsed-time column
pub const TIME_METRIC: &str = "time";

/// Totals for one call path across every closed step
#[derive(Debug, Clone, PartialEq)]
pub struct PathEffort {
    pub path: CallPathId,
    /// Per-metric totals, same order as [`EffortAccumulator::metric_names`]
    pub totals: Vec<f64>,
    /// Number of closed steps in which this path recorded anything
    pub steps_active: u64,
}

/// Tracks effort per (step, call path) and fires progress listeners
#[derive(Debug, Default)]
pub struct EffortAccumulator {
    /// Declared metric names plus the implicit time column when enabled
    metric_names: Option<Vec<String>>,
    /// Number of user-supplied metrics accepted by `record`
    arity: usize,
    track_time: bool,
    step: u64,
    active_path: CallPathId,
    current: BTreeMap<CallPathId, Vec<f64>>,
    history: BTreeMap<CallPathId, BTreeMap<u64, Vec<f64>>>,
    listeners: ListenerRegistry,
    /// Progress calls per closed step; 0 behaves like 1
    sampling: u64,
    /// Progress calls since the last closed step
    pending: u64,
}

impl EffortAccumulator {
    /// Create an accumulator; with `track_time` an extra `"time"` column is
    /// appended after the declared metrics
    pub fn new(track_time: bool) -> Self {
        Self {
            track_time,
            ..Self::default()
        }
    }

    /// Fix the ordered metric names for the lifetime of the accumulator
    pub fn init_metrics<S: AsRef<str>>(&mut self, names: &[S]) -> Result<()> {
        if self.metric_names.is_some() {
            return Err(EffortError::MetricsAlreadyInitialized);
        }
        if names.is_empty() {
            return Err(EffortError::NoMetrics);
        }

        let mut columns: Vec<String> = Vec::with_capacity(names.len() + 1);
        for name in names {
            let name = name.as_ref();
            if columns.iter().any(|c| c == name) || (self.track_time && name == TIME_METRIC) {
                return Err(EffortError::DuplicateMetric(name.to_string()));
            }
            columns.push(name.to_string());
        }
        self.arity = columns.len();
        if self.track_time {
            columns.push(TIME_METRIC.to_string());
        }

        tracing::debug!(metrics = ?columns, "initialized effort metrics");
        self.metric_names = Some(columns);
        Ok(())
    }

    /// All metric columns, including the implicit time column
    pub fn metric_names(&self) -> &[String] {
        self.metric_names.as_deref().unwrap_or(&[])
    }

    /// Number of values `record` expects
    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn metric_index(&self, name: &str) -> Option<usize> {
        self.metric_names().iter().position(|m| m == name)
    }

    pub fn time_column(&self) -> Option<usize> {
        if self.track_time {
            self.metric_index(TIME_METRIC)
        } else {
            None
        }
    }

    /// Fold every `calls` progress calls into one step
    pub fn set_sampling(&mut self, calls: u64) {
        self.sampling = calls.max(1);
        self.pending = 0;
    }

    pub fn sampling(&self) -> u64 {
        self.sampling.max(1)
    }

    /// Current step number; 0 before the first `advance_step`
    pub fn step(&self) -> u64 {
        self.step
    }

    pub fn active_path(&self) -> CallPathId {
        self.active_path
    }

    pub fn set_active_path(&mut self, path: CallPathId) {
        self.active_path = path;
    }

    /// Add `values` element-wise to the active path's entry for this step
    ///
    /// Rejected calls leave the accumulator unchanged.
    pub fn record(&mut self, values: &[f64]) -> Result<()> {
        self.record_for(self.active_path, values)
    }

    /// Like [`record`](Self::record) but against an explicit path
    pub fn record_for(&mut self, path: CallPathId, values: &[f64]) -> Result<()> {
        let columns = self
            .metric_names
            .as_ref()
            .ok_or(EffortError::MetricsNotInitialized)?
            .len();
        if values.len() != self.arity {
            return Err(EffortError::ArityMismatch {
                expected: self.arity,
                actual: values.len(),
            });
        }

        let entry = self
            .current
            .entry(path)
            .or_insert_with(|| vec![0.0; columns]);
        for (acc, v) in entry.iter_mut().zip(values) {
            *acc += v;
        }
        Ok(())
    }

    /// Add elapsed nanoseconds to the time column of `path`
    pub fn record_time(&mut self, path: CallPathId, elapsed_ns: f64) -> Result<()> {
        let column = self.time_column().ok_or(EffortError::TimeNotTracked)?;
        let columns = self.metric_names().len();
        let entry = self
            .current
            .entry(path)
            .or_insert_with(|| vec![0.0; columns]);
        entry[column] += elapsed_ns;
        Ok(())
    }

    /// Effort recorded so far in the open step
    pub fn current(&self) -> &BTreeMap<CallPathId, Vec<f64>> {
        &self.current
    }

    /// Close the current step, increment the counter, then notify listeners
    ///
    /// Listeners see the new step number and the effort of the step that was
    /// just closed. Returns the new step number.
    pub fn advance_step(&mut self) -> u64 {
        let closed = self.step;
        let effort = std::mem::take(&mut self.current);
        for (path, values) in &effort {
            self.history
                .entry(*path)
                .or_default()
                .insert(closed, values.clone());
        }

        self.step += 1;
        let snapshot = EffortSnapshot {
            step: self.step,
            metric_names: self.metric_names().to_vec(),
            effort,
        };
        let fired = self.listeners.notify(&snapshot);
        tracing::trace!(step = self.step, paths = snapshot.effort.len(), fired, "progress step");
        self.step
    }

    /// Count one progress call; every `sampling`-th call closes the step
    ///
    /// Returns the step number after the call.
    pub fn progress(&mut self) -> u64 {
        self.pending += 1;
        if self.pending < self.sampling() {
            return self.step;
        }
        self.pending = 0;
        self.advance_step()
    }

    pub fn register_listener(&mut self, callback: ProgressCallback, frequency: u64) -> Result<ListenerHandle> {
        self.listeners.register(callback, frequency)
    }

    pub fn remove_listener(&mut self, handle: ListenerHandle) -> bool {
        self.listeners.unregister(handle)
    }

    pub fn remove_listener_callback(&mut self, callback: &ProgressCallback) -> bool {
        self.listeners.unregister_callback(callback)
    }

    pub fn listeners(&self) -> &ListenerRegistry {
        &self.listeners
    }

    pub fn listeners_mut(&mut self) -> &mut ListenerRegistry {
        &mut self.listeners
    }

    /// Every path that recorded effort in a closed step
    pub fn paths(&self) -> impl Iterator<Item = CallPathId> + '_ {
        self.history.keys().copied()
    }

    /// Dense series of one metric for one path over all closed steps
    ///
    /// Steps in which the path recorded nothing contribute `0.0`.
    pub fn series(&self, path: CallPathId, metric: usize) -> Vec<f64> {
        let mut out = vec![0.0; self.step as usize];
        if let Some(steps) = self.history.get(&path) {
            for (step, values) in steps {
                if let Some(v) = values.get(metric) {
                    out[*step as usize] = *v;
                }
            }
        }
        out
    }

    /// Per-path totals over every closed step
    pub fn summary(&self) -> Vec<PathEffort> {
        let columns = self.metric_names().len();
        self.history
            .iter()
            .map(|(path, steps)| {
                let mut totals = vec![0.0; columns];
                for values in steps.values() {
                    for (t, v) in totals.iter_mut().zip(values) {
                        *t += v;
                    }
                }
                PathEffort {
                    path: *path,
                    totals,
                    steps_active: steps.len() as u64,
                }
            })
            .collect()
    }

    /// Print per-path effort totals to stderr, largest first metric first
    pub fn print_summary(&self) {
        let mut summary = self.summary();
        if summary.is_empty() {
            eprintln!("\nNo effort data collected.");
            return;
        }
        summary.sort_by(|a, b| {
            let a0 = a.totals.first().copied().unwrap_or(0.0);
            let b0 = b.totals.first().copied().unwrap_or(0.0);
            b0.total_cmp(&a0)
        });

        eprintln!("\nEffort summary over {} progress steps", self.step);
        let header: Vec<String> = self
            .metric_names()
            .iter()
            .map(|m| format!("{:>14}", m))
            .collect();
        eprintln!("{:<12} {:>8} {}", "Path", "Steps", header.join(" "));
        eprintln!("{}", "─".repeat(22 + 15 * self.metric_names().len()));
        for entry in summary {
            let cols: Vec<String> = entry.totals.iter().map(|v| format!("{:>14.3}", v)).collect();
            eprintln!(
                "{:<12} {:>8} {}",
                entry.path.to_string(),
                entry.steps_active,
                cols.join(" ")
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready(names: &[&str]) -> EffortAccumulator {
        let mut acc = EffortAccumulator::new(false);
        acc.init_metrics(names).unwrap();
        acc
    }

    #[test]
    fn test_initial_step_is_zero() {
        let acc = EffortAccumulator::new(false);
        assert_eq!(acc.step(), 0);
        assert_eq!(acc.active_path(), CallPathId::EMPTY);
    }

    #[test]
    fn test_init_metrics_only_once() {
        let mut acc = ready(&["flops"]);
        assert!(matches!(
            acc.init_metrics(&["bytes"]),
            Err(EffortError::MetricsAlreadyInitialized)
        ));
        assert_eq!(acc.metric_names(), &["flops".to_string()]);
    }

    #[test]
    fn test_init_metrics_rejects_empty_and_duplicates() {
        let mut acc = EffortAccumulator::new(false);
        assert!(matches!(
            acc.init_metrics::<&str>(&[]),
            Err(EffortError::NoMetrics)
        ));
        assert!(matches!(
            acc.init_metrics(&["a", "a"]),
            Err(EffortError::DuplicateMetric(_))
        ));
        // failed attempts do not count as initialization
        assert!(acc.init_metrics(&["a"]).is_ok());
    }

    #[test]
    fn test_time_column_appended() {
        let mut acc = EffortAccumulator::new(true);
        acc.init_metrics(&["flops"]).unwrap();
        assert_eq!(acc.metric_names(), &["flops".to_string(), "time".to_string()]);
        assert_eq!(acc.arity(), 1);
        assert_eq!(acc.time_column(), Some(1));

        let mut dup = EffortAccumulator::new(true);
        assert!(dup.init_metrics(&["time"]).is_err());
    }

    #[test]
    fn test_record_accumulates_elementwise() {
        let mut acc = ready(&["a", "b"]);
        acc.record(&[1.0, 2.0]).unwrap();
        acc.record(&[0.5, 0.5]).unwrap();
        assert_eq!(acc.current()[&CallPathId::EMPTY], vec![1.5, 2.5]);
    }

    #[test]
    fn test_record_arity_mismatch_leaves_state_unchanged() {
        let mut acc = ready(&["a", "b"]);
        acc.record(&[1.0, 1.0]).unwrap();
        let before = acc.current().clone();

        let err = acc.record(&[1.0, 2.0, 3.0]).unwrap_err();
        assert!(matches!(
            err,
            EffortError::ArityMismatch {
                expected: 2,
                actual: 3
            }
        ));
        assert!(acc.record(&[]).is_err());
        assert_eq!(acc.current(), &before);
    }

    #[test]
    fn test_record_before_init_rejected() {
        let mut acc = EffortAccumulator::new(false);
        assert!(matches!(
            acc.record(&[1.0]),
            Err(EffortError::MetricsNotInitialized)
        ));
        assert!(acc.current().is_empty());
    }

    #[test]
    fn test_records_keyed_by_active_path() {
        let mut acc = ready(&["a"]);
        acc.set_active_path(CallPathId(3));
        acc.record(&[2.0]).unwrap();
        acc.set_active_path(CallPathId(4));
        acc.record(&[5.0]).unwrap();
        assert_eq!(acc.current()[&CallPathId(3)], vec![2.0]);
        assert_eq!(acc.current()[&CallPathId(4)], vec![5.0]);
    }

    #[test]
    fn test_advance_rolls_into_series() {
        let mut acc = ready(&["a"]);
        let p = CallPathId(1);
        acc.set_active_path(p);

        acc.record(&[1.0]).unwrap();
        assert_eq!(acc.advance_step(), 1);
        // nothing recorded in step 1
        assert_eq!(acc.advance_step(), 2);
        acc.record(&[3.0]).unwrap();
        acc.record(&[4.0]).unwrap();
        assert_eq!(acc.advance_step(), 3);

        assert_eq!(acc.series(p, 0), vec![1.0, 0.0, 7.0]);
        assert!(acc.current().is_empty());
        assert_eq!(acc.paths().collect::<Vec<_>>(), vec![p]);
    }

    #[test]
    fn test_record_time_requires_tracking() {
        let mut acc = ready(&["a"]);
        assert!(matches!(
            acc.record_time(CallPathId::EMPTY, 10.0),
            Err(EffortError::TimeNotTracked)
        ));

        let mut timed = EffortAccumulator::new(true);
        timed.init_metrics(&["a"]).unwrap();
        timed.record_time(CallPathId(2), 10.0).unwrap();
        timed.record_time(CallPathId(2), 5.0).unwrap();
        assert_eq!(timed.current()[&CallPathId(2)], vec![0.0, 15.0]);
    }

    #[test]
    fn test_summary_totals() {
        let mut acc = ready(&["a", "b"]);
        acc.set_active_path(CallPathId(1));
        acc.record(&[1.0, 10.0]).unwrap();
        acc.advance_step();
        acc.record(&[2.0, 20.0]).unwrap();
        acc.advance_step();

        let summary = acc.summary();
        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].totals, vec![3.0, 30.0]);
        assert_eq!(summary[0].steps_active, 2);
        acc.print_summary();
    }

    #[test]
    fn test_empty_summary_does_not_panic() {
        let acc = ready(&["a"]);
        assert!(acc.summary().is_empty());
        acc.print_summary();
    }
}
