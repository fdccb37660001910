//! Instrumentation session
//!
//! An [`EffortSession`] is the per-thread context that instrumented code
//! talks to. It owns the reentrancy guard, the call-path table, the effort
//! accumulator and the phase timer. A communication interception layer calls
//! [`EffortSession::enter_comm`] and [`EffortSession::exit_comm`] around each
//! communication call; the session turns the time between those boundaries
//! into the implicit `"time"` metric according to its [`RegionMode`].
//!
//! ```
//! use libra_effort::config::EffortConfig;
//! use libra_effort::session::EffortSession;
//!
//! let mut session = EffortSession::new(EffortConfig::default()).unwrap();
//! session.init_metrics(&["iterations"]).unwrap();
//! for _ in 0..4 {
//!     session.record_effort(&[10.0]).unwrap();
//!     session.enter_comm();
//!     session.exit_comm();
//!     session.progress_step();
//! }
//! let signatures = session.finalize(0).unwrap();
//! assert_eq!(signatures.len(), 1);
//! ```

use crate::callpath::{capture_raw_frames, chop_runtime_frames, CallPathId, CallPathTable, RawFrame};
use crate::cluster::{
    check_fleet_status, check_step_agreement, cluster_signatures, ClusterError, ClusterResult,
    Collective, SignatureId,
};
use crate::config::{EffortConfig, RegionMode};
use crate::guard::ReentrancyGuard;
use crate::pack::IdPair;
use crate::progress::{EffortAccumulator, EffortError, ListenerHandle, ProgressCallback};
use crate::timing::{write_times_file, PhaseTimer};
use crate::wavelet::{compress, Signature, WaveletError};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Effort(#[from] EffortError),

    #[error("Metric '{0}' is not recorded by this session")]
    UnknownMetric(String),

    #[error("Failed to compress {path}: {source}")]
    Compression {
        path: CallPathId,
        #[source]
        source: WaveletError,
    },

    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

pub type Result<T> = std::result::Result<T, SessionError>;

/// Frames belonging to the session's own stack-walk machinery
const WALK_SKIP: usize = 2;

/// Per-thread instrumentation context
#[derive(Debug)]
pub struct EffortSession {
    config: EffortConfig,
    guard: ReentrancyGuard,
    table: CallPathTable,
    accumulator: EffortAccumulator,
    timer: PhaseTimer,
    started: Instant,
    last_boundary: Instant,
    in_comm: bool,
    /// Path that was active when the current comm region began
    effort_path: CallPathId,
}

impl EffortSession {
    /// Create a session; metrics listed in the config are declared now
    pub fn new(config: EffortConfig) -> Result<Self> {
        let now = Instant::now();
        let mut accumulator = EffortAccumulator::new(config.track_time);
        accumulator.set_sampling(config.sampling);
        let mut session = Self {
            accumulator,
            guard: ReentrancyGuard::new(),
            table: CallPathTable::new(),
            timer: PhaseTimer::new(),
            started: now,
            last_boundary: now,
            in_comm: false,
            effort_path: CallPathId::EMPTY,
            config,
        };
        if !session.config.metrics.is_empty() {
            let metrics = session.config.metrics.clone();
            session.accumulator.init_metrics(&metrics)?;
        }
        tracing::debug!(regions = ?session.config.regions, "effort session started");
        Ok(session)
    }

    /// Run `f` with the guard held; nested entries get `skipped` instead
    fn guarded<R>(&mut self, skipped: R, f: impl FnOnce(&mut Self) -> R) -> R {
        if self.guard.is_active() {
            tracing::trace!("reentrant instrumentation call skipped");
            return skipped;
        }
        self.guard.enter();
        let result = f(self);
        self.guard.exit();
        result
    }

    pub fn config(&self) -> &EffortConfig {
        &self.config
    }

    pub fn guard(&self) -> &ReentrancyGuard {
        &self.guard
    }

    pub fn accumulator(&self) -> &EffortAccumulator {
        &self.accumulator
    }

    pub fn call_paths(&self) -> &CallPathTable {
        &self.table
    }

    pub fn timer(&self) -> &PhaseTimer {
        &self.timer
    }

    pub fn step(&self) -> u64 {
        self.accumulator.step()
    }

    pub fn in_comm(&self) -> bool {
        self.in_comm
    }

    pub fn init_metrics<S: AsRef<str>>(&mut self, names: &[S]) -> Result<()> {
        self.guarded(Ok(()), |s| Ok(s.accumulator.init_metrics(names)?))
    }

    /// Add one effort sample to the active call path
    ///
    /// Inside a communication region the sample is kept only when the region
    /// mode tracks communication.
    pub fn record_effort(&mut self, values: &[f64]) -> Result<()> {
        self.guarded(Ok(()), |s| {
            if s.in_comm && !s.config.regions.tracks_comm() {
                return Ok(());
            }
            Ok(s.accumulator.record(values)?)
        })
    }

    /// Mark one progress call; returns the step number after it
    ///
    /// The open time interval is charged before the step can close, so each
    /// step carries its own time even when it makes no communication calls.
    /// With `sampling > 1` only every `sampling`-th call closes a step.
    pub fn progress_step(&mut self) -> u64 {
        let current = self.accumulator.step();
        self.guarded(current, |s| {
            let elapsed = s.boundary();
            if s.in_comm {
                if s.config.regions.tracks_comm() {
                    s.charge_time(CallPathId::EMPTY, elapsed);
                }
            } else if s.config.regions.tracks_effort() {
                let active = s.accumulator.active_path();
                s.charge_time(active, elapsed);
            }
            s.accumulator.progress()
        })
    }

    pub fn register_progress_listener(
        &mut self,
        callback: ProgressCallback,
        frequency: u64,
    ) -> Result<ListenerHandle> {
        Ok(self.accumulator.register_listener(callback, frequency)?)
    }

    pub fn remove_progress_listener(&mut self, handle: ListenerHandle) -> bool {
        self.accumulator.remove_listener(handle)
    }

    /// Remove a listener by the callback it was registered with
    pub fn remove_progress_callback(&mut self, callback: &ProgressCallback) -> bool {
        self.accumulator.remove_listener_callback(callback)
    }

    /// Resolve a stack walk and make it the active call path
    pub fn set_call_path(&mut self, frames: &[RawFrame]) -> CallPathId {
        let active = self.accumulator.active_path();
        self.guarded(active, |s| s.resolve_path(frames))
    }

    /// Walk the caller's stack and make it the active call path
    pub fn walk_stack(&mut self) -> CallPathId {
        let active = self.accumulator.active_path();
        self.guarded(active, |s| {
            let mut walk = capture_raw_frames(WALK_SKIP);
            if s.config.chop_runtime {
                chop_runtime_frames(&mut walk.frames);
            }
            s.resolve_path(&walk.frames)
        })
    }

    fn resolve_path(&mut self, frames: &[RawFrame]) -> CallPathId {
        let bad = !frames.is_empty() && frames.iter().all(|f| f.symbol.is_none());
        self.table.note_walk(bad);
        let id = self.table.resolve(frames);
        if self.in_comm && self.config.regions.tracks_comm() {
            self.effort_path = id;
        } else {
            self.accumulator.set_active_path(id);
        }
        id
    }

    /// Boundary: computation ends, a communication call begins
    pub fn enter_comm(&mut self) {
        self.guarded((), |s| {
            if s.in_comm {
                tracing::warn!("enter_comm while already in a communication region");
                return;
            }
            let elapsed = s.boundary();
            let active = s.accumulator.active_path();
            if s.config.regions.tracks_effort() {
                s.charge_time(active, elapsed);
            }
            s.effort_path = active;
            if s.config.regions.tracks_comm() {
                s.accumulator.set_active_path(CallPathId::EMPTY);
            }
            s.in_comm = true;
        });
    }

    /// Boundary: the communication call returns
    pub fn exit_comm(&mut self) {
        self.guarded((), |s| {
            if !s.in_comm {
                tracing::warn!("exit_comm outside a communication region");
                return;
            }
            let elapsed = s.boundary();
            if s.config.regions.tracks_comm() {
                s.charge_time(CallPathId::EMPTY, elapsed);
            }
            s.accumulator.set_active_path(s.effort_path);
            s.in_comm = false;
        });
    }

    fn boundary(&mut self) -> Duration {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_boundary);
        self.last_boundary = now;
        elapsed
    }

    fn charge_time(&mut self, path: CallPathId, elapsed: Duration) {
        if self.accumulator.time_column().is_some() {
            // time column presence was checked, so this cannot fail
            let _ = self
                .accumulator
                .record_time(path, elapsed.as_nanos() as f64);
        }
    }

    /// Compress the configured metric's series for every path
    ///
    /// Ids encode `rank` and the call path. Returns nothing before the first
    /// progress step.
    pub fn finalize(&mut self, rank: u32) -> Result<Vec<IdPair<Signature>>> {
        let metric = self
            .accumulator
            .metric_index(&self.config.cluster_metric)
            .ok_or_else(|| SessionError::UnknownMetric(self.config.cluster_metric.clone()))?;
        if self.accumulator.step() == 0 {
            return Ok(Vec::new());
        }

        let start = Instant::now();
        let paths: Vec<CallPathId> = self.accumulator.paths().collect();
        let mut signatures = Vec::with_capacity(paths.len());
        for path in paths {
            let series = self.accumulator.series(path, metric);
            let signature = compress(&series, &self.config.wavelet)
                .map_err(|source| SessionError::Compression { path, source })?;
            signatures.push(IdPair::new(signature, SignatureId::new(rank, path).encode()));
        }
        self.timer.add("finalize", start.elapsed());

        tracing::debug!(rank, signatures = signatures.len(), "finalized effort series");
        Ok(signatures)
    }

    /// Collective: check step agreement, finalize and cluster the fleet
    ///
    /// A local finalize failure is announced to the fleet before it is
    /// returned, so peers fail with [`ClusterError::PeerFailed`] instead of
    /// blocking.
    pub fn cluster<C: Collective + ?Sized>(&mut self, collective: &C) -> Result<ClusterResult> {
        check_step_agreement(collective, self.accumulator.step())?;
        let local = match self.finalize(collective.rank() as u32) {
            Ok(local) => {
                check_fleet_status(collective, true)?;
                local
            }
            Err(err) => {
                let _ = check_fleet_status(collective, false);
                return Err(err);
            }
        };
        let start = Instant::now();
        let result = cluster_signatures(collective, &local, &self.config.cluster)?;
        self.timer.add("cluster", start.elapsed());
        Ok(result)
    }

    /// Write `times-<fleet_size>` into `dir`
    ///
    /// `TOTAL` is the session's lifetime; `APP` excludes the time spent in
    /// finalize and clustering.
    pub fn write_times(&self, dir: &Path, fleet_size: usize) -> anyhow::Result<PathBuf> {
        let total = self.started.elapsed();
        let overhead: Duration = self.timer.phases().iter().map(|(_, d)| *d).sum();
        write_times_file(
            dir,
            fleet_size,
            total.saturating_sub(overhead),
            total,
            Some(&self.timer),
        )
    }

    pub fn region_mode(&self) -> RegionMode {
        self.config.regions
    }
}
