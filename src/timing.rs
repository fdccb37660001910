//! Phase timing and the `times-<N>` report
//!
//! A [`PhaseTimer`] records wall-clock time per named phase (seeding,
//! refinement, exchange, ...). The report file written by
//! [`write_times_file`] has one `NAME:\t<nanoseconds>` line per entry and is
//! written to a temporary path and renamed so readers never see a partial
//! file.

use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Named wall-clock phases measured back to back
#[derive(Debug, Clone)]
pub struct PhaseTimer {
    start: Instant,
    last: Instant,
    phases: Vec<(String, Duration)>,
}

impl Default for PhaseTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseTimer {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last: now,
            phases: Vec::new(),
        }
    }

    /// Close a phase ending now; its duration runs from the previous mark
    pub fn mark(&mut self, name: &str) -> Duration {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last);
        self.last = now;
        self.add(name, elapsed);
        elapsed
    }

    /// Time `f` and add it to phase `name`
    ///
    /// ```
    /// use libra_effort::timing::PhaseTimer;
    ///
    /// let mut timer = PhaseTimer::new();
    /// let value = timer.measure("work", || 6 * 7);
    /// assert_eq!(value, 42);
    /// assert!(timer.phase("work").is_some());
    /// ```
    pub fn measure<F, R>(&mut self, name: &str, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let start = Instant::now();
        let result = f();
        self.add(name, start.elapsed());
        self.last = Instant::now();
        result
    }

    /// Accumulate into `name`, keeping first-seen order
    pub fn add(&mut self, name: &str, elapsed: Duration) {
        match self.phases.iter_mut().find(|(n, _)| n == name) {
            Some((_, total)) => *total += elapsed,
            None => self.phases.push((name.to_string(), elapsed)),
        }
    }

    pub fn phase(&self, name: &str) -> Option<Duration> {
        self.phases
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, d)| *d)
    }

    pub fn phases(&self) -> &[(String, Duration)] {
        &self.phases
    }

    /// Wall time since the timer was created
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Write one `NAME:\t<ns>` line per phase
    pub fn write_phases<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        for (name, elapsed) in &self.phases {
            writeln!(out, "{}:\t{}", name.to_uppercase(), elapsed.as_nanos())?;
        }
        Ok(())
    }
}

/// Name of the report for a fleet of `fleet_size` processes
pub fn times_file_name(fleet_size: usize) -> String {
    format!("times-{}", fleet_size)
}

/// Write `times-<fleet_size>` into `dir` and return its path
///
/// Contains `APP:` and `TOTAL:` lines followed by the timer's phases.
pub fn write_times_file(
    dir: &Path,
    fleet_size: usize,
    app: Duration,
    total: Duration,
    timer: Option<&PhaseTimer>,
) -> Result<PathBuf> {
    let target = dir.join(times_file_name(fleet_size));
    let staging = dir.join(format!(".{}.tmp", times_file_name(fleet_size)));

    let mut contents = Vec::new();
    writeln!(contents, "APP:\t{}", app.as_nanos())?;
    writeln!(contents, "TOTAL:\t{}", total.as_nanos())?;
    if let Some(timer) = timer {
        timer.write_phases(&mut contents)?;
    }

    fs::write(&staging, &contents)
        .with_context(|| format!("Failed to write {}", staging.display()))?;
    fs::rename(&staging, &target)
        .with_context(|| format!("Failed to move times file into {}", target.display()))?;

    tracing::debug!(path = %target.display(), "wrote times file");
    Ok(target)
}
