//! Synthetic fleet for exercising the full pipeline
//!
//! Every rank runs its own [`EffortSession`] on its own thread. Each rank
//! reports effort for a few call paths, and each path follows one of three
//! shapes chosen by `(rank + path) % 3`:
//!
//! - `10 sin(t/5)`
//! - `sin(t/5)`
//! - `10 sin²(t/5) cos(t)`
//!
//! plus uniform noise, so members of one shape are similar but never equal.

use crate::callpath::RawFrame;
use crate::cluster::{ClusterResult, Collective, LocalFleet};
use crate::config::EffortConfig;
use crate::session::EffortSession;
use anyhow::{anyhow, Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;

/// Name of the single metric recorded by simulated ranks
pub const SIMULATED_METRIC: &str = "work";

/// Shape of a simulated fleet
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub ranks: usize,
    pub steps: usize,
    pub paths_per_rank: usize,
    pub seed: u64,
    /// Amplitude of the uniform noise added to each sample
    pub noise: f64,
    /// Directory that receives `times-<ranks>` from rank 0
    pub times_dir: Option<PathBuf>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            ranks: 4,
            steps: 64,
            paths_per_rank: 3,
            seed: 0,
            noise: 1.0,
            times_dir: None,
        }
    }
}

/// Fleet-wide result plus where the times file went
#[derive(Debug)]
pub struct SimulationOutcome {
    pub result: ClusterResult,
    pub times_file: Option<PathBuf>,
}

/// Noise-free value of `pattern` at step `t`
pub fn pattern_value(pattern: usize, t: usize) -> f64 {
    let x = t as f64 / 5.0;
    match pattern % 3 {
        0 => 10.0 * x.sin(),
        1 => x.sin(),
        _ => 10.0 * x.sin() * x.sin() * (t as f64).cos(),
    }
}

/// Shape used by `path` on `rank`
pub fn pattern_for(rank: usize, path: usize) -> usize {
    (rank + path) % 3
}

/// Synthetic stack for one simulated call path
fn frames_for(path: usize) -> Vec<RawFrame> {
    vec![
        RawFrame::resolved("simulate", 0x1000, "main", "simulate.rs", 1),
        RawFrame::resolved(
            "simulate",
            0x2000 + path as u64 * 0x10,
            format!("kernel_{}", path),
            "kernels.rs",
            10 + path as u32,
        ),
    ]
}

fn run_rank<C: Collective>(
    endpoint: &C,
    sim: &SimulationConfig,
    base: &EffortConfig,
) -> Result<(ClusterResult, Option<PathBuf>)> {
    let rank = endpoint.rank();
    let mut config = base.clone();
    config.metrics = vec![SIMULATED_METRIC.to_string()];
    config.cluster_metric = SIMULATED_METRIC.to_string();

    let mut session = EffortSession::new(config)?;
    let mut rng = StdRng::seed_from_u64(sim.seed.wrapping_add(rank as u64));

    for t in 0..sim.steps {
        for path in 0..sim.paths_per_rank {
            session.set_call_path(&frames_for(path));
            let value = pattern_value(pattern_for(rank, path), t) + sim.noise * rng.gen::<f64>();
            session.record_effort(&[value])?;
        }
        session.enter_comm();
        session.exit_comm();
        session.progress_step();
    }

    let result = session
        .cluster(endpoint)
        .with_context(|| format!("Clustering failed on rank {}", rank))?;

    let times_file = match (&sim.times_dir, rank) {
        (Some(dir), 0) => Some(session.write_times(dir, endpoint.size())?),
        _ => None,
    };
    Ok((result, times_file))
}

/// Run the synthetic fleet and return rank 0's view of the result
pub fn simulate(sim: &SimulationConfig, base: &EffortConfig) -> Result<SimulationOutcome> {
    if sim.ranks == 0 || sim.steps == 0 || sim.paths_per_rank == 0 {
        return Err(anyhow!("ranks, steps and paths per rank must all be positive"));
    }
    tracing::info!(ranks = sim.ranks, steps = sim.steps, "simulating fleet");

    let mut per_rank = LocalFleet::run(sim.ranks, |endpoint| run_rank(&endpoint, sim, base))?
        .into_iter()
        .collect::<Result<Vec<_>>>()?;

    let (result, times_file) = per_rank.swap_remove(0);
    Ok(SimulationOutcome { result, times_file })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_assignment() {
        assert_eq!(pattern_for(0, 0), 0);
        assert_eq!(pattern_for(1, 0), 1);
        assert_eq!(pattern_for(2, 2), 1);
        assert_eq!(pattern_value(1, 0), 0.0);
        assert!((pattern_value(0, 5) - 10.0 * 1.0_f64.sin()).abs() < 1e-12);
    }

    #[test]
    fn test_simulation_finds_three_shapes() {
        let sim = SimulationConfig {
            ranks: 3,
            steps: 32,
            paths_per_rank: 3,
            seed: 7,
            noise: 0.1,
            times_dir: None,
        };
        let outcome = simulate(&sim, &EffortConfig::default()).unwrap();

        assert_eq!(outcome.result.assignments.len(), 9);
        assert_eq!(outcome.result.cluster_count(), 3);
        // paths with the same shape share a cluster
        let id = |rank: u32, path: u32| {
            crate::cluster::SignatureId::new(rank, crate::callpath::CallPathId(path + 1)).encode()
        };
        assert_eq!(outcome.result.cluster_of(id(0, 0)), outcome.result.cluster_of(id(1, 2)));
        assert_eq!(outcome.result.cluster_of(id(0, 1)), outcome.result.cluster_of(id(2, 2)));
        assert!(outcome.times_file.is_none());
    }

    #[test]
    fn test_simulation_writes_times_file() {
        let dir = tempfile::tempdir().unwrap();
        let sim = SimulationConfig {
            ranks: 2,
            steps: 8,
            times_dir: Some(dir.path().to_path_buf()),
            ..SimulationConfig::default()
        };
        let outcome = simulate(&sim, &EffortConfig::default()).unwrap();
        let path = outcome.times_file.unwrap();
        assert!(path.ends_with("times-2"));
    }

    #[test]
    fn test_empty_simulation_rejected() {
        let sim = SimulationConfig {
            ranks: 0,
            ..SimulationConfig::default()
        };
        assert!(simulate(&sim, &EffortConfig::default()).is_err());
    }
}
