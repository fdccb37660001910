use super::collective::{all_gather_items, Collective};
use super::{ClusterError, Result};
use crate::pack::{self, IdPair, Packable};
use crate::wavelet::{CoefficientWeights, Signature, WaveletError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Clustering parameters; every process of a fleet must use the same values
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Upper bound on the number of clusters
    pub max_clusters: usize,
    /// Upper bound on refinement rounds
    pub max_iterations: usize,
    /// Stop once total distance improves by less than this
    pub epsilon: f64,
    /// Seeds closer than this to an existing seed are not added
    pub merge_distance: f64,
    /// Seeds closer than this fraction of the RMS norm of the gathered
    /// candidates to an existing seed are not added either
    pub min_separation: f64,
    pub weights: CoefficientWeights,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            max_clusters: 8,
            max_iterations: 20,
            epsilon: 1e-6,
            merge_distance: 0.0,
            min_separation: 0.1,
            weights: CoefficientWeights::Uniform,
        }
    }
}

impl ClusterConfig {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.max_clusters == 0 {
            return Err("max_clusters must be at least 1".to_string());
        }
        if self.max_iterations == 0 {
            return Err("max_iterations must be at least 1".to_string());
        }
        if self.epsilon.is_nan() || self.epsilon < 0.0 {
            return Err(format!("epsilon must be non-negative, got {}", self.epsilon));
        }
        if self.merge_distance.is_nan() || self.merge_distance < 0.0 {
            return Err(format!(
                "merge_distance must be non-negative, got {}",
                self.merge_distance
            ));
        }
        if !(0.0..=1.0).contains(&self.min_separation) {
            return Err(format!(
                "min_separation must be in [0, 1], got {}",
                self.min_separation
            ));
        }
        if let CoefficientWeights::CoarseBias(decay) = self.weights {
            if decay.is_nan() || decay <= 0.0 || decay.is_infinite() {
                return Err(format!("weight decay must be positive, got {}", decay));
            }
        }
        Ok(())
    }
}

/// Fleet-wide clustering outcome, identical on every process
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterResult {
    /// Signature id to cluster index
    pub assignments: BTreeMap<u64, usize>,
    /// One representative per non-empty cluster
    pub centroids: Vec<Signature>,
    pub iterations: usize,
    /// Sum of member-to-centroid distances for the final assignment
    pub total_distance: f64,
    pub converged: bool,
}

impl ClusterResult {
    pub fn cluster_count(&self) -> usize {
        self.centroids.len()
    }

    pub fn cluster_of(&self, id: u64) -> Option<usize> {
        self.assignments.get(&id).copied()
    }

    /// Ids assigned to `cluster`, ascending
    pub fn members(&self, cluster: usize) -> Vec<u64> {
        self.assignments
            .iter()
            .filter(|(_, c)| **c == cluster)
            .map(|(id, _)| *id)
            .collect()
    }
}

/// Per-cluster reduction state: coefficient sums, member count, distance sum
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterPartial {
    pub sums: Vec<f64>,
    pub count: u64,
    pub distance: f64,
}

impl ClusterPartial {
    pub fn empty(dims: usize) -> Self {
        Self {
            sums: vec![0.0; dims],
            count: 0,
            distance: 0.0,
        }
    }

    fn add(&mut self, signature: &Signature, distance: f64) {
        for &(i, v) in signature.coefficients() {
            self.sums[i as usize] += v;
        }
        self.count += 1;
        self.distance += distance;
    }

    /// Combine two partials; commutative, and associative up to rounding
    pub fn merge(&mut self, other: &ClusterPartial) {
        for (a, b) in self.sums.iter_mut().zip(&other.sums) {
            *a += b;
        }
        self.count += other.count;
        self.distance += other.distance;
    }

    fn centroid(&self) -> Option<Vec<f64>> {
        (self.count > 0).then(|| {
            let n = self.count as f64;
            self.sums.iter().map(|s| s / n).collect()
        })
    }
}

impl Packable for ClusterPartial {
    fn packed_size(&self) -> usize {
        self.sums.packed_size() + self.count.packed_size() + self.distance.packed_size()
    }

    fn pack(&self, buf: &mut [u8], position: &mut usize) -> pack::Result<()> {
        self.sums.pack(buf, position)?;
        self.count.pack(buf, position)?;
        self.distance.pack(buf, position)
    }

    fn unpack(buf: &[u8], position: &mut usize) -> pack::Result<Self> {
        Ok(Self {
            sums: Vec::unpack(buf, position)?,
            count: u64::unpack(buf, position)?,
            distance: f64::unpack(buf, position)?,
        })
    }
}

/// Fail unless every process reports the same progress step count
pub fn check_step_agreement<C: Collective + ?Sized>(collective: &C, step: u64) -> Result<()> {
    let steps: Vec<u64> = all_gather_items(collective, &[step])?
        .into_iter()
        .flatten()
        .collect();
    if steps.iter().any(|s| *s != step) {
        tracing::warn!(rank = collective.rank(), ?steps, "step counts disagree");
        return Err(ClusterError::StepMismatch { steps });
    }
    Ok(())
}

/// Share whether this process is ready; fail everywhere if any rank is not
///
/// A process that hit a local error must still call this (with `ok =
/// false`) so that its peers leave the protocol with it instead of blocking
/// in the next exchange.
pub fn check_fleet_status<C: Collective + ?Sized>(collective: &C, ok: bool) -> Result<()> {
    let failed: Vec<usize> = all_gather_items(collective, &[u32::from(!ok)])?
        .into_iter()
        .enumerate()
        .filter(|(_, flags)| flags.iter().any(|f| *f != 0))
        .map(|(rank, _)| rank)
        .collect();
    if failed.is_empty() {
        Ok(())
    } else {
        Err(ClusterError::PeerFailed { ranks: failed })
    }
}

/// Cluster the fleet's signatures
///
/// Collective: every process must call this with its own local signatures
/// and the same `config`. All processes return the same result.
pub fn cluster_signatures<C: Collective + ?Sized>(
    collective: &C,
    local: &[IdPair<Signature>],
    config: &ClusterConfig,
) -> Result<ClusterResult> {
    config.validate().map_err(ClusterError::InvalidConfig)?;

    let mut local: Vec<&IdPair<Signature>> = local.iter().collect();
    local.sort_by_key(|p| p.id);

    // Seeding: local candidates, gathered, then one deterministic selection
    let proposals = local_candidates(&local, config)?;
    let mut candidates: Vec<IdPair<Signature>> = all_gather_items(collective, &proposals)?
        .into_iter()
        .flatten()
        .collect();
    candidates.sort_by_key(|p| p.id);
    candidates.dedup_by_key(|p| p.id);

    let reference = match candidates.first() {
        Some(first) => first.element.clone(),
        None => return Err(ClusterError::NoSignatures),
    };
    if let Some(bad) = candidates
        .iter()
        .find(|c| !c.element.is_compatible(&reference))
    {
        return Err(ClusterError::IncompatibleSignature(WaveletError::Incompatible(
            format!("signature {} does not match signature {}", bad.id, candidates[0].id),
        )));
    }

    let floor = separation_floor(candidates.iter().map(|c| &c.element), config);
    let seeds = farthest_points(
        candidates.iter().map(|c| &c.element),
        config.max_clusters,
        floor,
        &config.weights,
    )?;
    let mut centroids: Vec<Vec<f64>> = seeds
        .iter()
        .map(|&i| candidates[i].element.to_dense())
        .collect();
    tracing::debug!(
        rank = collective.rank(),
        candidates = candidates.len(),
        seeds = centroids.len(),
        floor,
        "seeded clustering"
    );

    let dims = reference.padded_len();
    let mut previous_total = f64::INFINITY;
    let mut iterations = 0;
    let mut converged = false;

    while iterations < config.max_iterations {
        let assignment = assign(&local, &centroids, &config.weights)?;
        let partials = reduce(collective, &local, &assignment, centroids.len(), dims)?;
        let total: f64 = partials.iter().map(|p| p.distance).sum();
        iterations += 1;

        for (centroid, partial) in centroids.iter_mut().zip(&partials) {
            if let Some(updated) = partial.centroid() {
                *centroid = updated;
            }
        }

        tracing::debug!(rank = collective.rank(), iterations, total, "refinement round");
        if previous_total - total < config.epsilon {
            converged = true;
            break;
        }
        previous_total = total;
    }

    // Final pass against the settled centroids
    let assignment = assign(&local, &centroids, &config.weights)?;
    let partials = reduce(collective, &local, &assignment, centroids.len(), dims)?;
    let total_distance = partials.iter().map(|p| p.distance).sum();

    let mut renumber = vec![None; centroids.len()];
    let mut kept = Vec::new();
    for (old, partial) in partials.iter().enumerate() {
        if partial.count > 0 {
            renumber[old] = Some(kept.len());
            kept.push(Signature::from_dense(
                reference.kind(),
                reference.original_len(),
                reference.levels(),
                &centroids[old],
            ));
        }
    }

    let local_assignments: Vec<IdPair<u64>> = local
        .iter()
        .zip(&assignment)
        .filter_map(|(pair, &(cluster, _))| {
            renumber[cluster].map(|c| IdPair::new(c as u64, pair.id))
        })
        .collect();
    let assignments = all_gather_items(collective, &local_assignments)?
        .into_iter()
        .flatten()
        .map(|pair| (pair.id, pair.element as usize))
        .collect();

    Ok(ClusterResult {
        assignments,
        centroids: kept,
        iterations,
        total_distance,
        converged,
    })
}

/// Seed proposals from one process
///
/// Only `merge_distance` limits the local selection; the relative floor is
/// applied once over the gathered candidates. Signatures whose shape differs
/// from the lowest-id one are proposed too (one per distinct shape) so that
/// every process detects the mismatch.
fn local_candidates(
    local: &[&IdPair<Signature>],
    config: &ClusterConfig,
) -> Result<Vec<IdPair<Signature>>> {
    let Some(first) = local.first() else {
        return Ok(Vec::new());
    };
    let (compatible, others): (Vec<&&IdPair<Signature>>, Vec<&&IdPair<Signature>>) = local
        .iter()
        .partition(|p| p.element.is_compatible(&first.element));

    let chosen = farthest_points(
        compatible.iter().map(|p| &p.element),
        config.max_clusters,
        config.merge_distance,
        &config.weights,
    )?;
    let mut proposals: Vec<IdPair<Signature>> =
        chosen.into_iter().map(|i| (*compatible[i]).clone()).collect();

    for other in others {
        if !proposals
            .iter()
            .any(|p| p.element.is_compatible(&other.element))
        {
            proposals.push((*other).clone());
        }
    }
    Ok(proposals)
}

/// Distance a further seed must exceed to be added
///
/// The larger of `merge_distance` and `min_separation` times the RMS norm of
/// `items`, so jitter that is small next to the signatures themselves never
/// opens a cluster of its own.
fn separation_floor<'a, I>(items: I, config: &ClusterConfig) -> f64
where
    I: IntoIterator<Item = &'a Signature>,
{
    let (sum, count) = items.into_iter().fold((0.0, 0usize), |(sum, count), s| {
        (sum + s.norm(&config.weights).powi(2), count + 1)
    });
    let rms = if count == 0 {
        0.0
    } else {
        (sum / count as f64).sqrt()
    };
    config.merge_distance.max(config.min_separation * rms)
}

/// Deterministic farthest-point selection starting from the first item
///
/// Stops at `max` points or once the farthest remaining item is within
/// `floor` of a chosen one. Returns indices into `items`; distance ties go
/// to the lowest index.
fn farthest_points<'a, I>(
    items: I,
    max: usize,
    floor: f64,
    weights: &CoefficientWeights,
) -> Result<Vec<usize>>
where
    I: IntoIterator<Item = &'a Signature>,
{
    let items: Vec<&Signature> = items.into_iter().collect();
    if items.is_empty() || max == 0 {
        return Ok(Vec::new());
    }

    let mut chosen = vec![0];
    let mut nearest: Vec<f64> = items
        .iter()
        .map(|s| s.distance(items[0], weights))
        .collect::<std::result::Result<_, _>>()?;

    while chosen.len() < max {
        let mut best: Option<(usize, f64)> = None;
        for (i, &d) in nearest.iter().enumerate() {
            if best.map_or(true, |(_, b)| d > b) {
                best = Some((i, d));
            }
        }
        let Some((next, distance)) = best else { break };
        if distance <= floor {
            break;
        }
        chosen.push(next);
        for (i, s) in items.iter().enumerate() {
            let d = s.distance(items[next], weights)?;
            if d < nearest[i] {
                nearest[i] = d;
            }
        }
    }
    Ok(chosen)
}

/// Nearest centroid and distance per local signature; ties to lowest index
fn assign(
    local: &[&IdPair<Signature>],
    centroids: &[Vec<f64>],
    weights: &CoefficientWeights,
) -> Result<Vec<(usize, f64)>> {
    local
        .iter()
        .map(|pair| -> Result<(usize, f64)> {
            let mut best = (0, f64::INFINITY);
            for (c, centroid) in centroids.iter().enumerate() {
                let d = pair.element.distance_to_dense(centroid, weights)?;
                if d < best.1 {
                    best = (c, d);
                }
            }
            Ok(best)
        })
        .collect()
}

/// Fleet-wide per-cluster partials, folded in rank order
fn reduce<C: Collective + ?Sized>(
    collective: &C,
    local: &[&IdPair<Signature>],
    assignment: &[(usize, f64)],
    clusters: usize,
    dims: usize,
) -> Result<Vec<ClusterPartial>> {
    let mut mine = vec![ClusterPartial::empty(dims); clusters];
    for (pair, &(cluster, distance)) in local.iter().zip(assignment) {
        mine[cluster].add(&pair.element, distance);
    }

    let mut folded = vec![ClusterPartial::empty(dims); clusters];
    for (rank, theirs) in all_gather_items(collective, &mine)?.into_iter().enumerate() {
        if theirs.len() != clusters {
            return Err(ClusterError::Transport(format!(
                "rank {} sent {} partials, expected {}",
                rank,
                theirs.len(),
                clusters
            )));
        }
        for (acc, partial) in folded.iter_mut().zip(&theirs) {
            acc.merge(partial);
        }
    }
    Ok(folded)
}
