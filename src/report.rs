//! Text and JSON reports for compression and clustering runs

use crate::cluster::{ClusterResult, SignatureId};
use crate::wavelet::{nrmse, Signature, WaveletKind};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::Path;

/// Report format selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Text,
    Json,
}

/// One member of a cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportMember {
    pub rank: u32,
    pub path: u32,
}

/// One cluster with its members
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportCluster {
    pub index: usize,
    pub size: usize,
    /// Coefficients kept in the centroid signature
    pub centroid_coefficients: usize,
    pub centroid_energy: f64,
    pub members: Vec<ReportMember>,
}

/// Root report structure for a clustering run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterReport {
    /// Format version identifier
    pub version: String,
    pub format: String,
    pub ranks: usize,
    pub signatures: usize,
    pub iterations: usize,
    pub converged: bool,
    pub total_distance: f64,
    pub clusters: Vec<ReportCluster>,
}

impl ClusterReport {
    pub fn new(result: &ClusterResult, ranks: usize) -> Self {
        let clusters = result
            .centroids
            .iter()
            .enumerate()
            .map(|(index, centroid)| {
                let members: Vec<ReportMember> = result
                    .members(index)
                    .into_iter()
                    .map(|id| {
                        let sid = SignatureId::decode(id);
                        ReportMember {
                            rank: sid.rank,
                            path: sid.path.as_u32(),
                        }
                    })
                    .collect();
                ReportCluster {
                    index,
                    size: members.len(),
                    centroid_coefficients: centroid.retained(),
                    centroid_energy: centroid.energy(),
                    members,
                }
            })
            .collect();

        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            format: "libra-cluster-v1".to_string(),
            ranks,
            signatures: result.assignments.len(),
            iterations: result.iterations,
            converged: result.converged,
            total_distance: result.total_distance,
            clusters,
        }
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{} signatures from {} ranks in {} clusters ({} iterations{})",
            self.signatures,
            self.ranks,
            self.clusters.len(),
            self.iterations,
            if self.converged { ", converged" } else { "" }
        );
        let _ = writeln!(out, "total distance: {:.6}", self.total_distance);
        let _ = writeln!(out, "{}", "─".repeat(60));
        for cluster in &self.clusters {
            let _ = writeln!(
                out,
                "cluster {:>3}  size {:>5}  centroid {:>4} coeffs  energy {:.3}",
                cluster.index, cluster.size, cluster.centroid_coefficients, cluster.centroid_energy
            );
            let members: Vec<String> = cluster
                .members
                .iter()
                .map(|m| format!("{}:{}", m.rank, m.path))
                .collect();
            let _ = writeln!(out, "    {}", members.join(" "));
        }
        out
    }

    pub fn render(&self, format: ReportFormat) -> Result<String> {
        match format {
            ReportFormat::Text => Ok(self.to_text()),
            ReportFormat::Json => self.to_json(),
        }
    }
}

/// Summary of compressing a single series
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionReport {
    pub kind: WaveletKind,
    pub length: usize,
    pub padded_length: usize,
    pub levels: u32,
    pub retained: usize,
    pub ratio: f64,
    pub nrmse: f64,
}

impl CompressionReport {
    pub fn new(original: &[f64], signature: &Signature, reconstructed: &[f64]) -> Self {
        Self {
            kind: signature.kind(),
            length: signature.original_len(),
            padded_length: signature.padded_len(),
            levels: signature.levels(),
            retained: signature.retained(),
            ratio: signature.compression_ratio(),
            nrmse: nrmse(original, reconstructed),
        }
    }

    pub fn render(&self, format: ReportFormat) -> Result<String> {
        match format {
            ReportFormat::Json => Ok(serde_json::to_string_pretty(self)?),
            ReportFormat::Text => Ok(format!(
                "{:?}: {} samples (padded {}), {} levels\nretained {} coefficients, ratio {:.2}, nrmse {:.6}\n",
                self.kind,
                self.length,
                self.padded_length,
                self.levels,
                self.retained,
                self.ratio,
                self.nrmse
            )),
        }
    }
}

/// Write `contents` to `path` via a sibling temporary file and rename
pub fn write_report(path: &Path, contents: &str) -> Result<()> {
    let file_name = path
        .file_name()
        .with_context(|| format!("Report path {} has no file name", path.display()))?;
    let staging = path.with_file_name(format!(".{}.tmp", file_name.to_string_lossy()));
    std::fs::write(&staging, contents)
        .with_context(|| format!("Failed to write report to {}", staging.display()))?;
    std::fs::rename(&staging, path)
        .with_context(|| format!("Failed to move report into {}", path.display()))?;
    Ok(())
}
