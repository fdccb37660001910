// Distributed clustering of effort signatures
//
// Every process of a fleet holds wavelet signatures for its own call paths.
// Clustering runs as a sequence of collective rounds over the `Collective`
// seam: seed proposal, then repeated assignment and reduction, then a final
// exchange of assignments. Each round folds contributions in rank order, so
// every process ends with the same centroids and the same result.

mod collective;
mod engine;

pub use collective::{all_gather_items, Collective, FleetEndpoint, LocalFleet, SoloCollective};
pub use engine::{
    check_fleet_status, check_step_agreement, cluster_signatures, ClusterConfig, ClusterPartial, ClusterResult,
};

use crate::callpath::CallPathId;
use crate::pack::PackError;
use crate::wavelet::WaveletError;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("No signatures anywhere in the fleet")]
    NoSignatures,

    #[error("Incompatible signature: {0}")]
    IncompatibleSignature(#[from] WaveletError),

    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Pack failure: {0}")]
    Pack(#[from] PackError),

    #[error("Processes disagree on progress step count: {steps:?}")]
    StepMismatch { steps: Vec<u64> },

    #[error("Ranks {ranks:?} failed before clustering")]
    PeerFailed { ranks: Vec<usize> },

    #[error("Invalid cluster configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, ClusterError>;

/// Fleet-unique identity of one (process, call path) signature
///
/// Encoded as `rank << 32 | path` so ids sort by rank first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SignatureId {
    pub rank: u32,
    pub path: CallPathId,
}

impl SignatureId {
    pub fn new(rank: u32, path: CallPathId) -> Self {
        Self { rank, path }
    }

    pub fn encode(self) -> u64 {
        (u64::from(self.rank) << 32) | u64::from(self.path.as_u32())
    }

    pub fn decode(id: u64) -> Self {
        Self {
            rank: (id >> 32) as u32,
            path: CallPathId(id as u32),
        }
    }
}

impl From<SignatureId> for u64 {
    fn from(id: SignatureId) -> u64 {
        id.encode()
    }
}

impl fmt::Display for SignatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rank {} {}", self.rank, self.path)
    }
}
