//! Libra - effort tracking, wavelet signatures and fleet-wide load-balance clustering
//!
//! This library measures per-process *effort* between progress steps, tags it
//! with the call path that was active when it was recorded, compresses each
//! call path's effort series into a wavelet signature, and clusters those
//! signatures across a fleet of cooperating processes to expose load
//! imbalance.

pub mod callpath;
pub mod cli;
pub mod cluster;
pub mod config;
pub mod guard;
pub mod pack;
pub mod progress;
pub mod report;
pub mod session;
pub mod simulate;
pub mod timing;
pub mod wavelet;
