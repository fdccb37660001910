//! Wavelet compression of effort time series
//!
//! A series is edge-padded to the next power of two, transformed in place,
//! thresholded and stored as a sparse [`Signature`]. Decompression runs the
//! inverse transform and truncates back to the original length.
//!
//! ```
//! use libra_effort::wavelet::{compress, decompress, Threshold, WaveletConfig};
//!
//! let series: Vec<f64> = (0..64).map(|i| (i as f64 / 8.0).sin()).collect();
//! let config = WaveletConfig {
//!     threshold: Threshold::KeepLargest(8),
//!     ..WaveletConfig::default()
//! };
//! let sig = compress(&series, &config).unwrap();
//! assert_eq!(sig.retained(), 8);
//! assert_eq!(decompress(&sig).len(), 64);
//! ```

mod signature;
mod transform;

pub use signature::{CoefficientWeights, Signature};
pub use transform::{max_levels, Transform, WaveletKind};

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum WaveletError {
    #[error("Cannot compress an empty series")]
    EmptySeries,

    #[error("Non-finite sample {value} at index {index}")]
    NonFinite { index: usize, value: f64 },

    #[error("Invalid threshold: {0}")]
    InvalidThreshold(String),

    #[error("Signatures are not comparable: {0}")]
    Incompatible(String),
}

pub type Result<T> = std::result::Result<T, WaveletError>;

/// Which coefficients survive compression
///
/// Every policy is stable under reconstruction: compressing the decompressed
/// series again selects the same coefficients.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "value", rename_all = "snake_case")]
pub enum Threshold {
    /// Keep every non-zero coefficient (lossless up to rounding)
    None,
    /// Keep the `n` largest-magnitude coefficients
    KeepLargest(usize),
    /// Keep every coefficient whose energy is at least this fraction of the
    /// largest coefficient's energy, in `(0, 1]`
    RelativeEnergy(f64),
}

impl Default for Threshold {
    fn default() -> Self {
        Threshold::KeepLargest(DEFAULT_KEEP)
    }
}

/// Coefficients kept per signature unless configured otherwise
pub const DEFAULT_KEEP: usize = 16;

impl Threshold {
    pub fn validate(&self) -> Result<()> {
        match *self {
            Threshold::RelativeEnergy(f) if f.is_nan() || f <= 0.0 || f > 1.0 => Err(
                WaveletError::InvalidThreshold(format!("relative energy {} not in (0, 1]", f)),
            ),
            _ => Ok(()),
        }
    }
}

/// Compression parameters
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WaveletConfig {
    pub kind: WaveletKind,
    /// Transform depth; `None` means as deep as the padded length allows
    pub levels: Option<u32>,
    pub threshold: Threshold,
}

/// Edge-pad `series` to the next power of two
pub fn pad_to_power_of_two(series: &[f64]) -> Vec<f64> {
    let padded_len = series.len().next_power_of_two();
    let mut padded = Vec::with_capacity(padded_len);
    padded.extend_from_slice(series);
    if let Some(&last) = series.last() {
        padded.resize(padded_len, last);
    }
    padded
}

/// Compress one series into a sparse signature
pub fn compress(series: &[f64], config: &WaveletConfig) -> Result<Signature> {
    if series.is_empty() {
        return Err(WaveletError::EmptySeries);
    }
    if let Some((index, &value)) = series.iter().enumerate().find(|(_, v)| !v.is_finite()) {
        return Err(WaveletError::NonFinite { index, value });
    }
    config.threshold.validate()?;

    let mut coefficients = pad_to_power_of_two(series);
    let depth = max_levels(coefficients.len());
    let levels = config.levels.map_or(depth, |l| l.min(depth));

    let mut transform = Transform::new(config.kind);
    transform.forward(&mut coefficients, levels);

    let retained = select_retained(&coefficients, config.threshold);
    tracing::trace!(
        len = series.len(),
        padded = coefficients.len(),
        levels,
        retained = retained.len(),
        "compressed series"
    );
    Ok(Signature::from_retained(
        config.kind,
        series.len(),
        levels,
        &coefficients,
        &retained,
    ))
}

/// Reconstruct the padded series from a signature
pub fn decompress_padded(signature: &Signature) -> Vec<f64> {
    let mut data = signature.to_dense();
    Transform::new(signature.kind()).inverse(&mut data, signature.levels());
    data
}

/// Reconstruct the series at its original length
pub fn decompress(signature: &Signature) -> Vec<f64> {
    let mut data = decompress_padded(signature);
    data.truncate(signature.original_len());
    data
}

/// Indices of surviving coefficients in ascending order
///
/// Zero coefficients never survive; ranking is by magnitude, ties by index.
fn select_retained(coefficients: &[f64], threshold: Threshold) -> Vec<usize> {
    let mut ranked: Vec<usize> = (0..coefficients.len())
        .filter(|&i| coefficients[i] != 0.0)
        .collect();

    match threshold {
        Threshold::None => return ranked,
        Threshold::KeepLargest(n) => {
            sort_by_magnitude(&mut ranked, coefficients);
            ranked.truncate(n);
        }
        Threshold::RelativeEnergy(fraction) => {
            // the largest coefficient survives reconstruction, so the cutoff does too
            let peak = ranked
                .iter()
                .map(|&i| coefficients[i].powi(2))
                .fold(0.0, f64::max);
            let cutoff = fraction * peak;
            ranked.retain(|&i| coefficients[i].powi(2) >= cutoff);
            return ranked;
        }
    }
    ranked.sort_unstable();
    ranked
}

fn sort_by_magnitude(indices: &mut [usize], coefficients: &[f64]) {
    indices.sort_by(|&a, &b| {
        coefficients[b]
            .abs()
            .partial_cmp(&coefficients[a].abs())
            .unwrap_or(Ordering::Equal)
            .then(a.cmp(&b))
    });
}

/// Root-mean-square error normalised by the range of `original`
///
/// Falls back to the plain RMSE when `original` is flat.
pub fn nrmse(original: &[f64], reconstructed: &[f64]) -> f64 {
    let n = original.len().min(reconstructed.len());
    if n == 0 {
        return 0.0;
    }
    let mse = original
        .iter()
        .zip(reconstructed)
        .map(|(a, b)| (a - b).powi(2))
        .sum::<f64>()
        / n as f64;
    let (min, max) = original[..n]
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let range = max - min;
    if range > 0.0 {
        mse.sqrt() / range
    } else {
        mse.sqrt()
    }
}

#[cfg(test)]
mod tests;
