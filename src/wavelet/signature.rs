use super::transform::{max_levels, WaveletKind};
use super::{Result, WaveletError};
use crate::pack::{self, PackError, Packable};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Bytes per retained coefficient on the wire: `u32` index then `f64` value
const COEFFICIENT_SIZE: usize = 4 + 8;

/// Fixed header: kind, original length, padded length, levels, count
const HEADER_SIZE: usize = 4 + 8 + 8 + 4 + 8;

/// Per-coefficient weighting used by [`Signature::distance`]
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", content = "decay", rename_all = "snake_case")]
pub enum CoefficientWeights {
    /// Plain Euclidean distance
    #[default]
    Uniform,
    /// Detail level `l` (1 = coarsest detail band) is weighted `decay^l`,
    /// the approximation band is weighted 1
    CoarseBias(f64),
}

impl CoefficientWeights {
    /// Weight of coefficient `index` in a transform of `padded_len` values
    /// taken to `levels` levels
    pub fn weight(&self, index: usize, padded_len: usize, levels: u32) -> f64 {
        match *self {
            CoefficientWeights::Uniform => 1.0,
            CoefficientWeights::CoarseBias(decay) => {
                let approx = (padded_len >> levels).max(1);
                if index < approx {
                    return 1.0;
                }
                let band = index.ilog2() - approx.ilog2() + 1;
                decay.powi(band as i32)
            }
        }
    }
}

/// Compressed wavelet representation of one effort series
///
/// Holds only the retained coefficients as `(index, value)` pairs sorted by
/// index. Coefficients that are absent are zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    kind: WaveletKind,
    original_len: usize,
    padded_len: usize,
    levels: u32,
    coefficients: Vec<(u32, f64)>,
}

impl Signature {
    /// Build a signature from a full coefficient vector, dropping zeros
    pub fn from_dense(kind: WaveletKind, original_len: usize, levels: u32, dense: &[f64]) -> Self {
        let coefficients = dense
            .iter()
            .enumerate()
            .filter(|(_, v)| **v != 0.0)
            .map(|(i, v)| (i as u32, *v))
            .collect();
        Self {
            kind,
            original_len,
            padded_len: dense.len(),
            levels,
            coefficients,
        }
    }

    /// Build a signature from retained indices of a dense coefficient vector
    pub(crate) fn from_retained(
        kind: WaveletKind,
        original_len: usize,
        levels: u32,
        dense: &[f64],
        retained: &[usize],
    ) -> Self {
        Self {
            kind,
            original_len,
            padded_len: dense.len(),
            levels,
            coefficients: retained.iter().map(|&i| (i as u32, dense[i])).collect(),
        }
    }

    pub fn kind(&self) -> WaveletKind {
        self.kind
    }

    /// Length of the series before padding
    pub fn original_len(&self) -> usize {
        self.original_len
    }

    pub fn padded_len(&self) -> usize {
        self.padded_len
    }

    pub fn levels(&self) -> u32 {
        self.levels
    }

    /// Retained `(index, value)` pairs, sorted by index
    pub fn coefficients(&self) -> &[(u32, f64)] {
        &self.coefficients
    }

    /// Number of retained coefficients
    pub fn retained(&self) -> usize {
        self.coefficients.len()
    }

    /// Full coefficient vector of `padded_len` values
    pub fn to_dense(&self) -> Vec<f64> {
        let mut dense = vec![0.0; self.padded_len];
        for &(i, v) in &self.coefficients {
            dense[i as usize] = v;
        }
        dense
    }

    /// Sum of squared retained coefficients
    pub fn energy(&self) -> f64 {
        self.coefficients.iter().map(|(_, v)| v * v).sum()
    }

    /// Weighted norm of the retained coefficients, the distance to zero
    pub fn norm(&self, weights: &CoefficientWeights) -> f64 {
        self.coefficients
            .iter()
            .map(|&(i, v)| weights.weight(i as usize, self.padded_len, self.levels) * v * v)
            .sum::<f64>()
            .sqrt()
    }

    /// Original samples per retained coefficient
    pub fn compression_ratio(&self) -> f64 {
        self.original_len as f64 / self.coefficients.len().max(1) as f64
    }

    /// Whether two signatures live in the same coefficient space
    pub fn is_compatible(&self, other: &Signature) -> bool {
        self.kind == other.kind
            && self.padded_len == other.padded_len
            && self.levels == other.levels
    }

    fn check_compatible(&self, other: &Signature) -> Result<()> {
        if self.is_compatible(other) {
            Ok(())
        } else {
            Err(WaveletError::Incompatible(format!(
                "{} vs {}",
                self.shape(),
                other.shape()
            )))
        }
    }

    fn shape(&self) -> String {
        format!(
            "{:?} padded={} levels={}",
            self.kind, self.padded_len, self.levels
        )
    }

    /// Weighted Euclidean distance in coefficient space
    pub fn distance(&self, other: &Signature, weights: &CoefficientWeights) -> Result<f64> {
        self.check_compatible(other)?;

        let (a, b) = (&self.coefficients, &other.coefficients);
        let (mut i, mut j) = (0, 0);
        let mut sum = 0.0;
        while i < a.len() || j < b.len() {
            let (index, diff) = match (a.get(i), b.get(j)) {
                (Some(&(ia, va)), Some(&(ib, vb))) if ia == ib => {
                    i += 1;
                    j += 1;
                    (ia, va - vb)
                }
                (Some(&(ia, va)), Some(&(ib, _))) if ia < ib => {
                    i += 1;
                    (ia, va)
                }
                (Some(&(ia, va)), None) => {
                    i += 1;
                    (ia, va)
                }
                (_, Some(&(ib, vb))) => {
                    j += 1;
                    (ib, -vb)
                }
                (None, None) => break,
            };
            let w = weights.weight(index as usize, self.padded_len, self.levels);
            sum += w * diff * diff;
        }
        Ok(sum.sqrt())
    }

    /// Weighted distance to a dense coefficient vector of the same shape
    pub fn distance_to_dense(&self, dense: &[f64], weights: &CoefficientWeights) -> Result<f64> {
        if dense.len() != self.padded_len {
            return Err(WaveletError::Incompatible(format!(
                "{} vs dense length {}",
                self.shape(),
                dense.len()
            )));
        }
        let mut sparse = self.coefficients.iter().peekable();
        let mut sum = 0.0;
        for (index, &c) in dense.iter().enumerate() {
            let mine = match sparse.peek() {
                Some(&&(i, v)) if i as usize == index => {
                    sparse.next();
                    v
                }
                _ => 0.0,
            };
            let diff = mine - c;
            if diff != 0.0 {
                sum += weights.weight(index, self.padded_len, self.levels) * diff * diff;
            }
        }
        Ok(sum.sqrt())
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}[{}/{} coeffs, len {}]",
            self.kind,
            self.coefficients.len(),
            self.padded_len,
            self.original_len
        )
    }
}

impl Packable for Signature {
    fn packed_size(&self) -> usize {
        HEADER_SIZE + COEFFICIENT_SIZE * self.coefficients.len()
    }

    fn pack(&self, buf: &mut [u8], position: &mut usize) -> pack::Result<()> {
        let needed = *position + self.packed_size();
        if needed > buf.len() {
            return Err(PackError::BufferTooSmall {
                needed,
                available: buf.len(),
            });
        }
        self.kind.code().pack(buf, position)?;
        (self.original_len as u64).pack(buf, position)?;
        (self.padded_len as u64).pack(buf, position)?;
        self.levels.pack(buf, position)?;
        (self.coefficients.len() as u64).pack(buf, position)?;
        for &(index, value) in &self.coefficients {
            index.pack(buf, position)?;
            value.pack(buf, position)?;
        }
        Ok(())
    }

    fn unpack(buf: &[u8], position: &mut usize) -> pack::Result<Self> {
        let code = u32::unpack(buf, position)?;
        let kind = WaveletKind::from_code(code)
            .ok_or_else(|| PackError::Invalid(format!("unknown wavelet kind {}", code)))?;
        let original_len = u64::unpack(buf, position)? as usize;
        let padded_len = u64::unpack(buf, position)? as usize;
        let levels = u32::unpack(buf, position)?;
        let count = u64::unpack(buf, position)? as usize;

        if !padded_len.is_power_of_two() || original_len > padded_len {
            return Err(PackError::Invalid(format!(
                "bad signature lengths: original {} padded {}",
                original_len, padded_len
            )));
        }
        if levels > max_levels(padded_len) {
            return Err(PackError::Invalid(format!(
                "{} levels exceed depth of length {}",
                levels, padded_len
            )));
        }
        let remaining = buf.len().saturating_sub(*position);
        let fits = count
            .checked_mul(COEFFICIENT_SIZE)
            .is_some_and(|bytes| bytes <= remaining);
        if count > padded_len || !fits {
            return Err(PackError::Invalid(format!(
                "coefficient count {} exceeds signature or buffer",
                count
            )));
        }

        let mut coefficients = Vec::with_capacity(count);
        let mut last: Option<u32> = None;
        for _ in 0..count {
            let index = u32::unpack(buf, position)?;
            let value = f64::unpack(buf, position)?;
            if index as usize >= padded_len || last.is_some_and(|l| index <= l) {
                return Err(PackError::Invalid(format!(
                    "coefficient index {} out of order or range",
                    index
                )));
            }
            last = Some(index);
            coefficients.push((index, value));
        }

        Ok(Signature {
            kind,
            original_len,
            padded_len,
            levels,
            coefficients,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pack::{pack_all, unpack_all, IdPair};

    fn sig(dense: &[f64]) -> Signature {
        Signature::from_dense(WaveletKind::Haar, dense.len(), max_levels(dense.len()), dense)
    }

    #[test]
    fn test_from_dense_drops_zeros() {
        let s = sig(&[1.0, 0.0, -2.0, 0.0]);
        assert_eq!(s.coefficients(), &[(0, 1.0), (2, -2.0)]);
        assert_eq!(s.to_dense(), vec![1.0, 0.0, -2.0, 0.0]);
        assert_eq!(s.energy(), 5.0);
        assert_eq!(s.norm(&CoefficientWeights::Uniform), 5.0_f64.sqrt());
        assert_eq!(s.compression_ratio(), 2.0);
    }

    #[test]
    fn test_uniform_distance_matches_dense_euclidean() {
        let a = sig(&[1.0, 0.0, 3.0, 0.0]);
        let b = sig(&[0.0, 2.0, 3.0, 4.0]);
        let d = a.distance(&b, &CoefficientWeights::Uniform).unwrap();
        assert!((d - 21.0_f64.sqrt()).abs() < 1e-12);
        assert_eq!(b.distance(&a, &CoefficientWeights::Uniform).unwrap(), d);
        assert_eq!(a.distance(&a, &CoefficientWeights::Uniform).unwrap(), 0.0);

        let dense = b.to_dense();
        let d2 = a
            .distance_to_dense(&dense, &CoefficientWeights::Uniform)
            .unwrap();
        assert!((d - d2).abs() < 1e-12);
    }

    #[test]
    fn test_coarse_bias_weights_by_band() {
        let w = CoefficientWeights::CoarseBias(0.5);
        // 8 values, 3 levels: approx [0], details [1], [2,3], [4..8]
        assert_eq!(w.weight(0, 8, 3), 1.0);
        assert_eq!(w.weight(1, 8, 3), 0.5);
        assert_eq!(w.weight(3, 8, 3), 0.25);
        assert_eq!(w.weight(7, 8, 3), 0.125);
        // 1 level: approx [0..4], details [4..8]
        assert_eq!(w.weight(3, 8, 1), 1.0);
        assert_eq!(w.weight(4, 8, 1), 0.5);
    }

    #[test]
    fn test_incompatible_signatures_rejected() {
        let a = sig(&[1.0, 2.0]);
        let b = sig(&[1.0, 2.0, 3.0, 4.0]);
        assert!(matches!(
            a.distance(&b, &CoefficientWeights::Uniform),
            Err(WaveletError::Incompatible(_))
        ));
    }

    #[test]
    fn test_pack_round_trip_inside_id_pair() {
        let pairs = vec![
            IdPair::new(sig(&[0.5, 0.0, 0.0, -1.25]), 1 << 32 | 3),
            IdPair::new(sig(&[0.0, 0.0, 0.0, 0.0]), 9),
        ];
        let buf = pack_all(&pairs).unwrap();
        let expected: usize = pairs.iter().map(Packable::packed_size).sum();
        assert_eq!(buf.len(), crate::pack::ID_SIZE + expected);
        let back: Vec<IdPair<Signature>> = unpack_all(&buf).unwrap();
        assert_eq!(back, pairs);
    }

    fn packed(s: &Signature) -> Vec<u8> {
        let mut buf = vec![0u8; s.packed_size()];
        s.pack(&mut buf, &mut 0).unwrap();
        buf
    }

    #[test]
    fn test_unpack_rejects_unknown_kind() {
        let good = packed(&sig(&[1.0, 2.0, 0.0, -3.0]));
        assert!(Signature::unpack(&good, &mut 0).is_ok());

        let mut buf = good;
        buf[0] = 9;
        assert!(matches!(
            Signature::unpack(&buf, &mut 0),
            Err(PackError::Invalid(_))
        ));
    }

    #[test]
    fn test_unpack_rejects_corrupt_header() {
        let s = sig(&[1.0, 2.0, 0.0, -3.0]);
        let good = packed(&s);
        assert_eq!(Signature::unpack(&good, &mut 0).unwrap(), s);

        // levels deeper than the padded length allows
        let mut buf = good.clone();
        buf[20..24].copy_from_slice(&40u32.to_le_bytes());
        assert!(Signature::unpack(&buf, &mut 0).is_err());

        // original length beyond the padded length
        let mut buf = good.clone();
        buf[4..12].copy_from_slice(&5u64.to_le_bytes());
        assert!(Signature::unpack(&buf, &mut 0).is_err());

        // padded length of 2^63 with a count that overflows when sized
        let mut buf = good;
        buf[12..20].copy_from_slice(&(1u64 << 63).to_le_bytes());
        buf[24..32].copy_from_slice(&(1u64 << 62).to_le_bytes());
        assert!(Signature::unpack(&buf, &mut 0).is_err());
    }

    #[test]
    fn test_pack_into_short_buffer() {
        let s = sig(&[1.0, 2.0]);
        let mut buf = vec![0u8; s.packed_size() - 1];
        let mut pos = 0;
        assert!(matches!(
            s.pack(&mut buf, &mut pos),
            Err(PackError::BufferTooSmall { .. })
        ));
    }
}
