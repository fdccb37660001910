//! In-place multi-level 1-D wavelet transforms
//!
//! Each level transforms the leading `n` values and packs the result as
//! `[approximation (n/2) | detail (n/2)]`; the next level recurses into the
//! approximation half. Lengths must be powers of two.

use serde::{Deserialize, Serialize};
use std::f64::consts::FRAC_1_SQRT_2;

/// Lifting coefficients of the Cohen-Daubechies-Feauveau 9/7 wavelet
const CDF97_LIFT: [f64; 4] = [
    -1.586_134_342_069_364_8,
    -0.052_980_118_571_885_6,
    0.882_911_075_541_187_5,
    0.443_506_852_051_114_2,
];

/// CDF 9/7 scaling factor
const CDF97_SCALE: f64 = 1.149_604_398_860_241_8;

/// Wavelet family used for a transform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaveletKind {
    /// Orthonormal Haar: energy preserving, so dropped-coefficient energy is
    /// exactly the squared reconstruction error
    #[default]
    Haar,
    /// Biorthogonal CDF 9/7 via lifting with symmetric boundary extension
    Cdf97,
}

impl WaveletKind {
    pub(crate) fn code(self) -> u32 {
        match self {
            WaveletKind::Haar => 0,
            WaveletKind::Cdf97 => 1,
        }
    }

    pub(crate) fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(WaveletKind::Haar),
            1 => Some(WaveletKind::Cdf97),
            _ => None,
        }
    }
}

/// Deepest number of levels for a power-of-two length
pub fn max_levels(len: usize) -> u32 {
    if len < 2 {
        0
    } else {
        len.trailing_zeros()
    }
}

/// Reusable transform with its scratch buffer
#[derive(Debug, Default)]
pub struct Transform {
    kind: WaveletKind,
    temp: Vec<f64>,
}

impl Transform {
    pub fn new(kind: WaveletKind) -> Self {
        Self {
            kind,
            temp: Vec::new(),
        }
    }

    pub fn kind(&self) -> WaveletKind {
        self.kind
    }

    /// Forward transform of `data` to `levels` levels
    pub fn forward(&mut self, data: &mut [f64], levels: u32) {
        debug_assert!(data.len().is_power_of_two());
        let levels = levels.min(max_levels(data.len()));
        for level in 0..levels {
            let n = data.len() >> level;
            self.forward_single(&mut data[..n]);
        }
    }

    /// Inverse of [`forward`](Self::forward) with the same `levels`
    pub fn inverse(&mut self, data: &mut [f64], levels: u32) {
        debug_assert!(data.len().is_power_of_two());
        let levels = levels.min(max_levels(data.len()));
        for level in (0..levels).rev() {
            let n = data.len() >> level;
            self.inverse_single(&mut data[..n]);
        }
    }

    fn forward_single(&mut self, data: &mut [f64]) {
        match self.kind {
            WaveletKind::Haar => self.haar_forward(data),
            WaveletKind::Cdf97 => self.cdf97_forward(data),
        }
    }

    fn inverse_single(&mut self, data: &mut [f64]) {
        match self.kind {
            WaveletKind::Haar => self.haar_inverse(data),
            WaveletKind::Cdf97 => self.cdf97_inverse(data),
        }
    }

    fn scratch(&mut self, n: usize) -> &mut [f64] {
        if self.temp.len() < n {
            self.temp.resize(n, 0.0);
        }
        &mut self.temp[..n]
    }

    fn haar_forward(&mut self, data: &mut [f64]) {
        let n = data.len();
        let half = n / 2;
        let temp = self.scratch(n);
        for i in 0..half {
            let (a, b) = (data[2 * i], data[2 * i + 1]);
            temp[i] = (a + b) * FRAC_1_SQRT_2;
            temp[half + i] = (a - b) * FRAC_1_SQRT_2;
        }
        data.copy_from_slice(temp);
    }

    fn haar_inverse(&mut self, data: &mut [f64]) {
        let n = data.len();
        let half = n / 2;
        let temp = self.scratch(n);
        for i in 0..half {
            let (s, d) = (data[i], data[half + i]);
            temp[2 * i] = (s + d) * FRAC_1_SQRT_2;
            temp[2 * i + 1] = (s - d) * FRAC_1_SQRT_2;
        }
        data.copy_from_slice(temp);
    }

    fn cdf97_forward(&mut self, data: &mut [f64]) {
        let n = data.len();
        predict(data, CDF97_LIFT[0]);
        update(data, CDF97_LIFT[1]);
        predict(data, CDF97_LIFT[2]);
        update(data, CDF97_LIFT[3]);

        for (i, v) in data.iter_mut().enumerate() {
            if i % 2 == 1 {
                *v /= CDF97_SCALE;
            } else {
                *v *= CDF97_SCALE;
            }
        }

        let temp = self.scratch(n);
        for (i, v) in data.iter().enumerate() {
            if i % 2 == 0 {
                temp[i / 2] = *v;
            } else {
                temp[n / 2 + i / 2] = *v;
            }
        }
        data.copy_from_slice(temp);
    }

    fn cdf97_inverse(&mut self, data: &mut [f64]) {
        let n = data.len();
        let temp = self.scratch(n);
        for i in 0..n / 2 {
            temp[2 * i] = data[i];
            temp[2 * i + 1] = data[i + n / 2];
        }
        data.copy_from_slice(temp);

        for (i, v) in data.iter_mut().enumerate() {
            if i % 2 == 1 {
                *v *= CDF97_SCALE;
            } else {
                *v /= CDF97_SCALE;
            }
        }

        update(data, -CDF97_LIFT[3]);
        predict(data, -CDF97_LIFT[2]);
        update(data, -CDF97_LIFT[1]);
        predict(data, -CDF97_LIFT[0]);
    }
}

/// Odd samples from their even neighbours, mirrored at the right edge
fn predict(data: &mut [f64], a: f64) {
    let n = data.len();
    let mut i = 1;
    while i + 2 < n {
        data[i] += a * (data[i - 1] + data[i + 1]);
        i += 2;
    }
    data[n - 1] += 2.0 * a * data[n - 2];
}

/// Even samples from their odd neighbours, mirrored at the left edge
fn update(data: &mut [f64], a: f64) {
    let n = data.len();
    let mut i = 2;
    while i < n {
        data[i] += a * (data[i - 1] + data[i + 1]);
        i += 2;
    }
    data[0] += 2.0 * a * data[1];
}
