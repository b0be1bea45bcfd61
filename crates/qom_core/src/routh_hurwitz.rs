//! Routh-Hurwitz stability criterion for linear drift matrices.

use anyhow::{bail, Result};
use nalgebra::DMatrix;
use tracing::debug;

/// Characteristic polynomial of a drift matrix together with the
/// leading principal minors of its Hurwitz matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct RouthHurwitz {
    /// Polynomial coefficients, highest order first, `a_0 = 1` for a drift matrix.
    pub coefficients: Vec<f64>,
    /// `T_0 = a_0` followed by the leading principal minors `T_1..T_n`.
    pub sequence: Vec<f64>,
}

/// Coefficients of `det(λI - A)`, highest order first (Faddeev-LeVerrier).
pub fn characteristic_polynomial(a: &DMatrix<f64>) -> Result<Vec<f64>> {
    if !a.is_square() {
        bail!(
            "Drift matrix must be square, got {}x{}.",
            a.nrows(),
            a.ncols()
        );
    }
    let n = a.nrows();
    let identity = DMatrix::<f64>::identity(n, n);
    let mut coefficients = Vec::with_capacity(n + 1);
    coefficients.push(1.0);

    let mut m = DMatrix::<f64>::zeros(n, n);
    let mut c = 1.0;
    for k in 1..=n {
        m = a * &m + &identity * c;
        c = -(a * &m).trace() / k as f64;
        coefficients.push(c);
    }
    Ok(coefficients)
}

impl RouthHurwitz {
    pub fn from_drift(a: &DMatrix<f64>) -> Result<Self> {
        Self::from_coefficients(characteristic_polynomial(a)?)
    }

    pub fn from_coefficients(coefficients: Vec<f64>) -> Result<Self> {
        if coefficients.is_empty() {
            bail!("Characteristic polynomial has no coefficients.");
        }
        let hurwitz = hurwitz_matrix(&coefficients);
        let n = hurwitz.nrows();
        let mut sequence = Vec::with_capacity(n + 1);
        sequence.push(coefficients[0]);
        for k in 1..=n {
            sequence.push(hurwitz.view((0, 0), (k, k)).clone_owned().determinant());
        }
        debug!(?coefficients, ?sequence, "Routh-Hurwitz sequence");
        Ok(Self {
            coefficients,
            sequence,
        })
    }

    /// Indices `k` where `T_k / T_{k-1}` is negative. A zero or non-finite
    /// `T_k` is flagged too, as marginal. Empty for a stable system.
    pub fn check(&self) -> Vec<usize> {
        self.sequence
            .windows(2)
            .enumerate()
            .filter(|(_, w)| !w[1].is_finite() || w[1] == 0.0 || w[0] * w[1] < 0.0)
            .map(|(k, _)| k + 1)
            .collect()
    }

    pub fn is_stable(&self) -> bool {
        self.check().is_empty()
    }
}

/// `H_ij = a_{2i-j}` for 1-based `i, j`, zero outside the coefficient range.
fn hurwitz_matrix(coefficients: &[f64]) -> DMatrix<f64> {
    let n = coefficients.len() - 1;
    DMatrix::from_fn(n, n, |r, c| {
        let idx = 2 * (r as isize + 1) - (c as isize + 1);
        if idx < 0 {
            0.0
        } else {
            coefficients.get(idx as usize).copied().unwrap_or(0.0)
        }
    })
}
