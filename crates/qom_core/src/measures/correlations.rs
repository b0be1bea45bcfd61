//! Two-mode measures computed from the quadrature correlation matrix.
//!
//! `pi` and `pj` are the row of the position quadrature of each mode, i.e.
//! twice the mode index; the momentum quadrature follows at `pi + 1`.

use super::{MeasureValue, UndefinedReason};
use nalgebra::{DMatrix, Matrix2, Matrix4};

/// Symplectic invariants of the two-mode block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Invariants {
    /// det A, local block of mode i.
    pub i1: f64,
    /// det B, local block of mode j.
    pub i2: f64,
    /// det C, cross block.
    pub i3: f64,
    /// det of the full two-mode block.
    pub i4: f64,
}

impl Invariants {
    pub fn new(corr: &DMatrix<f64>, pi: usize, pj: usize) -> Self {
        let a = Matrix2::new(
            corr[(pi, pi)],
            corr[(pi, pi + 1)],
            corr[(pi + 1, pi)],
            corr[(pi + 1, pi + 1)],
        );
        let b = Matrix2::new(
            corr[(pj, pj)],
            corr[(pj, pj + 1)],
            corr[(pj + 1, pj)],
            corr[(pj + 1, pj + 1)],
        );
        let c = Matrix2::new(
            corr[(pi, pj)],
            corr[(pi, pj + 1)],
            corr[(pi + 1, pj)],
            corr[(pi + 1, pj + 1)],
        );
        let idx = [pi, pi + 1, pj, pj + 1];
        let joint = Matrix4::from_fn(|r, k| corr[(idx[r], idx[k])]);
        Self {
            i1: a.determinant(),
            i2: b.determinant(),
            i3: c.determinant(),
            i4: joint.determinant(),
        }
    }
}

fn sqrt(value: f64) -> Result<f64, UndefinedReason> {
    // Pure states sit exactly on zero; allow round-off below it.
    if value < 0.0 && value > -1e-12 {
        return Ok(0.0);
    }
    if value < 0.0 {
        Err(UndefinedReason::NegativeRadicand)
    } else {
        Ok(value.sqrt())
    }
}

/// `(x+½)log10(x+½) − (x−½)log10(x−½)`, continuous at `x = ½`.
fn entropy(x: f64) -> Result<f64, UndefinedReason> {
    let mut lo = x - 0.5;
    // Round-off around the vacuum value, amplified by the square roots above.
    if lo < 0.0 && lo > -1e-6 {
        lo = 0.0;
    }
    if lo < 0.0 {
        return Err(UndefinedReason::NonPositiveLog);
    }
    let hi = x + 0.5;
    let lo_term = if lo == 0.0 { 0.0 } else { lo * lo.log10() };
    Ok(hi * hi.log10() - lo_term)
}

/// Symplectic eigenvalues `μ±` for the given `Σ`.
fn symplectic_pair(sigma: f64, i4: f64) -> Result<(f64, f64), UndefinedReason> {
    let root = sqrt(sigma * sigma - 4.0 * i4)?;
    Ok((sqrt((sigma + root) / 2.0)?, sqrt((sigma - root) / 2.0)?))
}

fn discord_w(inv: &Invariants) -> Result<f64, UndefinedReason> {
    let Invariants { i1, i2, i3, i4 } = *inv;
    let ratio = 4.0 * (i1 * i2 - i4).powi(2) / (i1 + 4.0 * i4) / (1.0 + 4.0 * i2) / (i3 * i3);
    let w = if ratio <= 1.0 {
        let num = 2.0 * i3.abs() + sqrt(4.0 * i3 * i3 + (4.0 * i2 - 1.0) * (4.0 * i4 - i1))?;
        (num / (4.0 * i2 - 1.0)).powi(2)
    } else {
        let a = i1 * i2 + i4 - i3 * i3;
        (a - sqrt(a * a - 4.0 * i1 * i2 * i4)?) / 2.0 / i2
    };
    if w.is_finite() {
        Ok(w)
    } else {
        Err(UndefinedReason::NonFinite)
    }
}

fn discord_value(inv: &Invariants) -> Result<f64, UndefinedReason> {
    let sigma = inv.i1 + inv.i2 + 2.0 * inv.i3;
    let (mu_plus, mu_minus) = symplectic_pair(sigma, inv.i4)?;
    let w = discord_w(inv)?;
    Ok(entropy(sqrt(inv.i2)?)? - entropy(mu_plus)? - entropy(mu_minus)? + entropy(sqrt(w)?)?)
}

/// Gaussian quantum discord between the two modes.
pub fn discord(corr: &DMatrix<f64>, pi: usize, pj: usize) -> MeasureValue {
    discord_value(&Invariants::new(corr, pi, pj)).into()
}

fn log_negativity_value(inv: &Invariants) -> Result<f64, UndefinedReason> {
    let sigma = inv.i1 + inv.i2 - 2.0 * inv.i3;
    let (_, mu_minus) = symplectic_pair(sigma, inv.i4)?;
    if mu_minus <= 0.0 {
        return Err(UndefinedReason::NonPositiveLog);
    }
    Ok((-(2.0 * mu_minus).ln()).max(0.0))
}

/// Logarithmic negativity, `max(0, −ln 2μ₋)` of the partially transposed state.
pub fn log_negativity(corr: &DMatrix<f64>, pi: usize, pj: usize) -> MeasureValue {
    log_negativity_value(&Invariants::new(corr, pi, pj)).into()
}

/// Complete synchronization, `1 / (⟨q₋²⟩ + ⟨p₋²⟩)`.
pub fn sync_complete(corr: &DMatrix<f64>, pi: usize, pj: usize) -> MeasureValue {
    let q = 0.5 * (corr[(pi, pi)] + corr[(pj, pj)] - 2.0 * corr[(pi, pj)]);
    let p = 0.5 * (corr[(pi + 1, pi + 1)] + corr[(pj + 1, pj + 1)] - 2.0 * corr[(pi + 1, pj + 1)]);
    let denom = q + p;
    if denom == 0.0 {
        return MeasureValue::Undefined(UndefinedReason::DivisionByZero);
    }
    MeasureValue::finite(1.0 / denom)
}

/// Variance of the momentum of one mode rotated by `arg`.
fn rotated_momentum_variance(corr: &DMatrix<f64>, p: usize, arg: f64) -> f64 {
    let (s, c) = arg.sin_cos();
    s * s * corr[(p, p)] - s * c * corr[(p, p + 1)] - c * s * corr[(p + 1, p)]
        + c * c * corr[(p + 1, p + 1)]
}

/// Covariance of the rotated momenta of the two modes.
fn rotated_cross(corr: &DMatrix<f64>, pi: usize, pj: usize, arg_i: f64, arg_j: f64) -> f64 {
    let (si, ci) = arg_i.sin_cos();
    let (sj, cj) = arg_j.sin_cos();
    si * sj * corr[(pi, pj)] - si * cj * corr[(pi, pj + 1)] - ci * sj * corr[(pi + 1, pj)]
        + ci * cj * corr[(pi + 1, pj + 1)]
}

/// Phase synchronization, `1 / (2 ⟨p'₋²⟩)` with momenta rotated by the mode phases.
pub fn sync_phase(corr: &DMatrix<f64>, pi: usize, pj: usize, arg_i: f64, arg_j: f64) -> MeasureValue {
    let p_i = rotated_momentum_variance(corr, pi, arg_i);
    let p_j = rotated_momentum_variance(corr, pj, arg_j);
    let p_ij = rotated_cross(corr, pi, pj, arg_i, arg_j);
    let p_minus = 0.5 * (p_i + p_j - 2.0 * p_ij);
    if p_minus == 0.0 {
        return MeasureValue::Undefined(UndefinedReason::DivisionByZero);
    }
    MeasureValue::finite(0.5 / p_minus)
}

/// Cross-correlation of the two rotated momentum quadratures.
pub fn sync_phase_rotated(
    corr: &DMatrix<f64>,
    pi: usize,
    pj: usize,
    arg_i: f64,
    arg_j: f64,
) -> MeasureValue {
    MeasureValue::finite(rotated_cross(corr, pi, pj, arg_i, arg_j))
}

#[cfg(test)]
mod tests {
    use super::{discord, log_negativity, sync_complete, sync_phase, sync_phase_rotated, Invariants};
    use crate::measures::{MeasureValue, UndefinedReason};
    use nalgebra::DMatrix;
    use std::f64::consts::FRAC_PI_2;

    /// Two-mode squeezed vacuum with squeezing `r`.
    fn two_mode_squeezed(r: f64) -> DMatrix<f64> {
        let a = (2.0 * r).cosh() / 2.0;
        let c = (2.0 * r).sinh() / 2.0;
        DMatrix::from_row_slice(
            4,
            4,
            &[
                a, 0.0, c, 0.0, //
                0.0, a, 0.0, -c, //
                c, 0.0, a, 0.0, //
                0.0, -c, 0.0, a,
            ],
        )
    }

    #[test]
    fn invariants_of_squeezed_state() {
        let r: f64 = 0.3;
        let inv = Invariants::new(&two_mode_squeezed(r), 0, 2);
        let a = (2.0 * r).cosh() / 2.0;
        let c = (2.0 * r).sinh() / 2.0;
        assert!((inv.i1 - a * a).abs() < 1e-12);
        assert!((inv.i2 - a * a).abs() < 1e-12);
        assert!((inv.i3 + c * c).abs() < 1e-12);
        assert!((inv.i4 - 1.0 / 16.0).abs() < 1e-12);
    }

    #[test]
    fn log_negativity_of_squeezed_state_is_twice_r() {
        let value = log_negativity(&two_mode_squeezed(0.5), 0, 2);
        assert!((value.value().unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn identity_has_zero_log_negativity() {
        let value = log_negativity(&DMatrix::identity(4, 4), 0, 2);
        assert_eq!(value, MeasureValue::Computed(0.0));
    }

    #[test]
    fn squeezed_state_carries_discord() {
        let value = discord(&two_mode_squeezed(0.5), 0, 2).value().unwrap();
        assert!(value > 0.0);
    }

    #[test]
    fn negative_radicand_is_undefined() {
        // Unphysical block with a negative determinant.
        let corr = DMatrix::from_row_slice(
            4,
            4,
            &[
                0.5, 0.0, 0.0, 0.0, //
                0.0, 0.5, 0.0, 0.0, //
                0.0, 0.0, -0.5, 0.0, //
                0.0, 0.0, 0.0, 0.5,
            ],
        );
        assert_eq!(
            discord(&corr, 0, 2),
            MeasureValue::Undefined(UndefinedReason::NegativeRadicand)
        );
    }

    #[test]
    fn sync_complete_needs_a_non_zero_denominator() {
        let mut corr = DMatrix::from_element(4, 4, 0.5);
        assert_eq!(
            sync_complete(&corr, 0, 2),
            MeasureValue::Undefined(UndefinedReason::DivisionByZero)
        );
        corr[(0, 2)] = 0.0;
        assert_eq!(sync_complete(&corr, 0, 2), MeasureValue::Computed(2.0));
    }

    #[test]
    fn rotation_picks_the_right_quadratures() {
        let mut corr = DMatrix::from_diagonal_element(4, 4, 0.5);
        corr[(1, 3)] = 0.2;
        corr[(3, 1)] = 0.2;
        corr[(0, 2)] = -0.1;
        corr[(2, 0)] = -0.1;
        // No rotation: momentum covariance.
        let unrotated = sync_phase_rotated(&corr, 0, 2, 0.0, 0.0).value().unwrap();
        assert!((unrotated - 0.2).abs() < 1e-12);
        // Quarter turn on both: position covariance.
        let rotated = sync_phase_rotated(&corr, 0, 2, FRAC_PI_2, FRAC_PI_2).value().unwrap();
        assert!((rotated + 0.1).abs() < 1e-12);

        // p'_- variance = 0.5 * (0.5 + 0.5 - 0.4) = 0.3.
        let phase = sync_phase(&corr, 0, 2, 0.0, 0.0).value().unwrap();
        assert!((phase - 0.5 / 0.3).abs() < 1e-12);
    }
}
