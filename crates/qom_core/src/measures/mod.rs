//! Reduction of trajectories to scalar measures.
//!
//! Each stacked instance holds `modes` complex mode amplitudes followed by
//! the `(2 modes)^2` quadrature correlation matrix in row-major order. The
//! correlation reducers work on that matrix; the phase difference works on
//! the mode amplitudes.

pub mod correlations;
pub mod differences;

use crate::dynamics::{instance_trajectory, Trajectory};
use crate::system::StackConstants;
use anyhow::{anyhow, bail, Result};
use nalgebra::DMatrix;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::warn;

/// Why a measure has no value at a sample.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UndefinedReason {
    #[error("negative radicand")]
    NegativeRadicand,
    #[error("non-positive logarithm argument")]
    NonPositiveLog,
    #[error("division by zero")]
    DivisionByZero,
    #[error("non-finite value")]
    NonFinite,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasureValue {
    Computed(f64),
    Undefined(UndefinedReason),
}

impl MeasureValue {
    pub(crate) fn finite(value: f64) -> Self {
        if value.is_finite() {
            MeasureValue::Computed(value)
        } else {
            MeasureValue::Undefined(UndefinedReason::NonFinite)
        }
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            MeasureValue::Computed(v) => Some(*v),
            MeasureValue::Undefined(_) => None,
        }
    }

    /// Value for array output: undefined samples read as zero.
    pub fn value_or_zero(&self) -> f64 {
        self.value().unwrap_or(0.0)
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, MeasureValue::Undefined(_))
    }
}

impl From<Result<f64, UndefinedReason>> for MeasureValue {
    fn from(result: Result<f64, UndefinedReason>) -> Self {
        match result {
            Ok(v) => MeasureValue::finite(v),
            Err(reason) => MeasureValue::Undefined(reason),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasureCode {
    Discord,
    LogNegativity,
    SyncComplete,
    SyncPhase,
    SyncPhaseRotated,
    PhaseDifference,
}

impl MeasureCode {
    pub fn as_str(self) -> &'static str {
        match self {
            MeasureCode::Discord => "discord",
            MeasureCode::LogNegativity => "log_negativity",
            MeasureCode::SyncComplete => "sync_complete",
            MeasureCode::SyncPhase => "sync_phase",
            MeasureCode::SyncPhaseRotated => "sync_phase_rotated",
            MeasureCode::PhaseDifference => "phase_difference",
        }
    }

    pub fn uses_correlations(self) -> bool {
        !matches!(self, MeasureCode::PhaseDifference)
    }
}

/// Signal extracted from a mode amplitude for the phase difference.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quadrature {
    /// Modulus of the amplitude.
    #[default]
    Mode,
    /// Position quadrature, `Re(a)·√2`.
    Pos,
    /// Momentum quadrature, `Im(a)·√2`.
    Mom,
}

impl Quadrature {
    pub fn as_str(self) -> &'static str {
        match self {
            Quadrature::Mode => "mode",
            Quadrature::Pos => "pos",
            Quadrature::Mom => "mom",
        }
    }

    pub fn extract(self, value: Complex64) -> f64 {
        match self {
            Quadrature::Mode => value.norm(),
            Quadrature::Pos => (value * std::f64::consts::SQRT_2).re,
            Quadrature::Mom => (value * std::f64::consts::SQRT_2).im,
        }
    }
}

fn default_mode_j() -> usize {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasureSpec {
    pub code: MeasureCode,
    /// Number of modes per instance. Filled from the system when absent.
    #[serde(default)]
    pub modes: Option<usize>,
    #[serde(default)]
    pub mode_i: usize,
    #[serde(default = "default_mode_j")]
    pub mode_j: usize,
    #[serde(default)]
    pub quad: Quadrature,
}

impl MeasureSpec {
    pub fn new(code: MeasureCode, modes: usize, mode_i: usize, mode_j: usize) -> Self {
        Self {
            code,
            modes: Some(modes),
            mode_i,
            mode_j,
            quad: Quadrature::Mode,
        }
    }

    pub fn with_default_modes(&self, modes: usize) -> Self {
        let mut spec = self.clone();
        spec.modes.get_or_insert(modes);
        spec
    }

    /// Short tag used in cache file names.
    pub fn tag(&self) -> String {
        match self.code {
            MeasureCode::PhaseDifference => format!("{}_{}", self.code.as_str(), self.quad.as_str()),
            code => code.as_str().to_string(),
        }
    }

    fn validate(&self) -> Result<usize> {
        let modes = self
            .modes
            .ok_or_else(|| anyhow!("Measure '{}' needs the number of modes.", self.code.as_str()))?;
        for (label, idx) in [("mode_i", self.mode_i), ("mode_j", self.mode_j)] {
            if idx >= modes {
                bail!(
                    "{} = {} is out of range for {} modes.",
                    label,
                    idx,
                    modes
                );
            }
        }
        Ok(modes)
    }
}

/// Correlation matrix stored after the mode amplitudes of one sample.
pub fn correlation_matrix(sample: &[Complex64], modes: usize) -> Result<DMatrix<f64>> {
    let n = 2 * modes;
    let needed = modes + n * n;
    if sample.len() < needed {
        bail!(
            "Sample has {} values but {} modes need {} (amplitudes + correlations).",
            sample.len(),
            modes,
            needed
        );
    }
    Ok(DMatrix::from_row_slice(
        n,
        n,
        &sample[modes..needed].iter().map(|c| c.re).collect::<Vec<_>>(),
    ))
}

/// Measure value at every sample of a single-instance trajectory.
pub fn reduce(trajectory: &[Vec<Complex64>], spec: &MeasureSpec) -> Result<Vec<MeasureValue>> {
    let modes = spec.validate()?;
    let values = if spec.code.uses_correlations() {
        let pi = 2 * spec.mode_i;
        let pj = 2 * spec.mode_j;
        trajectory
            .iter()
            .map(|sample| {
                let corr = correlation_matrix(sample, modes)?;
                let arg_i = sample[spec.mode_i].arg();
                let arg_j = sample[spec.mode_j].arg();
                Ok(match spec.code {
                    MeasureCode::Discord => correlations::discord(&corr, pi, pj),
                    MeasureCode::LogNegativity => correlations::log_negativity(&corr, pi, pj),
                    MeasureCode::SyncComplete => correlations::sync_complete(&corr, pi, pj),
                    MeasureCode::SyncPhase => {
                        correlations::sync_phase(&corr, pi, pj, arg_i, arg_j)
                    }
                    MeasureCode::SyncPhaseRotated => {
                        correlations::sync_phase_rotated(&corr, pi, pj, arg_i, arg_j)
                    }
                    MeasureCode::PhaseDifference => {
                        bail!("phase_difference is not a correlation measure.")
                    }
                })
            })
            .collect::<Result<Vec<_>>>()?
    } else {
        let mut signal_i = Vec::with_capacity(trajectory.len());
        let mut signal_j = Vec::with_capacity(trajectory.len());
        for sample in trajectory {
            if sample.len() < modes {
                bail!("Sample has {} values but {} modes are expected.", sample.len(), modes);
            }
            signal_i.push(spec.quad.extract(sample[spec.mode_i]));
            signal_j.push(spec.quad.extract(sample[spec.mode_j]));
        }
        differences::phase_difference(&signal_i, &signal_j)?
            .into_iter()
            .map(MeasureValue::finite)
            .collect()
    };

    for (k, value) in values.iter().enumerate() {
        if let MeasureValue::Undefined(reason) = value {
            warn!(
                measure = spec.code.as_str(),
                sample = k,
                %reason,
                "measure undefined, reported as 0"
            );
        }
    }
    Ok(values)
}

/// Splits a stacked trajectory and reduces every instance.
pub fn reduce_stacked(
    trajectory: &Trajectory,
    constants: &StackConstants,
    spec: &MeasureSpec,
) -> Result<Vec<Vec<MeasureValue>>> {
    (0..constants.instance_count())
        .map(|i| reduce(&instance_trajectory(trajectory, constants, i)?, spec))
        .collect()
}

/// Part of a measure series used for aggregation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SpanMode {
    #[default]
    All,
    /// The last `n` samples.
    End(usize),
    /// Samples `a..b`.
    Range(usize, usize),
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid span '{0}': expected 'all', 'end N' or 'range a:b'")]
pub struct SpanParseError(String);

impl FromStr for SpanMode {
    type Err = SpanParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || SpanParseError(s.to_string());
        let trimmed = s.trim();
        if trimmed == "all" {
            return Ok(SpanMode::All);
        }
        if let Some(rest) = trimmed.strip_prefix("end") {
            let n = rest.trim().parse().map_err(|_| err())?;
            return Ok(SpanMode::End(n));
        }
        if let Some(rest) = trimmed.strip_prefix("range") {
            let (a, b) = rest.trim().split_once(':').ok_or_else(err)?;
            let a = a.trim().parse().map_err(|_| err())?;
            let b = b.trim().parse().map_err(|_| err())?;
            return Ok(SpanMode::Range(a, b));
        }
        Err(err())
    }
}

impl TryFrom<String> for SpanMode {
    type Error = SpanParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SpanMode> for String {
    fn from(span: SpanMode) -> Self {
        span.to_string()
    }
}

impl fmt::Display for SpanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpanMode::All => write!(f, "all"),
            SpanMode::End(n) => write!(f, "end {n}"),
            SpanMode::Range(a, b) => write!(f, "range {a}:{b}"),
        }
    }
}

impl SpanMode {
    /// Selected samples, clipped to the series like a slice range.
    pub fn select<'v>(&self, values: &'v [f64]) -> Result<&'v [f64]> {
        let len = values.len();
        let selected = match *self {
            SpanMode::All => values,
            SpanMode::End(n) => &values[len.saturating_sub(n)..],
            SpanMode::Range(a, b) => {
                let a = a.min(len);
                let b = b.min(len);
                if a >= b {
                    &values[0..0]
                } else {
                    &values[a..b]
                }
            }
        };
        if selected.is_empty() {
            bail!("Span '{}' selects no samples out of {}.", self, len);
        }
        Ok(selected)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    #[default]
    Mean,
    Max,
    Min,
    /// Midpoint of the extrema, `(max + min) / 2`.
    #[serde(alias = "max_min")]
    MinMax,
}

impl Aggregation {
    pub fn apply(&self, values: &[f64]) -> Result<f64> {
        if values.is_empty() {
            bail!("Cannot aggregate an empty series.");
        }
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        Ok(match self {
            Aggregation::Mean => values.iter().sum::<f64>() / values.len() as f64,
            Aggregation::Max => max,
            Aggregation::Min => min,
            Aggregation::MinMax => (max + min) / 2.0,
        })
    }
}
