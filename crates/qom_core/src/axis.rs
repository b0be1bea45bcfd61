//! Sweep axes.
//!
//! [`StaticAxis`] holds the values a sweep iterates over, [`MultiAxis`] adds
//! per-value legend data for multi-curve sweeps, and [`DynamicAxis`] records
//! the axis value actually paired with each result.

use crate::loopers::{Grid, GridIndex};
use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const DEFAULT_TICK_DIM: usize = 5;

#[derive(Debug, Error, PartialEq)]
pub enum AxisError {
    #[error("axis '{0}' needs either explicit values or both min and max")]
    MissingBounds(String),
    #[error("axis '{0}' has zero steps")]
    ZeroSteps(String),
    #[error("axis '{0}' has min == max with {1} steps")]
    DegenerateRange(String, usize),
    #[error("axis '{0}' uses a log scale but its bounds are not positive")]
    NonPositiveLogBounds(String),
    #[error("axis '{0}' has an empty tick range")]
    EmptyTicks(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AxisScale {
    #[default]
    Linear,
    Log,
}

/// Whether tick bounds were fixed by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AxisBound {
    #[default]
    None,
    Lower,
    Upper,
    Both,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AxisValue {
    Number(f64),
    Label(String),
}

/// Axis description as it appears in a sweep configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AxisSpec {
    pub var: String,
    pub name: Option<String>,
    pub unit: Option<String>,
    pub label: Option<String>,
    pub values: Option<Vec<AxisValue>>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    #[serde(alias = "dim")]
    pub steps: Option<usize>,
    pub scale: AxisScale,
    pub ticks: Option<Vec<f64>>,
    pub tick_min: Option<f64>,
    pub tick_max: Option<f64>,
    pub tick_dim: Option<usize>,
    pub tick_labels: Option<Vec<String>>,
    pub legends: Option<Vec<String>>,
    pub colors: Option<Vec<String>>,
    pub styles: Option<Vec<String>>,
    pub sizes: Option<Vec<f64>>,
}

impl AxisSpec {
    pub fn range(var: &str, min: f64, max: f64, steps: usize) -> Self {
        Self {
            var: var.to_string(),
            min: Some(min),
            max: Some(max),
            steps: Some(steps),
            ..Self::default()
        }
    }

    pub fn values(var: &str, values: &[f64]) -> Self {
        Self {
            var: var.to_string(),
            values: Some(values.iter().map(|v| AxisValue::Number(*v)).collect()),
            ..Self::default()
        }
    }
}

/// Evenly spaced values including both endpoints.
pub fn linspace(min: f64, max: f64, num: usize) -> Vec<f64> {
    match num {
        0 => Vec::new(),
        1 => vec![min],
        _ => {
            let step = (max - min) / (num - 1) as f64;
            let mut out: Vec<f64> = (0..num).map(|i| min + i as f64 * step).collect();
            out[num - 1] = max;
            out
        }
    }
}

fn logspace(min: f64, max: f64, num: usize) -> Vec<f64> {
    linspace(min.log10(), max.log10(), num)
        .into_iter()
        .map(|e| 10f64.powf(e))
        .collect()
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Single-valued continuous axis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StaticAxis {
    pub var: String,
    pub name: String,
    pub unit: String,
    pub label: String,
    pub values: Vec<f64>,
    pub dim: usize,
    pub scale: AxisScale,
    pub ticks: Vec<f64>,
    pub tick_labels: Vec<String>,
    pub bound: AxisBound,
}

impl StaticAxis {
    pub fn new(spec: &AxisSpec) -> Result<Self> {
        let mut labels_from_values = None;
        let values = match &spec.values {
            Some(vals) if !vals.is_empty() => {
                if vals.iter().all(|v| matches!(v, AxisValue::Number(_))) {
                    vals.iter()
                        .map(|v| match v {
                            AxisValue::Number(x) => *x,
                            AxisValue::Label(_) => f64::NAN,
                        })
                        .collect()
                } else {
                    // Categorical axis: positions 1..=n carry the labels.
                    let labels: Vec<String> = vals
                        .iter()
                        .map(|v| match v {
                            AxisValue::Number(x) => format!("{x}"),
                            AxisValue::Label(s) => s.clone(),
                        })
                        .collect();
                    let positions = (1..=labels.len()).map(|i| i as f64).collect();
                    labels_from_values = Some(labels);
                    positions
                }
            }
            _ => Self::generate(spec)?,
        };

        let (lo, hi) = values
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                (lo.min(*v), hi.max(*v))
            });

        let mut bound = match (spec.tick_min.is_some(), spec.tick_max.is_some()) {
            (true, true) => AxisBound::Both,
            (true, false) => AxisBound::Lower,
            (false, true) => AxisBound::Upper,
            (false, false) => AxisBound::None,
        };

        let mut ticks = match &spec.ticks {
            Some(t) if !t.is_empty() => {
                bound = AxisBound::Both;
                t.clone()
            }
            _ => {
                let tick_dim = spec.tick_dim.unwrap_or(DEFAULT_TICK_DIM);
                if tick_dim == 0 {
                    return Err(AxisError::EmptyTicks(spec.var.clone()).into());
                }
                linspace(
                    spec.tick_min.unwrap_or(lo),
                    spec.tick_max.unwrap_or(hi),
                    tick_dim,
                )
            }
        };

        let tick_labels = match spec.tick_labels.clone().or(labels_from_values) {
            Some(labels) if !labels.is_empty() => {
                bound = AxisBound::Both;
                labels
            }
            _ => ticks.iter().map(|t| format!("{t}")).collect(),
        };
        if tick_labels.len() != ticks.len() {
            ticks = linspace(1.0, tick_labels.len() as f64, tick_labels.len());
        }

        let name = spec.name.clone().unwrap_or_else(|| spec.var.clone());
        let unit = spec.unit.clone().unwrap_or_default();
        let label = spec.label.clone().unwrap_or_else(|| name.clone());

        Ok(Self {
            var: spec.var.clone(),
            name,
            unit,
            label,
            dim: values.len(),
            values,
            scale: spec.scale,
            ticks,
            tick_labels,
            bound,
        })
    }

    fn generate(spec: &AxisSpec) -> Result<Vec<f64>> {
        let (min, max) = match (spec.min, spec.max) {
            (Some(min), Some(max)) => (min, max),
            _ => return Err(AxisError::MissingBounds(spec.var.clone()).into()),
        };
        let steps = spec.steps.unwrap_or(DEFAULT_TICK_DIM);
        if steps == 0 {
            return Err(AxisError::ZeroSteps(spec.var.clone()).into());
        }
        if steps == 1 {
            return Ok(vec![min]);
        }
        if max == min {
            return Err(AxisError::DegenerateRange(spec.var.clone(), steps).into());
        }

        match spec.scale {
            AxisScale::Log => {
                if min <= 0.0 || max <= 0.0 {
                    return Err(AxisError::NonPositiveLogBounds(spec.var.clone()).into());
                }
                Ok(logspace(min, max, steps))
            }
            AxisScale::Linear => {
                let decimals = ((steps - 1) as f64 / (max - min).abs()).log10().ceil() as i32;
                Ok(linspace(min, max, steps)
                    .into_iter()
                    .map(|v| round_to(v, decimals))
                    .collect())
            }
        }
    }

    pub fn get(&self, index: usize) -> Result<f64> {
        self.values.get(index).copied().ok_or_else(|| {
            anyhow!(
                "Index {} out of range for axis '{}' with {} values.",
                index,
                self.var,
                self.dim
            )
        })
    }
}

/// Multi-valued axis: one curve per value, each with legend and line style.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MultiAxis {
    pub axis: StaticAxis,
    pub legends: Vec<String>,
    pub colors: Vec<String>,
    pub styles: Vec<String>,
    pub sizes: Vec<f64>,
}

impl MultiAxis {
    pub fn new(spec: &AxisSpec) -> Result<Self> {
        let axis = StaticAxis::new(spec)?;
        let dim = axis.dim;

        let legends = match &spec.legends {
            Some(l) if l.len() == dim => l.clone(),
            _ => axis
                .values
                .iter()
                .map(|v| format!("{} = {} {}", axis.name, v, axis.unit).trim_end().to_string())
                .collect(),
        };
        let colors = pick_or(&spec.colors, dim, || "r".to_string());
        let styles = pick_or(&spec.styles, dim, || "-".to_string());
        let sizes = pick_or(&spec.sizes, dim, || 2.0);

        Ok(Self {
            axis,
            legends,
            colors,
            styles,
            sizes,
        })
    }

    pub fn var(&self) -> &str {
        &self.axis.var
    }

    pub fn values(&self) -> &[f64] {
        &self.axis.values
    }

    pub fn dim(&self) -> usize {
        self.axis.dim
    }
}

fn pick_or<T: Clone>(supplied: &Option<Vec<T>>, dim: usize, default: impl Fn() -> T) -> Vec<T> {
    match supplied {
        Some(v) if v.len() == dim => v.clone(),
        _ => (0..dim).map(|_| default()).collect(),
    }
}

/// Axis values recorded in lock-step with the results of a sweep.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DynamicAxis {
    pub var: String,
    pub values: Grid,
}

impl DynamicAxis {
    pub fn one_d(var: &str) -> Self {
        Self {
            var: var.to_string(),
            values: Grid::OneD(Vec::new()),
        }
    }

    pub fn two_d(var: &str) -> Self {
        Self {
            var: var.to_string(),
            values: Grid::TwoD(Vec::new()),
        }
    }

    /// Appends `value` once per result produced at that axis point.
    pub fn push_repeated(&mut self, value: f64, count: usize) -> Result<()> {
        match &mut self.values {
            Grid::OneD(v) => {
                v.extend(std::iter::repeat(value).take(count));
                Ok(())
            }
            Grid::TwoD(_) => bail!("Cannot push scalars onto row-structured axis '{}'.", self.var),
        }
    }

    pub fn push_row(&mut self, row: Vec<f64>) -> Result<()> {
        match &mut self.values {
            Grid::TwoD(rows) => {
                rows.push(row);
                Ok(())
            }
            Grid::OneD(_) => bail!("Cannot push rows onto flat axis '{}'.", self.var),
        }
    }

    pub fn get(&self, index: GridIndex) -> Result<f64> {
        self.values.get(index).ok_or_else(|| {
            anyhow!(
                "Index {:?} out of range for axis '{}'.",
                index,
                self.var
            )
        })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
