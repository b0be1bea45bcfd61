//! Sweep engine.
//!
//! A [`Looper`] walks parameter grids over a [`SweepSystem`], evaluating
//! properties or integrating dynamics at every point, and returns the values
//! together with the threshold position and the axes used.

pub mod dynamics;
pub mod measures;
pub mod properties;

use crate::axis::DynamicAxis;
use crate::params::Params;
use crate::system::SweepSystem;
use crate::threshold::{threshold_index, ThresholdMode};
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// Sweep values, flat or row-structured. Rows may differ in length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Grid {
    OneD(Vec<f64>),
    TwoD(Vec<Vec<f64>>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GridIndex {
    One(usize),
    Two(usize, usize),
}

impl Grid {
    /// Number of cells.
    pub fn len(&self) -> usize {
        match self {
            Grid::OneD(v) => v.len(),
            Grid::TwoD(rows) => rows.iter().map(Vec::len).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: GridIndex) -> Option<f64> {
        match (self, index) {
            (Grid::OneD(v), GridIndex::One(i)) => v.get(i).copied(),
            (Grid::TwoD(rows), GridIndex::Two(i, j)) => rows.get(i)?.get(j).copied(),
            _ => None,
        }
    }
}

/// Values of a sweep, their threshold and the axes they were computed over.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepResult {
    pub values: Grid,
    /// Axis variable name to the axis value at the threshold; 2D property
    /// sweeps add `"value"` with the extremal value itself.
    pub thresholds: BTreeMap<String, f64>,
    pub axes: BTreeMap<String, Grid>,
}

impl SweepResult {
    pub(crate) fn new(values: Grid) -> Self {
        Self {
            values,
            thresholds: BTreeMap::new(),
            axes: BTreeMap::new(),
        }
    }

    pub(crate) fn with_axis(mut self, var: &str, values: Grid) -> Self {
        self.axes.insert(var.to_string(), values);
        self
    }

    pub(crate) fn with_threshold(mut self, var: &str, value: f64) -> Self {
        self.thresholds.insert(var.to_string(), value);
        self
    }

    pub(crate) fn with_dynamic_axis(self, axis: DynamicAxis) -> Self {
        let var = axis.var.clone();
        self.with_axis(&var, axis.values)
    }
}

/// Progress of a running sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepProgress {
    pub position: usize,
    pub total: usize,
    pub status: String,
}

impl fmt::Display for SweepProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let percent = if self.total == 0 {
            100.0
        } else {
            100.0 * self.position as f64 / self.total as f64
        };
        write!(f, "{} ({:.2}%)", self.status, percent)
    }
}

type ProgressFn<'a> = Box<dyn FnMut(&SweepProgress) + 'a>;

pub struct Looper<'a, S: SweepSystem> {
    pub(crate) system: &'a S,
    pub(crate) base: Params,
    progress: Option<ProgressFn<'a>>,
}

impl<'a, S: SweepSystem> Looper<'a, S> {
    pub fn new(system: &'a S) -> Self {
        Self {
            base: system.params(),
            system,
            progress: None,
        }
    }

    /// Overrides the base parameters every grid point is derived from.
    pub fn with_params(mut self, params: Params) -> Self {
        self.base = params;
        self
    }

    pub fn on_progress(mut self, callback: impl FnMut(&SweepProgress) + 'a) -> Self {
        self.progress = Some(Box::new(callback));
        self
    }

    pub fn base_params(&self) -> &Params {
        &self.base
    }

    pub(crate) fn report(&mut self, position: usize, total: usize, status: &str) {
        let progress = SweepProgress {
            position,
            total,
            status: status.to_string(),
        };
        debug!(system = self.system.code(), "{}", progress);
        if let Some(callback) = self.progress.as_mut() {
            callback(&progress);
        }
    }
}

/// How an axis lines up with the cells of a result grid.
#[derive(Debug, Clone, Copy)]
pub(crate) enum AxisRef<'g> {
    /// One axis value per cell.
    Cells(&'g Grid),
    /// One axis value per row (or per cell of a flat grid).
    Rows(&'g [f64]),
    /// One axis value per column.
    Cols(&'g [f64]),
}

impl AxisRef<'_> {
    fn lookup(&self, index: GridIndex) -> Option<f64> {
        match (*self, index) {
            (AxisRef::Cells(grid), _) => grid.get(index),
            (AxisRef::Rows(values), GridIndex::One(i) | GridIndex::Two(i, _)) => {
                values.get(i).copied()
            }
            (AxisRef::Cols(values), GridIndex::One(j) | GridIndex::Two(_, j)) => {
                values.get(j).copied()
            }
        }
    }
}

/// Locates the threshold of `values` and reads every axis at that position.
pub(crate) fn locate_threshold(
    values: &Grid,
    mode: ThresholdMode,
    axes: &[(&str, AxisRef<'_>)],
) -> Result<(GridIndex, BTreeMap<String, f64>)> {
    let index = threshold_index(values, mode)?;
    let mut out = BTreeMap::new();
    for (var, axis) in axes {
        let value = axis
            .lookup(index)
            .ok_or_else(|| anyhow!("Axis '{}' does not cover threshold index {:?}.", var, index))?;
        out.insert(var.to_string(), value);
    }
    debug!(?index, ?mode, "threshold located");
    Ok((index, out))
}

#[cfg(test)]
pub(crate) mod test_systems {
    use crate::params::Params;
    use crate::system::{
        GradientOptions, PropertyRegistry, PropertyValue, StackConstants, SweepSystem,
    };
    use anyhow::{bail, Result};
    use num_complex::Complex64;
    use std::cell::Cell;

    /// Algebraic test model: `square = x^2 + y`, `roots = ±sqrt(x)`,
    /// `grad_div = y * x^2`. Gradients are read at `x = 0.5`.
    ///
    /// Its dynamics rotate two modes at `w` and `2w` under a constant
    /// diagonal correlation block of `0.5 + y`, so complete synchronization
    /// reads `1 / (1 + 2y)`. `rhs_calls` counts right-hand side evaluations.
    pub struct Quadratic {
        pub rhs_calls: Cell<usize>,
        pub code: String,
    }

    impl Quadratic {
        pub fn new() -> Self {
            Self {
                rhs_calls: Cell::new(0),
                code: "quadratic".to_string(),
            }
        }
    }

    impl SweepSystem for Quadratic {
        fn code(&self) -> &str {
            &self.code
        }

        fn params(&self) -> Params {
            [("x", 0.0), ("y", 0.0), ("w", 1.0)].into_iter().collect()
        }

        fn properties(&self) -> PropertyRegistry<Self> {
            PropertyRegistry::new()
                .with("square", |_, p| {
                    Ok(PropertyValue::Scalar(p.get("x")?.powi(2) + p.get("y")?))
                })
                .with("roots", |_, p| {
                    let x = p.get("x")?;
                    if x < 0.0 {
                        return Ok(PropertyValue::Branches(vec![]));
                    }
                    Ok(PropertyValue::Branches(vec![x.sqrt(), -x.sqrt()]))
                })
                .with("grad_div", |_, p| {
                    Ok(PropertyValue::Scalar(p.get("y")? * p.get("x")?.powi(2)))
                })
                .with("fails", |_, _| bail!("property evaluation failed"))
        }

        fn gradient_options(&self, _params: &Params) -> Result<GradientOptions> {
            Ok(GradientOptions {
                position: 0.5,
                ..GradientOptions::default()
            })
        }

        fn modes(&self) -> usize {
            2
        }

        fn initial_values(&self, params: &Params) -> Result<Vec<Complex64>> {
            let noise = 0.5 + params.get("y")?;
            let mut iv = vec![Complex64::new(1.0, 0.0), Complex64::new(1.0, 0.0)];
            for r in 0..4 {
                for c in 0..4 {
                    iv.push(Complex64::new(if r == c { noise } else { 0.0 }, 0.0));
                }
            }
            Ok(iv)
        }

        fn f_multi_complex(
            &self,
            _t: f64,
            y: &[Complex64],
            constants: &StackConstants,
            out: &mut [Complex64],
        ) -> Result<()> {
            self.rhs_calls.set(self.rhs_calls.get() + 1);
            for (i, inst) in constants.instances.iter().enumerate() {
                let w = inst.params.get("w")?;
                let block = &mut out[inst.offset..inst.offset + constants.vars_per_instance];
                let state = constants.block(y, i)?;
                block[0] = Complex64::new(0.0, -w) * state[0];
                block[1] = Complex64::new(0.0, -2.0 * w) * state[1];
                for v in block[2..].iter_mut() {
                    *v = Complex64::new(0.0, 0.0);
                }
            }
            Ok(())
        }
    }
}
