use super::{locate_threshold, AxisRef, Grid, Looper, SweepResult};
use crate::axis::{AxisSpec, DynamicAxis, MultiAxis, StaticAxis};
use crate::gradient::{gradient, gradient_at};
use crate::params::Params;
use crate::system::{PropertyFn, PropertyValue, SweepSystem};
use crate::threshold::ThresholdMode;
use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Axis along which a property gradient is taken.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum GradAxis {
    /// Gradient with respect to X, reported at every X value.
    #[default]
    X,
    /// Gradient with respect to X read off once per Y value.
    Y,
}

impl<'a, S: SweepSystem> Looper<'a, S> {
    fn evaluate(&self, func: &PropertyFn<S>, code: &str, params: &Params) -> Result<PropertyValue> {
        func(self.system, params)
            .with_context(|| format!("Property '{}' failed at {}", code, params))
    }

    /// Property values along `axis`, one entry per axis value.
    fn evaluate_axis(
        &mut self,
        func: &PropertyFn<S>,
        code: &str,
        base: &Params,
        axis: &StaticAxis,
    ) -> Result<Vec<PropertyValue>> {
        let mut out = Vec::with_capacity(axis.dim);
        for (k, x) in axis.values.iter().enumerate() {
            out.push(self.evaluate(func, code, &base.with(&axis.var, *x))?);
            self.report(k + 1, axis.dim, "Computing properties");
        }
        Ok(out)
    }

    /// `[y][x]` grid of property values with branches collapsed toward the
    /// threshold target. Points without any branch stay NaN.
    fn evaluate_grid(
        &mut self,
        func: &PropertyFn<S>,
        code: &str,
        base: &Params,
        x: &StaticAxis,
        y: &StaticAxis,
        mode: ThresholdMode,
    ) -> Result<Vec<Vec<f64>>> {
        let mut grid = vec![vec![f64::NAN; x.dim]; y.dim];
        let total = x.dim * y.dim;
        for (i, yv) in y.values.iter().enumerate() {
            let row_base = base.with(&y.var, *yv);
            for (j, xv) in x.values.iter().enumerate() {
                let value = self.evaluate(func, code, &row_base.with(&x.var, *xv))?;
                grid[i][j] = value.collapse(mode.targets_max());
                self.report(i * x.dim + j + 1, total, "Computing properties");
            }
        }
        Ok(grid)
    }

    /// Gradient curve for one base snapshot, over X or over Y.
    fn gradient_curve(
        &mut self,
        func: &PropertyFn<S>,
        code: &str,
        base: &Params,
        x: &StaticAxis,
        y: Option<&StaticAxis>,
        grad_axis: GradAxis,
        mode: ThresholdMode,
    ) -> Result<Vec<f64>> {
        match grad_axis {
            GradAxis::X => {
                let values = self
                    .evaluate_axis(func, code, base, x)?
                    .iter()
                    .map(PropertyValue::as_scalar)
                    .collect::<Result<Vec<_>>>()
                    .with_context(|| format!("Gradient of '{}' needs one value per point", code))?;
                let grads = gradient(&values, &x.values)?;
                x.values
                    .iter()
                    .zip(grads)
                    .map(|(xv, g)| {
                        let options = self.system.gradient_options(&base.with(&x.var, *xv))?;
                        if options.divisor == 0.0 {
                            bail!("Gradient divisor must be non-zero.");
                        }
                        Ok(g / options.divisor)
                    })
                    .collect()
            }
            GradAxis::Y => {
                let y = y.ok_or_else(|| anyhow!("Gradient along Y needs a Y axis."))?;
                let grid = self.evaluate_grid(func, code, base, x, y, mode)?;
                y.values
                    .iter()
                    .zip(&grid)
                    .map(|(yv, row)| {
                        let options = self.system.gradient_options(&base.with(&y.var, *yv))?;
                        gradient_at(row, &x.values, &options)
                    })
                    .collect()
            }
        }
    }

    /// Property over X. Multi-valued properties contribute every branch and
    /// repeat their X value in the returned axis.
    pub fn properties_1d(
        &mut self,
        code: &str,
        x: &AxisSpec,
        mode: ThresholdMode,
    ) -> Result<SweepResult> {
        let registry = self.system.properties();
        let func = registry.get(code)?;
        let xs = StaticAxis::new(x)?;
        info!(system = self.system.code(), code, points = xs.dim, "properties_1d");

        let base = self.base.clone();
        let mut values = Vec::new();
        let mut x_axis = DynamicAxis::one_d(&xs.var);
        for (xv, value) in xs.values.iter().zip(self.evaluate_axis(func, code, &base, &xs)?) {
            let branches = value.branches();
            x_axis.push_repeated(*xv, branches.len())?;
            values.extend(branches);
        }

        let values = Grid::OneD(values);
        let (_, thresholds) =
            locate_threshold(&values, mode, &[(xs.var.as_str(), AxisRef::Cells(&x_axis.values))])?;
        info!(?thresholds, "properties_1d done");
        let mut result = SweepResult::new(values).with_dynamic_axis(x_axis);
        result.thresholds = thresholds;
        Ok(result)
    }

    /// Property over X for every value of the multi axis Z; one row per Z.
    pub fn properties_1d_multi(
        &mut self,
        code: &str,
        x: &AxisSpec,
        z: &AxisSpec,
        mode: ThresholdMode,
    ) -> Result<SweepResult> {
        let registry = self.system.properties();
        let func = registry.get(code)?;
        let xs = StaticAxis::new(x)?;
        let zs = MultiAxis::new(z)?;
        info!(
            system = self.system.code(),
            code,
            points = xs.dim * zs.dim(),
            "properties_1d_multi"
        );

        let mut rows = vec![Vec::new(); zs.dim()];
        let mut x_rows = vec![Vec::new(); zs.dim()];
        let total = xs.dim * zs.dim();
        for (i, xv) in xs.values.iter().enumerate() {
            let x_base = self.base.with(&xs.var, *xv);
            for (k, zv) in zs.values().iter().enumerate() {
                let value = self.evaluate(func, code, &x_base.with(zs.var(), *zv))?;
                let branches = value.branches();
                x_rows[k].extend(std::iter::repeat(*xv).take(branches.len()));
                rows[k].extend(branches);
                self.report(i * zs.dim() + k + 1, total, "Computing properties");
            }
        }

        let values = Grid::TwoD(rows);
        let mut x_axis = DynamicAxis::two_d(&xs.var);
        for row in x_rows {
            x_axis.push_row(row)?;
        }
        let (_, thresholds) = locate_threshold(
            &values,
            mode,
            &[
                (xs.var.as_str(), AxisRef::Cells(&x_axis.values)),
                (zs.var(), AxisRef::Rows(zs.values())),
            ],
        )?;
        info!(?thresholds, "properties_1d_multi done");
        let mut result = SweepResult::new(values)
            .with_dynamic_axis(x_axis)
            .with_axis(zs.var(), Grid::OneD(zs.values().to_vec()));
        result.thresholds = thresholds;
        Ok(result)
    }

    /// Property over the X-Y plane, `[y][x]`.
    pub fn properties_2d(
        &mut self,
        code: &str,
        x: &AxisSpec,
        y: &AxisSpec,
        mode: ThresholdMode,
    ) -> Result<SweepResult> {
        let registry = self.system.properties();
        let func = registry.get(code)?;
        let xs = StaticAxis::new(x)?;
        let ys = StaticAxis::new(y)?;
        info!(system = self.system.code(), code, points = xs.dim * ys.dim, "properties_2d");

        let base = self.base.clone();
        let grid = self.evaluate_grid(func, code, &base, &xs, &ys, mode)?;
        plane_result(Grid::TwoD(grid), &xs, &ys, mode)
    }

    /// Gradient of a property along X, reported per X value (`GradAxis::X`)
    /// or once per Y value (`GradAxis::Y`).
    pub fn properties_grad_1d(
        &mut self,
        code: &str,
        x: &AxisSpec,
        y: Option<&AxisSpec>,
        grad_axis: GradAxis,
        mode: ThresholdMode,
    ) -> Result<SweepResult> {
        let registry = self.system.properties();
        let func = registry.get(code)?;
        let xs = StaticAxis::new(x)?;
        let ys = y.map(StaticAxis::new).transpose()?;
        info!(system = self.system.code(), code, ?grad_axis, "properties_grad_1d");

        let base = self.base.clone();
        let values = self.gradient_curve(func, code, &base, &xs, ys.as_ref(), grad_axis, mode)?;
        let axis = match grad_axis {
            GradAxis::X => &xs,
            GradAxis::Y => ys
                .as_ref()
                .ok_or_else(|| anyhow!("Gradient along Y needs a Y axis."))?,
        };

        let values = Grid::OneD(values);
        let (_, thresholds) =
            locate_threshold(&values, mode, &[(axis.var.as_str(), AxisRef::Rows(&axis.values))])?;
        info!(?thresholds, "properties_grad_1d done");
        let mut result =
            SweepResult::new(values).with_axis(&axis.var, Grid::OneD(axis.values.clone()));
        result.thresholds = thresholds;
        Ok(result)
    }

    /// [`Looper::properties_grad_1d`] for every value of the multi axis Z; one row per Z.
    pub fn properties_grad_1d_multi(
        &mut self,
        code: &str,
        x: &AxisSpec,
        y: Option<&AxisSpec>,
        z: &AxisSpec,
        grad_axis: GradAxis,
        mode: ThresholdMode,
    ) -> Result<SweepResult> {
        let registry = self.system.properties();
        let func = registry.get(code)?;
        let xs = StaticAxis::new(x)?;
        let ys = y.map(StaticAxis::new).transpose()?;
        let zs = MultiAxis::new(z)?;
        info!(system = self.system.code(), code, ?grad_axis, "properties_grad_1d_multi");

        let mut rows = Vec::with_capacity(zs.dim());
        for zv in zs.values() {
            let z_base = self.base.with(zs.var(), *zv);
            rows.push(self.gradient_curve(func, code, &z_base, &xs, ys.as_ref(), grad_axis, mode)?);
        }
        let axis = match grad_axis {
            GradAxis::X => &xs,
            GradAxis::Y => ys
                .as_ref()
                .ok_or_else(|| anyhow!("Gradient along Y needs a Y axis."))?,
        };

        let values = Grid::TwoD(rows);
        let (_, thresholds) = locate_threshold(
            &values,
            mode,
            &[
                (axis.var.as_str(), AxisRef::Cols(&axis.values)),
                (zs.var(), AxisRef::Rows(zs.values())),
            ],
        )?;
        info!(?thresholds, "properties_grad_1d_multi done");
        let mut result = SweepResult::new(values)
            .with_axis(&axis.var, Grid::OneD(axis.values.clone()))
            .with_axis(zs.var(), Grid::OneD(zs.values().to_vec()));
        result.thresholds = thresholds;
        Ok(result)
    }

    /// Gradient along X over the X-Y plane, each row divided by its divisor.
    pub fn properties_grad_2d(
        &mut self,
        code: &str,
        x: &AxisSpec,
        y: &AxisSpec,
        mode: ThresholdMode,
    ) -> Result<SweepResult> {
        let registry = self.system.properties();
        let func = registry.get(code)?;
        let xs = StaticAxis::new(x)?;
        let ys = StaticAxis::new(y)?;
        info!(system = self.system.code(), code, points = xs.dim * ys.dim, "properties_grad_2d");

        let base = self.base.clone();
        let grid = self.evaluate_grid(func, code, &base, &xs, &ys, mode)?;
        let mut rows = Vec::with_capacity(ys.dim);
        for (yv, row) in ys.values.iter().zip(&grid) {
            let options = self.system.gradient_options(&base.with(&ys.var, *yv))?;
            if options.divisor == 0.0 {
                bail!("Gradient divisor must be non-zero.");
            }
            rows.push(
                gradient(row, &xs.values)?
                    .into_iter()
                    .map(|g| g / options.divisor)
                    .collect(),
            );
        }
        plane_result(Grid::TwoD(rows), &xs, &ys, mode)
    }
}

/// Result of a `[y][x]` sweep with thresholds `{X, Y, "value"}`.
fn plane_result(
    values: Grid,
    xs: &StaticAxis,
    ys: &StaticAxis,
    mode: ThresholdMode,
) -> Result<SweepResult> {
    let (index, thresholds) = locate_threshold(
        &values,
        mode,
        &[
            (xs.var.as_str(), AxisRef::Cols(&xs.values)),
            (ys.var.as_str(), AxisRef::Rows(&ys.values)),
        ],
    )?;
    let extremum = values
        .get(index)
        .ok_or_else(|| anyhow!("Threshold index {:?} outside the grid.", index))?;
    info!(?thresholds, value = extremum, "plane sweep done");
    let mut result = SweepResult::new(values)
        .with_axis(&xs.var, Grid::OneD(xs.values.clone()))
        .with_axis(&ys.var, Grid::OneD(ys.values.clone()))
        .with_threshold("value", extremum);
    result.thresholds.extend(thresholds);
    Ok(result)
}
