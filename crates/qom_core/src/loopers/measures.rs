use super::dynamics::MeasureRequest;
use super::{locate_threshold, AxisRef, Grid, Looper, SweepResult};
use crate::axis::{AxisSpec, MultiAxis, StaticAxis};
use crate::measures::MeasureValue;
use crate::params::Params;
use crate::system::SweepSystem;
use crate::threshold::ThresholdMode;
use anyhow::{Context, Result};
use tracing::info;

impl<'a, S: SweepSystem> Looper<'a, S> {
    /// Aggregated measure for every snapshot, keeping the row structure.
    ///
    /// Each row is integrated as one stack unless `batch` is set, in which
    /// case the whole grid is.
    fn aggregate_rows(
        &mut self,
        request: &MeasureRequest,
        rows: Vec<Vec<Params>>,
    ) -> Result<Vec<Vec<f64>>> {
        let times = self.time_axis(&request.dynamics)?;
        let total: usize = rows.iter().map(Vec::len).sum();

        let series: Vec<Vec<Vec<MeasureValue>>> = if request.dynamics.batch {
            let flat: Vec<Params> = rows.iter().flatten().cloned().collect();
            let mut all = self
                .measure_instances(&request.dynamics, &times.values, &request.measure, &flat)?
                .into_iter();
            self.report(total, total, "Integrating dynamics");
            rows.iter()
                .map(|row| all.by_ref().take(row.len()).collect())
                .collect()
        } else {
            let mut out = Vec::with_capacity(rows.len());
            let mut done = 0;
            for row in &rows {
                out.push(self.measure_instances(
                    &request.dynamics,
                    &times.values,
                    &request.measure,
                    row,
                )?);
                done += row.len();
                self.report(done, total, "Integrating dynamics");
            }
            out
        };

        series
            .iter()
            .map(|row| {
                row.iter()
                    .map(|values| {
                        let values: Vec<f64> = values.iter().map(MeasureValue::value_or_zero).collect();
                        let selected = request.span.select(&values)?;
                        request.calc.apply(selected)
                    })
                    .collect::<Result<Vec<f64>>>()
            })
            .collect::<Result<Vec<_>>>()
            .context("Failed to aggregate measure series")
    }

    /// Aggregated measure at every X value.
    pub fn measures_1d(
        &mut self,
        request: &MeasureRequest,
        x: &AxisSpec,
        mode: ThresholdMode,
    ) -> Result<SweepResult> {
        let xs = StaticAxis::new(x)?;
        info!(
            system = self.system.code(),
            measure = request.measure.code.as_str(),
            points = xs.dim,
            "measures_1d"
        );
        let rows = xs
            .values
            .iter()
            .map(|v| vec![self.base.with(&xs.var, *v)])
            .collect();
        let values = Grid::OneD(self.aggregate_rows(request, rows)?.into_iter().flatten().collect());

        let (_, thresholds) =
            locate_threshold(&values, mode, &[(xs.var.as_str(), AxisRef::Rows(&xs.values))])?;
        info!(?thresholds, "measures_1d done");
        let mut result = SweepResult::new(values).with_axis(&xs.var, Grid::OneD(xs.values.clone()));
        result.thresholds = thresholds;
        Ok(result)
    }

    /// Aggregated measure over X for every value of the multi axis Z, `[z][x]`.
    pub fn measures_1d_multi(
        &mut self,
        request: &MeasureRequest,
        x: &AxisSpec,
        z: &AxisSpec,
        mode: ThresholdMode,
    ) -> Result<SweepResult> {
        let xs = StaticAxis::new(x)?;
        let zs = MultiAxis::new(z)?;
        info!(
            system = self.system.code(),
            measure = request.measure.code.as_str(),
            points = xs.dim * zs.dim(),
            "measures_1d_multi"
        );
        let rows = zs
            .values()
            .iter()
            .map(|zv| {
                let z_base = self.base.with(zs.var(), *zv);
                xs.values.iter().map(|xv| z_base.with(&xs.var, *xv)).collect()
            })
            .collect();
        let values = Grid::TwoD(self.aggregate_rows(request, rows)?);

        let (_, thresholds) = locate_threshold(
            &values,
            mode,
            &[
                (xs.var.as_str(), AxisRef::Cols(&xs.values)),
                (zs.var(), AxisRef::Rows(zs.values())),
            ],
        )?;
        info!(?thresholds, "measures_1d_multi done");
        let mut result = SweepResult::new(values)
            .with_axis(&xs.var, Grid::OneD(xs.values.clone()))
            .with_axis(zs.var(), Grid::OneD(zs.values().to_vec()));
        result.thresholds = thresholds;
        Ok(result)
    }

    /// Aggregated measure over the X-Y plane, `[y][x]`.
    pub fn measures_2d(
        &mut self,
        request: &MeasureRequest,
        x: &AxisSpec,
        y: &AxisSpec,
        mode: ThresholdMode,
    ) -> Result<SweepResult> {
        let xs = StaticAxis::new(x)?;
        let ys = StaticAxis::new(y)?;
        info!(
            system = self.system.code(),
            measure = request.measure.code.as_str(),
            points = xs.dim * ys.dim,
            "measures_2d"
        );
        let rows = ys
            .values
            .iter()
            .map(|yv| {
                let y_base = self.base.with(&ys.var, *yv);
                xs.values.iter().map(|xv| y_base.with(&xs.var, *xv)).collect()
            })
            .collect();
        let values = Grid::TwoD(self.aggregate_rows(request, rows)?);

        let (_, thresholds) = locate_threshold(
            &values,
            mode,
            &[
                (xs.var.as_str(), AxisRef::Cols(&xs.values)),
                (ys.var.as_str(), AxisRef::Rows(&ys.values)),
            ],
        )?;
        info!(?thresholds, "measures_2d done");
        let mut result = SweepResult::new(values)
            .with_axis(&xs.var, Grid::OneD(xs.values.clone()))
            .with_axis(&ys.var, Grid::OneD(ys.values.clone()));
        result.thresholds = thresholds;
        Ok(result)
    }
}
