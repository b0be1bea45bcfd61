use super::{locate_threshold, AxisRef, Grid, Looper, SweepResult};
use crate::axis::{AxisSpec, StaticAxis};
use crate::cache::{DynamicsCache, RunFingerprint};
use crate::dynamics::{instance_trajectory, integrate, validate_times, SolverKind};
use crate::measures::{reduce, reduce_stacked, Aggregation, MeasureSpec, MeasureValue, SpanMode};
use crate::params::Params;
use crate::solvers::IntegratorSettings;
use crate::system::SweepSystem;
use crate::threshold::ThresholdMode;
use anyhow::{anyhow, Result};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info};

fn default_cache_dir() -> PathBuf {
    PathBuf::from("data")
}

/// How trajectories are produced for a measure sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicsSpec {
    /// Output time grid.
    #[serde(rename = "T")]
    pub t: AxisSpec,
    #[serde(default)]
    pub solver_kind: SolverKind,
    #[serde(default)]
    pub cache: bool,
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,
    /// Integrate every grid point in one stacked solve.
    #[serde(default)]
    pub batch: bool,
    #[serde(default)]
    pub integrator: IntegratorSettings,
}

impl DynamicsSpec {
    pub fn new(t: AxisSpec) -> Self {
        Self {
            t,
            solver_kind: SolverKind::default(),
            cache: false,
            dir: default_cache_dir(),
            batch: false,
            integrator: IntegratorSettings::default(),
        }
    }
}

/// Everything a measure sweep needs besides its axes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasureRequest {
    pub dynamics: DynamicsSpec,
    pub measure: MeasureSpec,
    #[serde(default)]
    pub span: SpanMode,
    #[serde(default)]
    pub calc: Aggregation,
}

impl<'a, S: SweepSystem> Looper<'a, S> {
    pub(crate) fn time_axis(&self, dynamics: &DynamicsSpec) -> Result<StaticAxis> {
        let times = StaticAxis::new(&dynamics.t)?;
        validate_times(&times.values)?;
        Ok(times)
    }

    /// Measure series of every snapshot in `params`, in order.
    ///
    /// With caching enabled, instances whose files are present and current
    /// are loaded and only the rest are integrated, in one stacked solve.
    pub(crate) fn measure_instances(
        &mut self,
        dynamics: &DynamicsSpec,
        times: &[f64],
        measure: &MeasureSpec,
        params: &[Params],
    ) -> Result<Vec<Vec<MeasureValue>>> {
        let spec = measure.with_default_modes(self.system.modes());
        let (initial, constants) = self.system.ivc_multi(params)?;
        constants.validate(initial.len())?;

        if !dynamics.cache {
            let trajectory = integrate(
                self.system,
                dynamics.solver_kind,
                times,
                &initial,
                &constants,
                &dynamics.integrator,
            )?;
            return reduce_stacked(&trajectory, &constants, &spec);
        }

        let cache = DynamicsCache::open(&dynamics.dir, self.system.code(), times)?;
        let run = RunFingerprint::new(
            &self.system.fingerprint(),
            dynamics.solver_kind,
            &dynamics.integrator,
            times,
        )?;

        let mut results: Vec<Option<Vec<MeasureValue>>> = vec![None; constants.instance_count()];
        let mut todo = Vec::new();
        for (i, inst) in constants.instances.iter().enumerate() {
            let measure_fp = run.measure(&inst.params, &spec)?;
            if cache.trajectory_path(&inst.key).exists() {
                if let Some(values) = cache.load_measure(&spec, &inst.key, &measure_fp)? {
                    results[i] = Some(values);
                    continue;
                }
                let trajectory_fp = run.trajectory(&inst.params)?;
                if let Some(trajectory) = cache.load_trajectory(&inst.key, &trajectory_fp)? {
                    let values = reduce(&trajectory, &spec)?;
                    cache.store_measure(&spec, &inst.key, &measure_fp, &values)?;
                    results[i] = Some(values);
                    continue;
                }
            }
            todo.push(i);
        }
        debug!(
            system = self.system.code(),
            cached = constants.instance_count() - todo.len(),
            todo = todo.len(),
            dir = %cache.root().display(),
            "dynamics cache"
        );

        if !todo.is_empty() {
            let subset = constants.select(&todo)?;
            let mut subset_initial: Vec<Complex64> = Vec::with_capacity(subset.state_len());
            for &i in &todo {
                subset_initial.extend_from_slice(constants.block(&initial, i)?);
            }
            let trajectory = integrate(
                self.system,
                dynamics.solver_kind,
                times,
                &subset_initial,
                &subset,
                &dynamics.integrator,
            )?;
            for (slot, (&i, inst)) in todo.iter().zip(&subset.instances).enumerate() {
                let own = instance_trajectory(&trajectory, &subset, slot)?;
                let values = reduce(&own, &spec)?;
                cache.store_trajectory(&inst.key, &run.trajectory(&inst.params)?, &own)?;
                cache.store_measure(&spec, &inst.key, &run.measure(&inst.params, &spec)?, &values)?;
                results[i] = Some(values);
            }
        }

        results
            .into_iter()
            .enumerate()
            .map(|(i, r)| r.ok_or_else(|| anyhow!("Instance {} was neither cached nor integrated.", i)))
            .collect()
    }

    /// Measure time series per X value (or for the base parameters alone),
    /// `[instance][t]`.
    pub fn dynamics_measure(
        &mut self,
        request: &MeasureRequest,
        x: Option<&AxisSpec>,
        mode: ThresholdMode,
    ) -> Result<SweepResult> {
        let times = self.time_axis(&request.dynamics)?;
        let xs = x.map(StaticAxis::new).transpose()?;
        let params: Vec<Params> = match &xs {
            Some(xs) => xs.values.iter().map(|v| self.base.with(&xs.var, *v)).collect(),
            None => vec![self.base.clone()],
        };
        info!(
            system = self.system.code(),
            measure = request.measure.code.as_str(),
            instances = params.len(),
            samples = times.dim,
            "dynamics_measure"
        );

        self.report(0, params.len(), "Integrating dynamics");
        let series = self.measure_instances(&request.dynamics, &times.values, &request.measure, &params)?;
        self.report(params.len(), params.len(), "Integrating dynamics");

        let values = Grid::TwoD(
            series
                .iter()
                .map(|s| s.iter().map(MeasureValue::value_or_zero).collect())
                .collect(),
        );
        let mut axes = vec![(times.var.as_str(), AxisRef::Cols(&times.values))];
        if let Some(xs) = &xs {
            axes.push((xs.var.as_str(), AxisRef::Rows(&xs.values)));
        }
        let (_, thresholds) = locate_threshold(&values, mode, &axes)?;
        info!(?thresholds, "dynamics_measure done");

        let mut result =
            SweepResult::new(values).with_axis(&times.var, Grid::OneD(times.values.clone()));
        if let Some(xs) = &xs {
            result = result.with_axis(&xs.var, Grid::OneD(xs.values.clone()));
        }
        result.thresholds = thresholds;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::{DynamicsSpec, MeasureRequest};
    use crate::axis::AxisSpec;
    use crate::loopers::test_systems::Quadratic;
    use crate::loopers::{Grid, Looper};
    use crate::measures::{Aggregation, MeasureCode, MeasureSpec, SpanMode};
    use crate::threshold::ThresholdMode;
    use std::fs;
    use tempfile::tempdir;

    fn request(cache_dir: Option<&std::path::Path>) -> MeasureRequest {
        let mut dynamics = DynamicsSpec::new(AxisSpec::range("t", 0.0, 2.0, 5));
        if let Some(dir) = cache_dir {
            dynamics.cache = true;
            dynamics.dir = dir.to_path_buf();
        }
        MeasureRequest {
            dynamics,
            measure: MeasureSpec {
                modes: None,
                ..MeasureSpec::new(MeasureCode::SyncComplete, 2, 0, 1)
            },
            span: SpanMode::All,
            calc: Aggregation::Mean,
        }
    }

    fn rows(grid: &Grid) -> Vec<Vec<f64>> {
        match grid {
            Grid::TwoD(rows) => rows.clone(),
            Grid::OneD(v) => vec![v.clone()],
        }
    }

    #[test]
    fn single_instance_series() {
        crate::logging::init_for_tests();
        let system = Quadratic::new();
        let mut looper = Looper::new(&system);
        let result = looper
            .dynamics_measure(&request(None), None, ThresholdMode::MaxMin)
            .unwrap();
        let rows = rows(&result.values);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].len(), 5);
        assert!(rows[0].iter().all(|v| (v - 1.0).abs() < 1e-12));
        assert_eq!(result.thresholds["t"], 0.0);
        assert!(!result.thresholds.contains_key("y"));
        assert!(system.rhs_calls.get() > 0);
    }

    #[test]
    fn one_row_per_x_value() {
        let system = Quadratic::new();
        let mut looper = Looper::new(&system);
        let x = AxisSpec::values("y", &[0.0, 0.5]);
        let result = looper
            .dynamics_measure(&request(None), Some(&x), ThresholdMode::MinMin)
            .unwrap();
        let rows = rows(&result.values);
        assert!((rows[1][3] - 0.5).abs() < 1e-12);
        assert_eq!(result.thresholds["y"], 0.5);
        assert_eq!(result.thresholds["t"], 0.0);
        assert_eq!(result.axes["t"], Grid::OneD(vec![0.0, 0.5, 1.0, 1.5, 2.0]));
    }

    #[test]
    fn cached_rerun_skips_integration() {
        let dir = tempdir().unwrap();
        let system = Quadratic::new();
        let x = AxisSpec::values("y", &[0.0, 1.0]);
        let req = request(Some(dir.path()));

        let first = Looper::new(&system)
            .dynamics_measure(&req, Some(&x), ThresholdMode::MaxMin)
            .unwrap();
        assert!(system.rhs_calls.get() > 0);
        let cache_dir = dir.path().join("quadratic/dynamics/0_2_5");
        assert_eq!(fs::read_dir(&cache_dir).unwrap().count(), 4);

        system.rhs_calls.set(0);
        let second = Looper::new(&system)
            .dynamics_measure(&req, Some(&x), ThresholdMode::MaxMin)
            .unwrap();
        assert_eq!(system.rhs_calls.get(), 0);
        assert_eq!(first, second);

        // One new point: only it is integrated, results keep axis order.
        let wider = AxisSpec::values("y", &[0.0, 1.0, 2.0]);
        let third = Looper::new(&system)
            .dynamics_measure(&req, Some(&wider), ThresholdMode::MaxMin)
            .unwrap();
        assert!(system.rhs_calls.get() > 0);
        let rows = rows(&third.values);
        assert!((rows[1][0] - 1.0 / 3.0).abs() < 1e-12);
        assert!((rows[2][0] - 0.2).abs() < 1e-12);
        assert_eq!(fs::read_dir(&cache_dir).unwrap().count(), 6);
    }

    #[test]
    fn cached_reload_matches_uncached_run_exactly() {
        let dir = tempdir().unwrap();
        let system = Quadratic::new();
        let ys: Vec<f64> = (0..40).map(|k| 0.037 * k as f64 + 1.0 / 7.0).collect();
        let x = AxisSpec::values("y", &ys);

        let uncached = Looper::new(&system)
            .dynamics_measure(&request(None), Some(&x), ThresholdMode::MaxMin)
            .unwrap();
        let req = request(Some(dir.path()));
        let filled = Looper::new(&system)
            .dynamics_measure(&req, Some(&x), ThresholdMode::MaxMin)
            .unwrap();
        system.rhs_calls.set(0);
        let reloaded = Looper::new(&system)
            .dynamics_measure(&req, Some(&x), ThresholdMode::MaxMin)
            .unwrap();
        assert_eq!(system.rhs_calls.get(), 0);

        let expected = rows(&uncached.values);
        for other in [&filled, &reloaded] {
            let got = rows(&other.values);
            assert_eq!(got.len(), expected.len());
            for (g, e) in got.iter().zip(&expected) {
                let g: Vec<u64> = g.iter().map(|v| v.to_bits()).collect();
                let e: Vec<u64> = e.iter().map(|v| v.to_bits()).collect();
                assert_eq!(g, e);
            }
        }
        assert_eq!(uncached, reloaded);

        // Rebuilt from stored trajectories only.
        let cache_dir = dir.path().join("quadratic/dynamics/0_2_5");
        for entry in fs::read_dir(&cache_dir).unwrap() {
            let path = entry.unwrap().path();
            if path.file_name().unwrap().to_string_lossy().starts_with("measure_") {
                fs::remove_file(path).unwrap();
            }
        }
        let rebuilt = Looper::new(&system)
            .dynamics_measure(&req, Some(&x), ThresholdMode::MaxMin)
            .unwrap();
        assert_eq!(system.rhs_calls.get(), 0);
        assert_eq!(uncached, rebuilt);
    }

    #[test]
    fn changed_settings_invalidate_the_cache() {
        let dir = tempdir().unwrap();
        let system = Quadratic::new();
        let mut req = request(Some(dir.path()));
        Looper::new(&system)
            .dynamics_measure(&req, None, ThresholdMode::MaxMin)
            .unwrap();

        system.rhs_calls.set(0);
        req.dynamics.integrator.rtol = 1e-8;
        Looper::new(&system)
            .dynamics_measure(&req, None, ThresholdMode::MaxMin)
            .unwrap();
        assert!(system.rhs_calls.get() > 0);
    }

    #[test]
    fn missing_measure_file_is_rebuilt_from_the_trajectory() {
        let dir = tempdir().unwrap();
        let system = Quadratic::new();
        let req = request(Some(dir.path()));
        Looper::new(&system)
            .dynamics_measure(&req, None, ThresholdMode::MaxMin)
            .unwrap();

        let cache_dir = dir.path().join("quadratic/dynamics/0_2_5");
        for entry in fs::read_dir(&cache_dir).unwrap() {
            let path = entry.unwrap().path();
            if path.file_name().unwrap().to_string_lossy().starts_with("measure_") {
                fs::remove_file(path).unwrap();
            }
        }

        system.rhs_calls.set(0);
        let result = Looper::new(&system)
            .dynamics_measure(&req, None, ThresholdMode::MaxMin)
            .unwrap();
        assert_eq!(system.rhs_calls.get(), 0);
        assert_eq!(rows(&result.values)[0].len(), 5);
    }
}
