//! Drives an integrator across a time grid for a stack of instances.

use crate::solvers::{Integrator, IntegratorSettings};
use crate::system::{StackConstants, SweepSystem};
use crate::traits::DynamicalSystem;
use anyhow::{bail, Context, Result};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use tracing::{debug, warn};

/// Which right-hand side of the system is integrated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverKind {
    Real,
    #[default]
    Complex,
}

impl SolverKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SolverKind::Real => "real",
            SolverKind::Complex => "complex",
        }
    }
}

/// One stacked state per output time.
pub type Trajectory = Vec<Vec<Complex64>>;

/// Presents a stacked system as a real first-order flow.
struct StackedFlow<'s, S> {
    system: &'s S,
    kind: SolverKind,
    constants: &'s StackConstants,
    len: usize,
    packed_in: RefCell<Vec<Complex64>>,
    packed_out: RefCell<Vec<Complex64>>,
}

impl<'s, S: SweepSystem> StackedFlow<'s, S> {
    fn new(system: &'s S, kind: SolverKind, constants: &'s StackConstants, len: usize) -> Self {
        let buffer = match kind {
            SolverKind::Real => 0,
            SolverKind::Complex => len,
        };
        Self {
            system,
            kind,
            constants,
            len,
            packed_in: RefCell::new(vec![Complex64::new(0.0, 0.0); buffer]),
            packed_out: RefCell::new(vec![Complex64::new(0.0, 0.0); buffer]),
        }
    }

    fn pack(&self, state: &[Complex64]) -> Vec<f64> {
        match self.kind {
            SolverKind::Real => state.iter().map(|c| c.re).collect(),
            SolverKind::Complex => state.iter().flat_map(|c| [c.re, c.im]).collect(),
        }
    }

    fn unpack(&self, x: &[f64]) -> Vec<Complex64> {
        match self.kind {
            SolverKind::Real => x.iter().map(|v| Complex64::new(*v, 0.0)).collect(),
            SolverKind::Complex => x
                .chunks_exact(2)
                .map(|pair| Complex64::new(pair[0], pair[1]))
                .collect(),
        }
    }
}

impl<S: SweepSystem> DynamicalSystem for StackedFlow<'_, S> {
    fn dimension(&self) -> usize {
        match self.kind {
            SolverKind::Real => self.len,
            SolverKind::Complex => 2 * self.len,
        }
    }

    fn apply(&self, t: f64, x: &[f64], out: &mut [f64]) -> Result<()> {
        match self.kind {
            SolverKind::Real => self.system.f_multi_real(t, x, self.constants, out),
            SolverKind::Complex => {
                let mut y = self.packed_in.borrow_mut();
                let mut dy = self.packed_out.borrow_mut();
                for (i, c) in y.iter_mut().enumerate() {
                    *c = Complex64::new(x[2 * i], x[2 * i + 1]);
                }
                self.system.f_multi_complex(t, &y, self.constants, &mut dy)?;
                for (i, c) in dy.iter().enumerate() {
                    out[2 * i] = c.re;
                    out[2 * i + 1] = c.im;
                }
                Ok(())
            }
        }
    }
}

/// Samples of instance `index` cut out of a stacked trajectory.
pub fn instance_trajectory(
    trajectory: &Trajectory,
    constants: &StackConstants,
    index: usize,
) -> Result<Trajectory> {
    trajectory
        .iter()
        .map(|sample| constants.block(sample, index).map(<[Complex64]>::to_vec))
        .collect()
}

pub fn validate_times(times: &[f64]) -> Result<()> {
    if times.is_empty() {
        bail!("Time grid must contain at least one point.");
    }
    if times.iter().any(|t| !t.is_finite()) {
        bail!("Time grid must be finite.");
    }
    if times.windows(2).any(|w| w[1] <= w[0]) {
        bail!("Time grid must be strictly increasing.");
    }
    Ok(())
}

/// Integrates the stacked initial values over `times`.
///
/// The first sample is `initial` itself. Any failure of the right-hand side
/// or the integrator aborts the whole run.
pub fn integrate<S: SweepSystem>(
    system: &S,
    kind: SolverKind,
    times: &[f64],
    initial: &[Complex64],
    constants: &StackConstants,
    settings: &IntegratorSettings,
) -> Result<Trajectory> {
    validate_times(times)?;
    constants.validate(initial.len())?;
    settings.validate()?;

    if kind == SolverKind::Real && initial.iter().any(|c| c.im != 0.0) {
        warn!(
            system = system.code(),
            "real solver discards the imaginary part of the initial values"
        );
    }

    debug!(
        system = system.code(),
        solver = kind.as_str(),
        instances = constants.instance_count(),
        samples = times.len(),
        "integrating dynamics"
    );

    let flow = StackedFlow::new(system, kind, constants, initial.len());
    let mut state = flow.pack(initial);
    let mut integrator = Integrator::new(settings.method, flow.dimension());
    let mut t = times[0];

    let mut trajectory = Vec::with_capacity(times.len());
    let mut first = initial.to_vec();
    if kind == SolverKind::Real {
        for c in first.iter_mut() {
            c.im = 0.0;
        }
    }
    trajectory.push(first);

    for &t_next in &times[1..] {
        integrator
            .advance(&flow, &mut t, &mut state, t_next, settings)
            .with_context(|| format!("Integration of '{}' failed", system.code()))?;
        trajectory.push(flow.unpack(&state));
    }
    Ok(trajectory)
}

#[cfg(test)]
mod tests {
    use super::{integrate, SolverKind};
    use crate::params::Params;
    use crate::solvers::{IntegrationMethod, IntegratorSettings};
    use crate::system::{StackConstants, SweepSystem};
    use anyhow::{bail, Result};
    use num_complex::Complex64;

    /// `dy/dt = -k y` per instance, or `da/dt = -i w a` for the complex run.
    struct Relax;

    impl SweepSystem for Relax {
        fn code(&self) -> &str {
            "relax"
        }

        fn params(&self) -> Params {
            [("k", 1.0)].into_iter().collect()
        }

        fn modes(&self) -> usize {
            1
        }

        fn vars_per_instance(&self) -> usize {
            1
        }

        fn initial_values(&self, _params: &Params) -> Result<Vec<Complex64>> {
            Ok(vec![Complex64::new(1.0, 0.0)])
        }

        fn f_multi_real(
            &self,
            _t: f64,
            y: &[f64],
            constants: &StackConstants,
            out: &mut [f64],
        ) -> Result<()> {
            for (i, inst) in constants.instances.iter().enumerate() {
                out[i] = -inst.params.get("k")? * y[i];
            }
            Ok(())
        }

        fn f_multi_complex(
            &self,
            _t: f64,
            y: &[Complex64],
            constants: &StackConstants,
            out: &mut [Complex64],
        ) -> Result<()> {
            for (i, inst) in constants.instances.iter().enumerate() {
                let w = inst.params.get("k")?;
                out[i] = Complex64::new(0.0, -w) * y[i];
            }
            Ok(())
        }
    }

    fn stack(ks: &[f64]) -> (Vec<Complex64>, StackConstants) {
        let params: Vec<Params> = ks.iter().map(|k| Relax.params().with("k", *k)).collect();
        Relax.ivc_multi(&params).unwrap()
    }

    #[test]
    fn first_sample_is_the_initial_state() {
        let (iv, constants) = stack(&[1.0, 2.0]);
        let times = [0.0, 0.5, 1.0];
        let traj = integrate(
            &Relax,
            SolverKind::Real,
            &times,
            &iv,
            &constants,
            &IntegratorSettings::default(),
        )
        .unwrap();
        assert_eq!(traj.len(), 3);
        assert_eq!(traj[0], iv);
        assert!((traj[2][0].re - (-1.0f64).exp()).abs() < 1e-5);
        assert!((traj[2][1].re - (-2.0f64).exp()).abs() < 1e-5);
        assert_eq!(traj[2][1].im, 0.0);
    }

    #[test]
    fn complex_rotation_keeps_modulus() {
        let (iv, constants) = stack(&[3.0]);
        let times: Vec<f64> = (0..=20).map(|i| i as f64 * 0.25).collect();
        for method in [IntegrationMethod::Tsit5, IntegrationMethod::Rk4] {
            let settings = IntegratorSettings {
                method,
                rk4_substeps: 50,
                ..IntegratorSettings::default()
            };
            let traj = integrate(&Relax, SolverKind::Complex, &times, &iv, &constants, &settings)
                .unwrap();
            let t = times[20];
            let expected = Complex64::new(0.0, -3.0 * t).exp();
            assert!((traj[20][0] - expected).norm() < 1e-4);
        }
    }

    #[test]
    fn rejects_bad_time_grids_and_layouts() {
        let (iv, constants) = stack(&[1.0]);
        let settings = IntegratorSettings::default();
        assert!(integrate(&Relax, SolverKind::Real, &[], &iv, &constants, &settings).is_err());
        assert!(
            integrate(&Relax, SolverKind::Real, &[0.0, 0.0], &iv, &constants, &settings).is_err()
        );
        let err = integrate(&Relax, SolverKind::Real, &[0.0, 1.0], &[], &constants, &settings)
            .unwrap_err();
        assert!(format!("{err}").contains("expected"));
    }

    struct Broken;

    impl SweepSystem for Broken {
        fn code(&self) -> &str {
            "broken"
        }

        fn params(&self) -> Params {
            Params::new()
        }

        fn vars_per_instance(&self) -> usize {
            1
        }

        fn f_multi_real(&self, t: f64, _y: &[f64], _c: &StackConstants, _out: &mut [f64]) -> Result<()> {
            if t > 0.1 {
                bail!("diverged");
            }
            Ok(())
        }
    }

    #[test]
    fn integration_errors_abort() {
        let constants = StackConstants::new(1, 1, &[Params::new()]);
        let err = integrate(
            &Broken,
            SolverKind::Real,
            &[0.0, 1.0],
            &[Complex64::new(1.0, 0.0)],
            &constants,
            &IntegratorSettings::default(),
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("diverged"));
    }
}
