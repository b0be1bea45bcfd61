use crate::traits::{DynamicalSystem, Steppable};
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Integration scheme used to advance between requested output times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationMethod {
    /// Adaptive Tsitouras 5(4) with embedded error control.
    Tsit5,
    /// Classic RK4 with a fixed number of sub-steps per output interval.
    Rk4,
}

impl Default for IntegrationMethod {
    fn default() -> Self {
        IntegrationMethod::Tsit5
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegratorSettings {
    pub method: IntegrationMethod,
    pub rtol: f64,
    pub atol: f64,
    /// First trial step. Defaults to 1% of the first output interval.
    pub initial_step: Option<f64>,
    pub min_step: f64,
    /// Accepted plus rejected steps allowed between two output times.
    pub max_steps: usize,
    pub rk4_substeps: usize,
}

impl Default for IntegratorSettings {
    fn default() -> Self {
        Self {
            method: IntegrationMethod::Tsit5,
            rtol: 1e-6,
            atol: 1e-9,
            initial_step: None,
            min_step: 1e-14,
            max_steps: 100_000,
            rk4_substeps: 10,
        }
    }
}

impl IntegratorSettings {
    pub fn validate(&self) -> Result<()> {
        if !(self.rtol > 0.0) || !(self.atol > 0.0) {
            bail!("Integrator tolerances must be positive.");
        }
        if let Some(h) = self.initial_step {
            if !(h > 0.0) {
                bail!("initial_step must be positive.");
            }
        }
        if !(self.min_step > 0.0) {
            bail!("min_step must be positive.");
        }
        if self.max_steps == 0 {
            bail!("max_steps must be greater than zero.");
        }
        if self.rk4_substeps == 0 {
            bail!("rk4_substeps must be at least 1.");
        }
        Ok(())
    }
}

/// Classic Runge-Kutta 4th Order Solver
pub struct RK4 {
    k1: Vec<f64>,
    k2: Vec<f64>,
    k3: Vec<f64>,
    k4: Vec<f64>,
    tmp: Vec<f64>,
}

impl RK4 {
    pub fn new(dim: usize) -> Self {
        Self {
            k1: vec![0.0; dim],
            k2: vec![0.0; dim],
            k3: vec![0.0; dim],
            k4: vec![0.0; dim],
            tmp: vec![0.0; dim],
        }
    }
}

impl Steppable for RK4 {
    fn step(
        &mut self,
        system: &impl DynamicalSystem,
        t: &mut f64,
        state: &mut [f64],
        dt: f64,
    ) -> Result<()> {
        let t0 = *t;

        // k1 = f(t, y)
        system.apply(t0, state, &mut self.k1)?;

        // k2 = f(t + dt/2, y + dt*k1/2)
        for i in 0..state.len() {
            self.tmp[i] = state[i] + dt * self.k1[i] * 0.5;
        }
        system.apply(t0 + dt * 0.5, &self.tmp, &mut self.k2)?;

        // k3 = f(t + dt/2, y + dt*k2/2)
        for i in 0..state.len() {
            self.tmp[i] = state[i] + dt * self.k2[i] * 0.5;
        }
        system.apply(t0 + dt * 0.5, &self.tmp, &mut self.k3)?;

        // k4 = f(t + dt, y + dt*k3)
        for i in 0..state.len() {
            self.tmp[i] = state[i] + dt * self.k3[i];
        }
        system.apply(t0 + dt, &self.tmp, &mut self.k4)?;

        // y_next = y + dt/6 * (k1 + 2k2 + 2k3 + k4)
        for i in 0..state.len() {
            state[i] += dt / 6.0 * (self.k1[i] + 2.0 * self.k2[i] + 2.0 * self.k3[i] + self.k4[i]);
        }

        *t = t0 + dt;
        Ok(())
    }
}

// Tsit5 tableau.
const C2: f64 = 0.161;
const C3: f64 = 0.327;
const C4: f64 = 0.9;
const C5: f64 = 0.9800255409045097;

const A21: f64 = 0.161;
const A31: f64 = -0.008480655492356989;
const A32: f64 = 0.335480655492357;
const A41: f64 = 2.898;
const A42: f64 = -6.359447987781783;
const A43: f64 = 4.361447987781783;
const A51: f64 = 5.325864858437957;
const A52: f64 = -11.748883564062828;
const A53: f64 = 7.495539342889693;
const A54: f64 = -0.09249506636030195;
const A61: f64 = 5.86145544294642;
const A62: f64 = -12.92096931784711;
const A63: f64 = 8.159367898576159;
const A64: f64 = -0.071584973281401;
const A65: f64 = -0.02826857949054663;

// 5th order weights (also the FSAL stage row).
const B1: f64 = 0.09646076681806523;
const B2: f64 = 0.01;
const B3: f64 = 0.4798896504144996;
const B4: f64 = 1.379008574103742;
const B5: f64 = -3.290069515436099;
const B6: f64 = 2.324710524099774;

// Difference between the 5th and embedded 4th order weights.
const E1: f64 = -0.00178001105222577714;
const E2: f64 = -0.0008164344596567469;
const E3: f64 = 0.007880878010261995;
const E4: f64 = -0.1447110071732629;
const E5: f64 = 0.5823571654525552;
const E6: f64 = -0.45808210592918697;
const E7: f64 = 0.015151515151515152;

/// Tsitouras 5/4 solver with adaptive step-size control.
///
/// The current step size is kept between calls to [`Tsit5::advance`] so a
/// sequence of output times reuses what the controller has learned.
pub struct Tsit5 {
    k1: Vec<f64>,
    k2: Vec<f64>,
    k3: Vec<f64>,
    k4: Vec<f64>,
    k5: Vec<f64>,
    k6: Vec<f64>,
    k7: Vec<f64>,
    tmp: Vec<f64>,
    next: Vec<f64>,
    h: Option<f64>,
}

impl Tsit5 {
    pub fn new(dim: usize) -> Self {
        Self {
            k1: vec![0.0; dim],
            k2: vec![0.0; dim],
            k3: vec![0.0; dim],
            k4: vec![0.0; dim],
            k5: vec![0.0; dim],
            k6: vec![0.0; dim],
            k7: vec![0.0; dim],
            tmp: vec![0.0; dim],
            next: vec![0.0; dim],
            h: None,
        }
    }

    /// Current (suggested) step size, if the controller has been started.
    pub fn step_size(&self) -> Option<f64> {
        self.h
    }

    /// Advances `state` from `*t` to exactly `t_end`.
    pub fn advance(
        &mut self,
        system: &impl DynamicalSystem,
        t: &mut f64,
        state: &mut [f64],
        t_end: f64,
        settings: &IntegratorSettings,
    ) -> Result<()> {
        let span = t_end - *t;
        if span <= 0.0 {
            return Ok(());
        }
        let mut h = self
            .h
            .or(settings.initial_step)
            .unwrap_or(span * 0.01)
            .max(settings.min_step);
        let mut attempts = 0usize;

        while *t < t_end {
            if attempts >= settings.max_steps {
                bail!(
                    "Integrator exceeded {} steps between t = {} and t = {}.",
                    settings.max_steps,
                    *t,
                    t_end
                );
            }
            attempts += 1;

            let remaining = t_end - *t;
            let last = h >= remaining;
            let h_try = if last { remaining } else { h };

            let err = self.trial(system, *t, state, h_try, settings)?;
            if err.is_finite() && err <= 1.0 {
                *t = if last { t_end } else { *t + h_try };
                state.copy_from_slice(&self.next);
                if state.iter().any(|v| !v.is_finite()) {
                    bail!("Integrator produced a non-finite state at t = {}.", *t);
                }
                let factor = if err == 0.0 {
                    5.0
                } else {
                    (0.9 * err.powf(-0.2)).clamp(0.2, 5.0)
                };
                // A step shortened to land on t_end should not shrink the controller.
                h = if last { h.max(h_try * factor) } else { h_try * factor };
            } else {
                let factor = if err.is_finite() {
                    (0.9 * err.powf(-0.2)).clamp(0.2, 1.0)
                } else {
                    0.2
                };
                h = h_try * factor;
                if h < settings.min_step {
                    bail!(
                        "Integrator step size underflow at t = {} (h = {:e}).",
                        *t,
                        h
                    );
                }
            }
        }

        self.h = Some(h);
        Ok(())
    }

    /// Computes a trial step into `self.next` and returns the scaled RMS error.
    fn trial(
        &mut self,
        system: &impl DynamicalSystem,
        t0: f64,
        state: &[f64],
        dt: f64,
        settings: &IntegratorSettings,
    ) -> Result<f64> {
        let n = state.len();

        system.apply(t0, state, &mut self.k1)?;

        for i in 0..n {
            self.tmp[i] = state[i] + dt * (A21 * self.k1[i]);
        }
        system.apply(t0 + C2 * dt, &self.tmp, &mut self.k2)?;

        for i in 0..n {
            self.tmp[i] = state[i] + dt * (A31 * self.k1[i] + A32 * self.k2[i]);
        }
        system.apply(t0 + C3 * dt, &self.tmp, &mut self.k3)?;

        for i in 0..n {
            self.tmp[i] =
                state[i] + dt * (A41 * self.k1[i] + A42 * self.k2[i] + A43 * self.k3[i]);
        }
        system.apply(t0 + C4 * dt, &self.tmp, &mut self.k4)?;

        for i in 0..n {
            self.tmp[i] = state[i]
                + dt * (A51 * self.k1[i] + A52 * self.k2[i] + A53 * self.k3[i] + A54 * self.k4[i]);
        }
        system.apply(t0 + C5 * dt, &self.tmp, &mut self.k5)?;

        for i in 0..n {
            self.tmp[i] = state[i]
                + dt * (A61 * self.k1[i]
                    + A62 * self.k2[i]
                    + A63 * self.k3[i]
                    + A64 * self.k4[i]
                    + A65 * self.k5[i]);
        }
        system.apply(t0 + dt, &self.tmp, &mut self.k6)?;

        for i in 0..n {
            self.next[i] = state[i]
                + dt * (B1 * self.k1[i]
                    + B2 * self.k2[i]
                    + B3 * self.k3[i]
                    + B4 * self.k4[i]
                    + B5 * self.k5[i]
                    + B6 * self.k6[i]);
        }
        system.apply(t0 + dt, &self.next, &mut self.k7)?;

        if n == 0 {
            return Ok(0.0);
        }
        let mut sum = 0.0;
        for i in 0..n {
            let e = dt
                * (E1 * self.k1[i]
                    + E2 * self.k2[i]
                    + E3 * self.k3[i]
                    + E4 * self.k4[i]
                    + E5 * self.k5[i]
                    + E6 * self.k6[i]
                    + E7 * self.k7[i]);
            let scale = settings.atol + settings.rtol * state[i].abs().max(self.next[i].abs());
            let ratio = e / scale;
            sum += ratio * ratio;
        }
        Ok((sum / n as f64).sqrt())
    }
}

/// Integrator selected by [`IntegrationMethod`], advanced output time by output time.
pub enum Integrator {
    Rk4(RK4),
    Tsit5(Tsit5),
}

impl Integrator {
    pub fn new(method: IntegrationMethod, dim: usize) -> Self {
        match method {
            IntegrationMethod::Rk4 => Integrator::Rk4(RK4::new(dim)),
            IntegrationMethod::Tsit5 => Integrator::Tsit5(Tsit5::new(dim)),
        }
    }

    pub fn advance(
        &mut self,
        system: &impl DynamicalSystem,
        t: &mut f64,
        state: &mut [f64],
        t_end: f64,
        settings: &IntegratorSettings,
    ) -> Result<()> {
        match self {
            Integrator::Tsit5(s) => s.advance(system, t, state, t_end, settings),
            Integrator::Rk4(s) => {
                let start = *t;
                let dt = (t_end - start) / settings.rk4_substeps as f64;
                for k in 0..settings.rk4_substeps {
                    s.step(system, t, state, dt)?;
                    if k + 1 == settings.rk4_substeps {
                        *t = t_end;
                    }
                }
                if state.iter().any(|v| !v.is_finite()) {
                    bail!("Integrator produced a non-finite state at t = {}.", t_end);
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{IntegrationMethod, Integrator, IntegratorSettings, Steppable, Tsit5, RK4};
    use crate::traits::DynamicalSystem;
    use anyhow::{bail, Result};

    struct Decay {
        rate: f64,
    }

    impl DynamicalSystem for Decay {
        fn dimension(&self) -> usize {
            1
        }

        fn apply(&self, _t: f64, x: &[f64], out: &mut [f64]) -> Result<()> {
            out[0] = -self.rate * x[0];
            Ok(())
        }
    }

    struct Oscillator;

    impl DynamicalSystem for Oscillator {
        fn dimension(&self) -> usize {
            2
        }

        fn apply(&self, _t: f64, x: &[f64], out: &mut [f64]) -> Result<()> {
            out[0] = x[1];
            out[1] = -x[0];
            Ok(())
        }
    }

    struct Blowup;

    impl DynamicalSystem for Blowup {
        fn dimension(&self) -> usize {
            1
        }

        fn apply(&self, t: f64, _x: &[f64], _out: &mut [f64]) -> Result<()> {
            if t > 0.5 {
                bail!("right-hand side undefined past t = 0.5");
            }
            Ok(())
        }
    }

    #[test]
    fn rk4_step_matches_exponential_decay() {
        let system = Decay { rate: 1.0 };
        let mut solver = RK4::new(1);
        let mut t = 0.0;
        let mut state = vec![1.0];
        for _ in 0..100 {
            solver.step(&system, &mut t, &mut state, 0.01).unwrap();
        }
        assert!((t - 1.0).abs() < 1e-12);
        assert!((state[0] - (-1.0f64).exp()).abs() < 1e-9);
    }

    #[test]
    fn tsit5_lands_exactly_on_requested_times() {
        let system = Oscillator;
        let settings = IntegratorSettings::default();
        let mut solver = Tsit5::new(2);
        let mut t = 0.0;
        let mut state = vec![1.0, 0.0];
        for k in 1..=10 {
            let target = k as f64 * 0.7;
            solver
                .advance(&system, &mut t, &mut state, target, &settings)
                .unwrap();
            assert_eq!(t, target);
            assert!((state[0] - target.cos()).abs() < 1e-4);
            assert!((state[1] + target.sin()).abs() < 1e-4);
        }
        assert!(solver.step_size().is_some());
    }

    #[test]
    fn tsit5_respects_tight_tolerances() {
        let system = Decay { rate: 3.0 };
        let settings = IntegratorSettings {
            rtol: 1e-10,
            atol: 1e-12,
            ..IntegratorSettings::default()
        };
        let mut solver = Tsit5::new(1);
        let mut t = 0.0;
        let mut state = vec![2.0];
        solver
            .advance(&system, &mut t, &mut state, 2.0, &settings)
            .unwrap();
        assert!((state[0] - 2.0 * (-6.0f64).exp()).abs() < 1e-9);
    }

    #[test]
    fn integrator_propagates_rhs_errors() {
        let settings = IntegratorSettings::default();
        for method in [IntegrationMethod::Tsit5, IntegrationMethod::Rk4] {
            let mut integrator = Integrator::new(method, 1);
            let mut t = 0.0;
            let mut state = vec![0.0];
            let err = integrator
                .advance(&Blowup, &mut t, &mut state, 1.0, &settings)
                .expect_err("expected failure");
            assert!(format!("{err}").contains("undefined past"));
        }
    }

    #[test]
    fn step_budget_is_enforced() {
        let system = Decay { rate: 1.0 };
        let settings = IntegratorSettings {
            initial_step: Some(1e-6),
            max_steps: 3,
            ..IntegratorSettings::default()
        };
        let mut solver = Tsit5::new(1);
        let mut t = 0.0;
        let mut state = vec![1.0];
        let err = solver
            .advance(&system, &mut t, &mut state, 10.0, &settings)
            .expect_err("expected budget failure");
        assert!(format!("{err}").contains("exceeded 3 steps"));
    }

    #[test]
    fn settings_validation_rejects_bad_values() {
        let mut settings = IntegratorSettings::default();
        assert!(settings.validate().is_ok());
        settings.rtol = 0.0;
        assert!(settings.validate().is_err());
        let settings = IntegratorSettings {
            rk4_substeps: 0,
            ..IntegratorSettings::default()
        };
        assert!(settings.validate().is_err());
    }
}
