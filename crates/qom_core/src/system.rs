//! The contract a model implements to be swept.

use crate::params::Params;
use anyhow::{anyhow, bail, Result};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Value returned by a property function at one parameter point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Scalar(f64),
    /// Multi-valued property, e.g. the roots of a steady-state polynomial.
    Branches(Vec<f64>),
}

impl PropertyValue {
    /// All values, one for a scalar.
    pub fn branches(&self) -> Vec<f64> {
        match self {
            PropertyValue::Scalar(v) => vec![*v],
            PropertyValue::Branches(vs) => vs.clone(),
        }
    }

    pub fn as_scalar(&self) -> Result<f64> {
        match self {
            PropertyValue::Scalar(v) => Ok(*v),
            PropertyValue::Branches(vs) if vs.len() == 1 => Ok(vs[0]),
            PropertyValue::Branches(vs) => bail!(
                "Expected a single-valued property, got {} branches.",
                vs.len()
            ),
        }
    }

    /// Collapses the branches to their largest (`max == true`) or smallest
    /// finite member. NaN when there is none.
    pub fn collapse(&self, max: bool) -> f64 {
        let finite = self.branches().into_iter().filter(|v| !v.is_nan());
        let picked = if max {
            finite.fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))))
        } else {
            finite.fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.min(v))))
        };
        picked.unwrap_or(f64::NAN)
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        PropertyValue::Scalar(v)
    }
}

impl From<Vec<f64>> for PropertyValue {
    fn from(vs: Vec<f64>) -> Self {
        PropertyValue::Branches(vs)
    }
}

pub type PropertyFn<S> = Box<dyn Fn(&S, &Params) -> Result<PropertyValue>>;

/// Named property functions a system exposes to the sweep engine.
pub struct PropertyRegistry<S> {
    entries: BTreeMap<String, PropertyFn<S>>,
}

impl<S> Default for PropertyRegistry<S> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<S> PropertyRegistry<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<F>(mut self, code: &str, f: F) -> Self
    where
        F: Fn(&S, &Params) -> Result<PropertyValue> + 'static,
    {
        self.entries.insert(code.to_string(), Box::new(f));
        self
    }

    pub fn contains(&self, code: &str) -> bool {
        self.entries.contains_key(code)
    }

    pub fn codes(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    pub fn get(&self, code: &str) -> Result<&PropertyFn<S>> {
        self.entries.get(code).ok_or_else(|| {
            anyhow!(
                "Unknown property code '{}'. Available: [{}].",
                code,
                self.codes().join(", ")
            )
        })
    }
}

/// How the gradient of a property curve is sampled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GradientMode {
    /// At the axis value closest to `position`.
    AtPosition,
    /// At the monotonic-run midpoint nearest to `position`.
    NearPosition,
    /// At the midpoint of the `mono_id`-th monotonic run (1-based).
    AtMonoMid,
    /// At the largest gradient magnitude of the `mono_id`-th monotonic run.
    AtMonoMaxMin,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GradientOptions {
    pub divisor: f64,
    pub mode: GradientMode,
    pub position: f64,
    pub mono_id: usize,
}

impl Default for GradientOptions {
    fn default() -> Self {
        Self {
            divisor: 1.0,
            mode: GradientMode::AtPosition,
            position: 0.0,
            mono_id: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackInstance {
    /// Parameter values in key order.
    pub key: Vec<f64>,
    pub params: Params,
    /// Offset of the instance block in the stacked state.
    pub offset: usize,
}

/// Per-instance constants of a stacked (batched) trajectory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackConstants {
    pub modes: usize,
    pub vars_per_instance: usize,
    pub instances: Vec<StackInstance>,
}

impl StackConstants {
    pub fn new(modes: usize, vars_per_instance: usize, params: &[Params]) -> Self {
        let instances = params
            .iter()
            .enumerate()
            .map(|(i, p)| StackInstance {
                key: p.values(),
                params: p.clone(),
                offset: i * vars_per_instance,
            })
            .collect();
        Self {
            modes,
            vars_per_instance,
            instances,
        }
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    pub fn state_len(&self) -> usize {
        self.instances.len() * self.vars_per_instance
    }

    pub fn validate(&self, state_len: usize) -> Result<()> {
        if self.vars_per_instance == 0 {
            bail!("Stacked constants must have at least one variable per instance.");
        }
        if state_len != self.state_len() {
            bail!(
                "Initial values have length {} but {} instances x {} variables = {} were expected.",
                state_len,
                self.instances.len(),
                self.vars_per_instance,
                self.state_len()
            );
        }
        Ok(())
    }

    /// Keeps only the instances at `indices`, in the given order, with
    /// offsets recomputed for the compacted state.
    pub fn select(&self, indices: &[usize]) -> Result<StackConstants> {
        let mut instances = Vec::with_capacity(indices.len());
        for (slot, &idx) in indices.iter().enumerate() {
            let inst = self.instances.get(idx).ok_or_else(|| {
                anyhow!(
                    "Instance index {} out of range for {} instances.",
                    idx,
                    self.instances.len()
                )
            })?;
            instances.push(StackInstance {
                key: inst.key.clone(),
                params: inst.params.clone(),
                offset: slot * self.vars_per_instance,
            });
        }
        Ok(StackConstants {
            modes: self.modes,
            vars_per_instance: self.vars_per_instance,
            instances,
        })
    }

    /// Slice of the stacked state that belongs to instance `index`.
    pub fn block<'s, T>(&self, state: &'s [T], index: usize) -> Result<&'s [T]> {
        let start = index * self.vars_per_instance;
        state
            .get(start..start + self.vars_per_instance)
            .ok_or_else(|| {
                anyhow!(
                    "State of length {} has no block {} of {} variables.",
                    state.len(),
                    index,
                    self.vars_per_instance
                )
            })
    }
}

/// A model that can be swept over its parameters.
///
/// Only `code` and `params` are required. Property sweeps need
/// [`SweepSystem::properties`]; dynamics sweeps need `initial_values` and one
/// of the `f_multi_*` right-hand sides.
pub trait SweepSystem {
    fn code(&self) -> &str;

    fn name(&self) -> &str {
        self.code()
    }

    /// Base parameter snapshot.
    fn params(&self) -> Params;

    /// Identity used in cache fingerprints. Change it whenever the equations change.
    fn fingerprint(&self) -> String {
        self.code().to_string()
    }

    fn properties(&self) -> PropertyRegistry<Self>
    where
        Self: Sized,
    {
        PropertyRegistry::new()
    }

    fn gradient_options(&self, _params: &Params) -> Result<GradientOptions> {
        Ok(GradientOptions::default())
    }

    /// Number of optical and mechanical modes.
    fn modes(&self) -> usize {
        1
    }

    /// Mode amplitudes followed by the `(2 modes)^2` correlation matrix.
    fn vars_per_instance(&self) -> usize {
        let n = self.modes();
        n + 4 * n * n
    }

    fn initial_values(&self, _params: &Params) -> Result<Vec<Complex64>> {
        bail!("System '{}' does not define initial values.", self.code())
    }

    /// Stacks the initial values of every snapshot into one state.
    fn ivc_multi(&self, params: &[Params]) -> Result<(Vec<Complex64>, StackConstants)> {
        let constants = StackConstants::new(self.modes(), self.vars_per_instance(), params);
        let mut stacked = Vec::with_capacity(constants.state_len());
        for p in params {
            let iv = self.initial_values(p)?;
            if iv.len() != constants.vars_per_instance {
                bail!(
                    "System '{}' returned {} initial values, expected {}.",
                    self.code(),
                    iv.len(),
                    constants.vars_per_instance
                );
            }
            stacked.extend(iv);
        }
        Ok((stacked, constants))
    }

    fn f_multi_real(
        &self,
        _t: f64,
        _y: &[f64],
        _constants: &StackConstants,
        _out: &mut [f64],
    ) -> Result<()> {
        bail!("System '{}' does not define a real right-hand side.", self.code())
    }

    fn f_multi_complex(
        &self,
        _t: f64,
        _y: &[Complex64],
        _constants: &StackConstants,
        _out: &mut [Complex64],
    ) -> Result<()> {
        bail!(
            "System '{}' does not define a complex right-hand side.",
            self.code()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::{PropertyRegistry, PropertyValue, StackConstants, SweepSystem};
    use crate::params::Params;
    use anyhow::Result;
    use num_complex::Complex64;

    struct Toy;

    impl SweepSystem for Toy {
        fn code(&self) -> &str {
            "toy"
        }

        fn params(&self) -> Params {
            [("a", 1.0)].into_iter().collect()
        }

        fn initial_values(&self, params: &Params) -> Result<Vec<Complex64>> {
            let a = params.get("a")?;
            Ok(vec![Complex64::new(a, 0.0); self.vars_per_instance()])
        }
    }

    fn params_for(values: &[f64]) -> Vec<Params> {
        let base = Toy.params();
        values.iter().map(|v| base.with("a", *v)).collect()
    }

    #[test]
    fn select_recomputes_offsets_in_order() {
        let constants = StackConstants::new(1, 5, &params_for(&[1.0, 2.0, 3.0, 4.0]));
        let picked = constants.select(&[3, 1]).unwrap();
        assert_eq!(picked.instance_count(), 2);
        assert_eq!(picked.instances[0].key, vec![4.0]);
        assert_eq!(picked.instances[0].offset, 0);
        assert_eq!(picked.instances[1].key, vec![2.0]);
        assert_eq!(picked.instances[1].offset, 5);
        assert!(constants.select(&[9]).is_err());
    }

    #[test]
    fn ivc_multi_stacks_and_validates() {
        let (values, constants) = Toy.ivc_multi(&params_for(&[1.0, 2.0])).unwrap();
        assert_eq!(constants.vars_per_instance, 5);
        assert_eq!(values.len(), 10);
        assert!(constants.validate(values.len()).is_ok());
        assert!(constants.validate(9).is_err());
        assert_eq!(constants.block(&values, 1).unwrap()[0], Complex64::new(2.0, 0.0));
    }

    #[test]
    fn block_outside_the_state_is_an_error() {
        let (values, constants) = Toy.ivc_multi(&params_for(&[1.0, 2.0])).unwrap();
        let err = constants.block(&values[..7], 1).unwrap_err();
        assert!(err.to_string().contains("has no block 1"), "{err}");
        assert!(constants.block(&values, 2).is_err());
        assert_eq!(constants.block(&values[..5], 0).unwrap().len(), 5);
    }

    #[test]
    fn default_rhs_reports_missing_equations() {
        let constants = StackConstants::new(1, 5, &params_for(&[1.0]));
        let mut out = vec![0.0; 5];
        let err = Toy
            .f_multi_real(0.0, &[0.0; 5], &constants, &mut out)
            .unwrap_err();
        assert!(format!("{err}").contains("real right-hand side"));
    }

    #[test]
    fn registry_lookup_lists_known_codes() {
        let registry: PropertyRegistry<Toy> = PropertyRegistry::new()
            .with("square", |_, p| Ok(PropertyValue::Scalar(p.get("a")?.powi(2))));
        let f = registry.get("square").unwrap();
        assert_eq!(f(&Toy, &Toy.params().with("a", 3.0)).unwrap(), PropertyValue::Scalar(9.0));
        let err = registry.get("cube").err().unwrap();
        assert!(format!("{err}").contains("[square]"));
    }

    #[test]
    fn branch_collapse_ignores_nan() {
        let value = PropertyValue::Branches(vec![1.0, f64::NAN, -2.0]);
        assert_eq!(value.collapse(true), 1.0);
        assert_eq!(value.collapse(false), -2.0);
        assert!(PropertyValue::Branches(vec![]).collapse(true).is_nan());
        assert!(value.as_scalar().is_err());
    }
}
