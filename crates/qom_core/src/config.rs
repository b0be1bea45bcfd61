//! JSON sweep configuration.
//!
//! A [`SweepConfig`] names the sweep function in its `"func"` field and
//! carries the axes and options that function needs:
//!
//! ```json
//! { "func": "properties_1d", "code": "square", "X": { "var": "x", "min": 0, "max": 1, "steps": 11 } }
//! ```

use crate::axis::AxisSpec;
use crate::loopers::dynamics::{DynamicsSpec, MeasureRequest};
use crate::loopers::properties::GradAxis;
use crate::loopers::{Looper, SweepResult};
use crate::measures::{Aggregation, MeasureSpec, SpanMode};
use crate::system::SweepSystem;
use crate::threshold::ThresholdMode;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid sweep configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("'{func}' requires axis {axis}")]
    MissingAxis { func: &'static str, axis: &'static str },
    #[error("unknown property code '{code}', available: [{available}]")]
    UnknownProperty { code: String, available: String },
}

/// Options shared by every property sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySweep {
    pub code: String,
    /// Display name of the property.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "X", default)]
    pub x: Option<AxisSpec>,
    #[serde(rename = "Y", default)]
    pub y: Option<AxisSpec>,
    #[serde(rename = "Z", default)]
    pub z: Option<AxisSpec>,
    #[serde(default)]
    pub thres_mode: ThresholdMode,
    #[serde(default)]
    pub grad_axis: GradAxis,
}

/// Options shared by every dynamics-based sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasureSweep {
    pub dynamics: DynamicsSpec,
    pub measure: MeasureSpec,
    #[serde(default)]
    pub span: SpanMode,
    #[serde(default)]
    pub calc: Aggregation,
    #[serde(rename = "X", default)]
    pub x: Option<AxisSpec>,
    #[serde(rename = "Y", default)]
    pub y: Option<AxisSpec>,
    #[serde(rename = "Z", default)]
    pub z: Option<AxisSpec>,
    #[serde(default)]
    pub thres_mode: ThresholdMode,
}

impl MeasureSweep {
    pub fn request(&self) -> MeasureRequest {
        MeasureRequest {
            dynamics: self.dynamics.clone(),
            measure: self.measure.clone(),
            span: self.span,
            calc: self.calc,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "func")]
pub enum SweepConfig {
    #[serde(rename = "properties_1d")]
    Properties1d(PropertySweep),
    #[serde(rename = "properties_1d_multi")]
    Properties1dMulti(PropertySweep),
    #[serde(rename = "properties_2d")]
    Properties2d(PropertySweep),
    #[serde(rename = "properties_grad_1d")]
    PropertiesGrad1d(PropertySweep),
    #[serde(rename = "properties_grad_1d_multi")]
    PropertiesGrad1dMulti(PropertySweep),
    #[serde(rename = "properties_grad_2d")]
    PropertiesGrad2d(PropertySweep),
    #[serde(rename = "dynamics_measure")]
    DynamicsMeasure(MeasureSweep),
    #[serde(rename = "measures_1d")]
    Measures1d(MeasureSweep),
    #[serde(rename = "measures_1d_multi")]
    Measures1dMulti(MeasureSweep),
    #[serde(rename = "measures_2d")]
    Measures2d(MeasureSweep),
}

fn require<'c>(
    axis: &'c Option<AxisSpec>,
    func: &'static str,
    name: &'static str,
) -> Result<&'c AxisSpec, ConfigError> {
    axis.as_ref()
        .ok_or(ConfigError::MissingAxis { func, axis: name })
}

impl SweepConfig {
    /// Parses a configuration and checks that the axes its function needs
    /// are present.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: SweepConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn func(&self) -> &'static str {
        match self {
            SweepConfig::Properties1d(_) => "properties_1d",
            SweepConfig::Properties1dMulti(_) => "properties_1d_multi",
            SweepConfig::Properties2d(_) => "properties_2d",
            SweepConfig::PropertiesGrad1d(_) => "properties_grad_1d",
            SweepConfig::PropertiesGrad1dMulti(_) => "properties_grad_1d_multi",
            SweepConfig::PropertiesGrad2d(_) => "properties_grad_2d",
            SweepConfig::DynamicsMeasure(_) => "dynamics_measure",
            SweepConfig::Measures1d(_) => "measures_1d",
            SweepConfig::Measures1dMulti(_) => "measures_1d_multi",
            SweepConfig::Measures2d(_) => "measures_2d",
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let func = self.func();
        match self {
            SweepConfig::Properties1d(p) => {
                require(&p.x, func, "X")?;
            }
            SweepConfig::Properties1dMulti(p) => {
                require(&p.x, func, "X")?;
                require(&p.z, func, "Z")?;
            }
            SweepConfig::Properties2d(p) | SweepConfig::PropertiesGrad2d(p) => {
                require(&p.x, func, "X")?;
                require(&p.y, func, "Y")?;
            }
            SweepConfig::PropertiesGrad1d(p) => {
                require(&p.x, func, "X")?;
                if p.grad_axis == GradAxis::Y {
                    require(&p.y, func, "Y")?;
                }
            }
            SweepConfig::PropertiesGrad1dMulti(p) => {
                require(&p.x, func, "X")?;
                require(&p.z, func, "Z")?;
                if p.grad_axis == GradAxis::Y {
                    require(&p.y, func, "Y")?;
                }
            }
            SweepConfig::DynamicsMeasure(_) => {}
            SweepConfig::Measures1d(m) => {
                require(&m.x, func, "X")?;
            }
            SweepConfig::Measures1dMulti(m) => {
                require(&m.x, func, "X")?;
                require(&m.z, func, "Z")?;
            }
            SweepConfig::Measures2d(m) => {
                require(&m.x, func, "X")?;
                require(&m.y, func, "Y")?;
            }
        }
        Ok(())
    }

    /// Checks the configuration against `system` before anything is computed.
    pub fn check_system<S: SweepSystem>(&self, system: &S) -> Result<(), ConfigError> {
        self.validate()?;
        let code = match self {
            SweepConfig::Properties1d(p)
            | SweepConfig::Properties1dMulti(p)
            | SweepConfig::Properties2d(p)
            | SweepConfig::PropertiesGrad1d(p)
            | SweepConfig::PropertiesGrad1dMulti(p)
            | SweepConfig::PropertiesGrad2d(p) => &p.code,
            _ => return Ok(()),
        };
        let registry = system.properties();
        if !registry.contains(code) {
            return Err(ConfigError::UnknownProperty {
                code: code.clone(),
                available: registry.codes().join(", "),
            });
        }
        Ok(())
    }

    /// Runs the configured sweep on `looper`.
    pub fn run_on<S: SweepSystem>(&self, looper: &mut Looper<'_, S>) -> Result<SweepResult> {
        self.check_system(looper.system)?;
        info!(func = self.func(), system = looper.system.code(), "running sweep");
        let func = self.func();
        match self {
            SweepConfig::Properties1d(p) => {
                looper.properties_1d(&p.code, require(&p.x, func, "X")?, p.thres_mode)
            }
            SweepConfig::Properties1dMulti(p) => looper.properties_1d_multi(
                &p.code,
                require(&p.x, func, "X")?,
                require(&p.z, func, "Z")?,
                p.thres_mode,
            ),
            SweepConfig::Properties2d(p) => looper.properties_2d(
                &p.code,
                require(&p.x, func, "X")?,
                require(&p.y, func, "Y")?,
                p.thres_mode,
            ),
            SweepConfig::PropertiesGrad1d(p) => looper.properties_grad_1d(
                &p.code,
                require(&p.x, func, "X")?,
                p.y.as_ref(),
                p.grad_axis,
                p.thres_mode,
            ),
            SweepConfig::PropertiesGrad1dMulti(p) => looper.properties_grad_1d_multi(
                &p.code,
                require(&p.x, func, "X")?,
                p.y.as_ref(),
                require(&p.z, func, "Z")?,
                p.grad_axis,
                p.thres_mode,
            ),
            SweepConfig::PropertiesGrad2d(p) => looper.properties_grad_2d(
                &p.code,
                require(&p.x, func, "X")?,
                require(&p.y, func, "Y")?,
                p.thres_mode,
            ),
            SweepConfig::DynamicsMeasure(m) => {
                looper.dynamics_measure(&m.request(), m.x.as_ref(), m.thres_mode)
            }
            SweepConfig::Measures1d(m) => {
                looper.measures_1d(&m.request(), require(&m.x, func, "X")?, m.thres_mode)
            }
            SweepConfig::Measures1dMulti(m) => looper.measures_1d_multi(
                &m.request(),
                require(&m.x, func, "X")?,
                require(&m.z, func, "Z")?,
                m.thres_mode,
            ),
            SweepConfig::Measures2d(m) => looper.measures_2d(
                &m.request(),
                require(&m.x, func, "X")?,
                require(&m.y, func, "Y")?,
                m.thres_mode,
            ),
        }
    }
}

/// Runs `config` on `system` from its base parameters.
pub fn run<S: SweepSystem>(system: &S, config: &SweepConfig) -> Result<SweepResult> {
    let mut looper = Looper::new(system);
    config.run_on(&mut looper)
}
