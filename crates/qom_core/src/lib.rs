/// The `qom_core` crate drives parameter sweeps over quantum-optomechanical models.
/// A caller supplies a system exposing ODE right-hand sides and algebraic
/// properties; the crate builds axes, integrates dynamics, reduces the
/// trajectories to scalar measures and extracts thresholds from the results.
///
/// Key components:
/// - **Traits / Solvers**: `DynamicalSystem`, `Steppable`, RK4 and adaptive Tsit5.
/// - **System**: the `SweepSystem` contract, parameter snapshots and stacked constants.
/// - **Measures**: correlation-matrix reducers and the unwrapped phase difference.
/// - **Loopers**: property, gradient and measure sweeps with an optional on-disk cache.
/// - **Routh-Hurwitz**: stability check from a drift matrix or polynomial.
pub mod axis;
pub mod cache;
pub mod config;
pub mod dynamics;
pub mod gradient;
pub mod logging;
pub mod loopers;
pub mod measures;
pub mod params;
pub mod routh_hurwitz;
pub mod solvers;
pub mod system;
pub mod threshold;
pub mod traits;
