use anyhow::Result;

/// A first-order system of real ODEs `dx/dt = f(t, x)`.
///
/// Complex-valued systems are presented to the integrators through this
/// trait with their state packed as interleaved real/imaginary parts.
pub trait DynamicalSystem {
    /// Returns the dimension of the state space.
    fn dimension(&self) -> usize;

    /// Evaluates the vector field.
    /// t: current time
    /// x: current state
    /// out: buffer to write dx/dt
    fn apply(&self, t: f64, x: &[f64], out: &mut [f64]) -> Result<()>;
}

/// A trait for solvers that can step a system forward by a fixed amount.
pub trait Steppable {
    /// Performs one step of size dt.
    /// t: current time (updated after step)
    /// state: current state (updated after step)
    /// dt: step size
    fn step(
        &mut self,
        system: &impl DynamicalSystem,
        t: &mut f64,
        state: &mut [f64],
        dt: f64,
    ) -> Result<()>;
}
