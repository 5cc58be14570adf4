use crate::error::IntegrationError;
use num_traits::{Float, FromPrimitive};
use std::fmt::Debug;

/// A trait for types that can be used as scalars in the integrators.
/// Must support basic arithmetic, debug printing, and conversion from f64.
pub trait Scalar: Float + FromPrimitive + Debug + 'static {}

impl<T: Float + FromPrimitive + Debug + 'static> Scalar for T {}

/// Converts an `f64` constant into the scalar type.
/// Values the target type cannot represent become NaN, which the step
/// controller then reports as a non-finite state.
pub fn lit<T: Scalar>(value: f64) -> T {
    T::from_f64(value).unwrap_or_else(T::nan)
}

/// Represents a continuous-time dynamical system `dx/dt = f(t, x)`.
pub trait DynamicalSystem<T: Scalar> {
    /// Returns the dimension of the state space.
    fn dimension(&self) -> usize;

    /// Evaluates the vector field.
    /// t: current time
    /// x: current state
    /// out: buffer to write dx/dt into
    fn apply(&self, t: T, x: &[T], out: &mut [T]);
}

/// An explicit embedded Runge-Kutta pair with a continuous extension.
pub trait EmbeddedStepper<T: Scalar> {
    /// Order of the embedded error estimate. The step-size controller
    /// scales with exponent `1 / (error_order + 1)`.
    fn error_order(&self) -> usize;

    /// Attempts one step of size `dt` from `(t, state)`.
    /// Writes the propagated solution into `out` and the local error
    /// estimate into `err`. Stage values are retained so that
    /// [`EmbeddedStepper::interpolate`] can evaluate inside the step.
    fn try_step(
        &mut self,
        system: &impl DynamicalSystem<T>,
        t: T,
        state: &[T],
        dt: T,
        out: &mut [T],
        err: &mut [T],
    );

    /// Evaluates the continuous extension of the last attempted step at the
    /// fraction `theta` in `[0, 1]`. `start` and `end` are the states at both
    /// ends of that step.
    fn interpolate(&self, theta: T, dt: T, start: &[T], end: &[T], out: &mut [T]);
}

/// Read-only view of an integrator positioned just after an accepted step.
pub trait DenseView<T: Scalar> {
    /// Start of the most recent accepted step.
    fn previous_time(&self) -> T;
    /// State at [`DenseView::previous_time`].
    fn previous_state(&self) -> &[T];
    /// End of the most recent accepted step.
    fn current_time(&self) -> T;
    /// State at [`DenseView::current_time`].
    fn current_state(&self) -> &[T];
    /// Number of accepted steps since the last initialization.
    fn steps(&self) -> usize;
    /// Dense output: evaluates the state at any `t` inside the most recent
    /// accepted step.
    fn calc_state(&self, t: T, out: &mut [T]) -> Result<(), IntegrationError>;
}

/// An adaptive integration engine with dense output.
///
/// Any engine that can advance to a requested time, control its own step
/// size, report divergence as an error, and answer dense queries inside its
/// last step can drive the spin tracker.
pub trait DenseOutput<T: Scalar>: DenseView<T> {
    /// Resets the engine to `state` at time `t`. The next advance picks its
    /// own initial step size.
    fn initialize(&mut self, state: &[T], t: T);

    /// Integrates from the current time up to exactly `t_end`.
    ///
    /// `observe` is called after every accepted step with a view positioned
    /// on that step. Returns the number of accepted steps.
    fn advance<D, E, F>(&mut self, system: &D, t_end: T, observe: F) -> Result<usize, E>
    where
        D: DynamicalSystem<T>,
        E: From<IntegrationError>,
        F: FnMut(&dyn DenseView<T>) -> Result<(), E>;
}
