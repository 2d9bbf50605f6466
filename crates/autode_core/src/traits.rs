use crate::dataset::Dataset;
use crate::error::Result;
use crate::fitting::FitResult;
use crate::vector_field::VectorField;
use num_traits::{Float, FromPrimitive};
use std::fmt::Debug;

/// A trait for types that compiled expressions and steppers can compute with.
/// Must support basic arithmetic, debug printing, and conversion from f64.
pub trait Scalar: Float + FromPrimitive + Debug + 'static {}

impl<T: Float + FromPrimitive + Debug + 'static> Scalar for T {}

/// A continuous-time system with all of its coefficients already bound.
pub trait DynamicalSystem<T: Scalar> {
    /// Returns the dimension of the state space.
    fn dimension(&self) -> usize;

    /// Evaluates the vector field.
    /// t: current time
    /// x: current state
    /// out: buffer to write dx/dt into
    fn apply(&self, t: T, x: &[T], out: &mut [T]);
}

/// A trait for solvers that can step a system forward.
pub trait Steppable<T: Scalar> {
    /// Performs one step of size dt.
    /// t: current time (updated after step)
    /// state: current state (updated after step)
    /// dt: step size
    fn step(&mut self, system: &impl DynamicalSystem<T>, t: &mut T, state: &mut [T], dt: T);
}

/// Produces an observed trajectory on a caller-chosen time grid.
pub trait Generator {
    fn generate(&self, times: &[f64]) -> Result<Dataset>;
}

/// Scores how well a candidate vector field can explain a dataset.
pub trait Evaluator {
    fn evaluate(&self, dataset: &Dataset, field: &VectorField) -> Result<FitResult>;
}
