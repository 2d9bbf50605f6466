/// The `autode_core` crate searches for the structure of an ordinary differential equation
/// system that explains an observed trajectory.
///
/// Candidate right-hand sides are built from polynomial terms in the state variables, compiled
/// into callable functions, assembled into a vector field and then fitted to the data by a
/// randomized multi-start least-squares search.
///
/// Key components:
/// - **Terms**: `TermEnumerator` lists monomials over `x1..xN` and `t`.
/// - **Expressions**: additive combinations of monomials with named coefficients, per dimension
///   and as full candidate models.
/// - **Compiler**: parses expression text into a function over declared parameters.
/// - **Vector field**: binds compiled equations to one shared coefficient vector.
/// - **Fitting**: `MultiStartFitter` over an `Integrator` (RK4, Tsit5) and a bounded
///   Levenberg-Marquardt `Minimizer`.
pub mod compiler;
pub mod dataset;
pub mod equation_engine;
pub mod error;
pub mod expressions;
pub mod fitting;
pub mod generators;
pub mod integrator;
pub mod least_squares;
pub mod solvers;
pub mod terms;
pub mod traits;
pub mod vector_field;

pub use compiler::{compile, CompiledFunction};
pub use dataset::Dataset;
pub use error::{AutodeError, Result};
pub use expressions::{
    expressions_for_one_dimension, full_model_space, AdditiveExpression, CandidateModel,
    ExpressionSpace, ModelSpace, Term,
};
pub use fitting::{FitResult, FitSettings, Interrupt, MultiStartFitter};
pub use generators::{FieldGenerator, LinearGenerator, TankGenerator};
pub use integrator::{Integrator, IntegratorSettings, OdeIntegrator, Stepper};
pub use least_squares::{Bounds, LevenbergMarquardt, LmSettings, Minimizer, Minimum};
pub use terms::{enumerate, Monomial, TermEnumerator, Variable};
pub use traits::{DynamicalSystem, Evaluator, Generator, Scalar, Steppable};
pub use vector_field::VectorField;
