use crate::dataset::Dataset;
use crate::error::{AutodeError, Result};
use crate::integrator::{ensure_initial_row, Integrator, OdeIntegrator};
use crate::traits::{DynamicalSystem, Generator};
use crate::vector_field::VectorField;

/// Adapts a closure to [`DynamicalSystem`].
struct FnSystem<F> {
    dimension: usize,
    rhs: F,
}

impl<F: Fn(f64, &[f64], &mut [f64])> DynamicalSystem<f64> for FnSystem<F> {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn apply(&self, t: f64, x: &[f64], out: &mut [f64]) {
        (self.rhs)(t, x, out)
    }
}

fn sample(
    integrator: &OdeIntegrator,
    system: &impl DynamicalSystem<f64>,
    initial: &[f64],
    times: &[f64],
) -> Result<Dataset> {
    let trajectory = integrator.integrate(system, initial, times)?;
    ensure_initial_row(&trajectory, initial)?;
    Dataset::new(times.to_vec(), trajectory)
}

/// Two coupled tanks exchanging fluid:
/// `x1' = a x1 + b x2`, `x2' = c x1 + d x2`.
#[derive(Debug, Clone)]
pub struct TankGenerator {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub initial: [f64; 2],
    integrator: OdeIntegrator,
}

impl Default for TankGenerator {
    fn default() -> Self {
        Self::new(-2.0 / 25.0, 1.0 / 50.0, 2.0 / 25.0, -2.0 / 25.0, [25.0, 0.0])
    }
}

impl TankGenerator {
    pub fn new(a: f64, b: f64, c: f64, d: f64, initial: [f64; 2]) -> Self {
        Self {
            a,
            b,
            c,
            d,
            initial,
            integrator: OdeIntegrator::default(),
        }
    }

    pub fn with_integrator(mut self, integrator: OdeIntegrator) -> Self {
        self.integrator = integrator;
        self
    }
}

impl Generator for TankGenerator {
    fn generate(&self, times: &[f64]) -> Result<Dataset> {
        let (a, b, c, d) = (self.a, self.b, self.c, self.d);
        let system = FnSystem {
            dimension: 2,
            rhs: move |_t: f64, x: &[f64], out: &mut [f64]| {
                out[0] = a * x[0] + b * x[1];
                out[1] = c * x[0] + d * x[1];
            },
        };
        sample(&self.integrator, &system, &self.initial, times)
    }
}

/// Scalar affine system `y' = a y + b`.
#[derive(Debug, Clone)]
pub struct LinearGenerator {
    pub a: f64,
    pub b: f64,
    pub initial: f64,
    integrator: OdeIntegrator,
}

impl LinearGenerator {
    pub fn new(a: f64, b: f64, initial: f64) -> Self {
        Self {
            a,
            b,
            initial,
            integrator: OdeIntegrator::default(),
        }
    }

    pub fn with_integrator(mut self, integrator: OdeIntegrator) -> Self {
        self.integrator = integrator;
        self
    }
}

impl Generator for LinearGenerator {
    fn generate(&self, times: &[f64]) -> Result<Dataset> {
        let (a, b) = (self.a, self.b);
        let system = FnSystem {
            dimension: 1,
            rhs: move |_t: f64, x: &[f64], out: &mut [f64]| out[0] = a * x[0] + b,
        };
        sample(&self.integrator, &system, &[self.initial], times)
    }
}

/// Samples an assembled [`VectorField`] with fixed coefficients.
#[derive(Debug, Clone)]
pub struct FieldGenerator<'a> {
    field: &'a VectorField,
    coefficients: Vec<f64>,
    initial: Vec<f64>,
    integrator: OdeIntegrator,
}

impl<'a> FieldGenerator<'a> {
    pub fn new(field: &'a VectorField, coefficients: Vec<f64>, initial: Vec<f64>) -> Result<Self> {
        if coefficients.len() != field.coefficient_count() {
            return Err(AutodeError::resolution(format!(
                "field takes {} coefficients, got {}",
                field.coefficient_count(),
                coefficients.len()
            )));
        }
        if initial.len() != field.dimension() {
            return Err(AutodeError::shape(format!(
                "initial state has {} components but the field has dimension {}",
                initial.len(),
                field.dimension()
            )));
        }
        Ok(Self {
            field,
            coefficients,
            initial,
            integrator: OdeIntegrator::default(),
        })
    }

    pub fn with_integrator(mut self, integrator: OdeIntegrator) -> Self {
        self.integrator = integrator;
        self
    }
}

impl Generator for FieldGenerator<'_> {
    fn generate(&self, times: &[f64]) -> Result<Dataset> {
        let system = self.field.bind(&self.coefficients)?;
        sample(&self.integrator, &system, &self.initial, times)
    }
}
