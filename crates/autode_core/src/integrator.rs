use crate::error::{AutodeError, Result};
use crate::solvers::{RungeKutta, Tableau, RK4_TABLEAU, TSIT5_TABLEAU};
use crate::traits::{DynamicalSystem, Steppable};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

/// Produces the trajectory of a system sampled at `times`, starting from `initial`
/// at `times[0]`. Row `i` of the result is the state at `times[i]`.
pub trait Integrator {
    fn integrate<S: DynamicalSystem<f64>>(
        &self,
        system: &S,
        initial: &[f64],
        times: &[f64],
    ) -> Result<DMatrix<f64>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stepper {
    Rk4,
    Tsit5,
}

impl Stepper {
    fn tableau(self) -> &'static Tableau {
        match self {
            Stepper::Rk4 => &RK4_TABLEAU,
            Stepper::Tsit5 => &TSIT5_TABLEAU,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IntegratorSettings {
    pub stepper: Stepper,
    /// Largest step taken inside one observation interval.
    pub max_step: f64,
    /// Most steps one observation interval may take before integration is refused.
    pub max_substeps: usize,
}

impl Default for IntegratorSettings {
    fn default() -> Self {
        Self {
            stepper: Stepper::Rk4,
            max_step: 0.05,
            max_substeps: 100_000,
        }
    }
}

/// Fixed-step Runge-Kutta integration, sub-stepping each observation interval.
#[derive(Debug, Clone, Default)]
pub struct OdeIntegrator {
    settings: IntegratorSettings,
}

impl OdeIntegrator {
    pub fn new(settings: IntegratorSettings) -> Result<Self> {
        if !settings.max_step.is_finite() || settings.max_step <= 0.0 {
            return Err(AutodeError::settings(format!(
                "max_step must be positive and finite, got {}",
                settings.max_step
            )));
        }
        if settings.max_substeps == 0 {
            return Err(AutodeError::settings("max_substeps must be at least 1"));
        }
        Ok(Self { settings })
    }

    pub fn settings(&self) -> &IntegratorSettings {
        &self.settings
    }
}

impl Integrator for OdeIntegrator {
    fn integrate<S: DynamicalSystem<f64>>(
        &self,
        system: &S,
        initial: &[f64],
        times: &[f64],
    ) -> Result<DMatrix<f64>> {
        let dim = system.dimension();
        if initial.len() != dim {
            return Err(AutodeError::shape(format!(
                "initial state has {} components but the system has dimension {dim}",
                initial.len()
            )));
        }
        if times.is_empty() {
            return Err(AutodeError::shape("integration needs at least one time point"));
        }

        let mut trajectory = DMatrix::zeros(times.len(), dim);
        for (j, &x) in initial.iter().enumerate() {
            trajectory[(0, j)] = x;
        }

        let mut stepper = RungeKutta::new(self.settings.stepper.tableau(), dim);
        let mut state = initial.to_vec();
        for (row, window) in times.windows(2).enumerate() {
            let span = window[1] - window[0];
            if !(span > 0.0) {
                return Err(AutodeError::shape(format!(
                    "times must be strictly increasing (t[{row}] = {}, t[{}] = {})",
                    window[0],
                    row + 1,
                    window[1]
                )));
            }
            let steps = (span / self.settings.max_step).ceil().max(1.0);
            let limit = self.settings.max_substeps;
            if !(steps <= limit as f64) {
                return Err(AutodeError::settings(format!(
                    "interval [{}, {}] needs {steps:e} steps of at most {}, limit is {limit}",
                    window[0], window[1], self.settings.max_step
                )));
            }
            let steps = steps as usize;
            let dt = span / steps as f64;
            let mut t = window[0];
            for _ in 0..steps {
                stepper.step(system, &mut t, &mut state, dt);
                if let Some(j) = state.iter().position(|x| !x.is_finite()) {
                    return Err(AutodeError::divergence(format!(
                        "state component {} became {} at t = {t}",
                        j + 1,
                        state[j]
                    )));
                }
            }
            for (j, &x) in state.iter().enumerate() {
                trajectory[(row + 1, j)] = x;
            }
        }
        Ok(trajectory)
    }
}

/// Checks that a trajectory starts exactly at `initial`.
pub fn ensure_initial_row(trajectory: &DMatrix<f64>, initial: &[f64]) -> Result<()> {
    if trajectory.nrows() == 0 || trajectory.ncols() != initial.len() {
        return Err(AutodeError::shape(format!(
            "trajectory is {}x{} but the initial state has {} components",
            trajectory.nrows(),
            trajectory.ncols(),
            initial.len()
        )));
    }
    let first: Vec<f64> = trajectory.row(0).iter().copied().collect();
    if first != initial {
        return Err(AutodeError::consistency(format!(
            "first row {first:?} does not reproduce the initial state {initial:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Linear {
        matrix: [[f64; 2]; 2],
    }

    impl DynamicalSystem<f64> for Linear {
        fn dimension(&self) -> usize {
            2
        }

        fn apply(&self, _t: f64, x: &[f64], out: &mut [f64]) {
            for i in 0..2 {
                out[i] = self.matrix[i][0] * x[0] + self.matrix[i][1] * x[1];
            }
        }
    }

    fn grid(n: usize, dt: f64) -> Vec<f64> {
        (0..n).map(|i| i as f64 * dt).collect()
    }

    #[test]
    fn reproduces_exponential_decay_on_an_uneven_grid() {
        let system = Linear {
            matrix: [[-0.5, 0.0], [0.0, 0.25]],
        };
        let times = [0.0, 0.3, 1.0, 2.5, 4.0];
        let trajectory = OdeIntegrator::default()
            .integrate(&system, &[2.0, 1.0], &times)
            .expect("integrates");
        assert_eq!(trajectory.shape(), (5, 2));
        for (i, &t) in times.iter().enumerate() {
            assert!((trajectory[(i, 0)] - 2.0 * (-0.5 * t).exp()).abs() < 1e-8);
            assert!((trajectory[(i, 1)] - (0.25 * t).exp()).abs() < 1e-8);
        }
        ensure_initial_row(&trajectory, &[2.0, 1.0]).expect("starts at the initial state");
    }

    #[test]
    fn steppers_agree() {
        let system = Linear {
            matrix: [[0.0, 1.0], [-1.0, 0.0]],
        };
        let times = grid(20, 0.5);
        let rk4 = OdeIntegrator::default()
            .integrate(&system, &[1.0, 0.0], &times)
            .expect("integrates");
        let tsit5 = OdeIntegrator::new(IntegratorSettings {
            stepper: Stepper::Tsit5,
            max_step: 0.05,
            ..IntegratorSettings::default()
        })
        .expect("valid settings")
        .integrate(&system, &[1.0, 0.0], &times)
        .expect("integrates");
        assert!((&rk4 - &tsit5).amax() < 1e-5);
        assert!((rk4[(19, 0)] - (9.5f64).cos()).abs() < 1e-5);
    }

    #[test]
    fn blow_up_is_a_divergence() {
        let system = Linear {
            matrix: [[400.0, 0.0], [0.0, 0.0]],
        };
        let err = OdeIntegrator::default()
            .integrate(&system, &[1.0, 1.0], &grid(20, 1.0))
            .unwrap_err();
        assert!(err.is_recoverable(), "{err}");
    }

    #[test]
    fn intervals_too_wide_for_the_step_limit_are_refused() {
        let system = Linear {
            matrix: [[-0.5, 0.0], [0.0, 0.0]],
        };
        let err = OdeIntegrator::default()
            .integrate(&system, &[1.0, 1.0], &[0.0, 1e300])
            .unwrap_err();
        assert!(matches!(err, AutodeError::InvalidSettings { .. }), "{err}");

        let tight = OdeIntegrator::new(IntegratorSettings {
            max_substeps: 10,
            ..IntegratorSettings::default()
        })
        .expect("valid settings");
        assert!(tight.integrate(&system, &[1.0, 1.0], &[0.0, 0.4]).is_ok());
        assert!(tight.integrate(&system, &[1.0, 1.0], &[0.0, 0.6]).is_err());
    }

    #[test]
    fn divergence_stops_at_the_first_bad_step() {
        // Finite-time blow-up of x' = x^2 from x(0) = 1 at t = 1.
        struct Riccati;
        impl DynamicalSystem<f64> for Riccati {
            fn dimension(&self) -> usize {
                1
            }

            fn apply(&self, _t: f64, x: &[f64], out: &mut [f64]) {
                out[0] = x[0] * x[0];
            }
        }
        let integrator = OdeIntegrator::new(IntegratorSettings {
            max_step: 1e-3,
            ..IntegratorSettings::default()
        })
        .expect("valid settings");
        let err = integrator
            .integrate(&Riccati, &[1.0], &[0.0, 100.0])
            .unwrap_err();
        assert!(err.is_recoverable(), "{err}");
        let message = err.to_string();
        let at: f64 = message
            .rsplit("t = ")
            .next()
            .and_then(|tail| tail.parse().ok())
            .expect("message names the time");
        assert!(at < 2.0, "{message}");
    }

    #[test]
    fn shape_and_settings_are_validated() {
        let system = Linear {
            matrix: [[0.0; 2]; 2],
        };
        let integrator = OdeIntegrator::default();
        assert!(matches!(
            integrator.integrate(&system, &[1.0], &[0.0, 1.0]),
            Err(AutodeError::Shape { .. })
        ));
        assert!(integrator.integrate(&system, &[1.0, 1.0], &[]).is_err());
        assert!(integrator.integrate(&system, &[1.0, 1.0], &[0.0, 0.0]).is_err());
        assert!(OdeIntegrator::new(IntegratorSettings {
            stepper: Stepper::Rk4,
            max_step: 0.0,
            ..IntegratorSettings::default()
        })
        .is_err());
        assert!(OdeIntegrator::new(IntegratorSettings {
            max_substeps: 0,
            ..IntegratorSettings::default()
        })
        .is_err());
    }

    #[test]
    fn mismatched_first_row_is_a_consistency_error() {
        let trajectory = DMatrix::from_row_slice(2, 2, &[1.0, 0.5, 2.0, 2.0]);
        assert!(matches!(
            ensure_initial_row(&trajectory, &[1.0, 0.0]),
            Err(AutodeError::Consistency { .. })
        ));
    }
}
