use crate::error::{AutodeError, Result};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::trace;

const MIN_DAMPING: f64 = 1e-12;
const MAX_DAMPING: f64 = 1e16;

/// The same closed interval applied to every parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub lower: f64,
    pub upper: f64,
}

impl Bounds {
    pub fn new(lower: f64, upper: f64) -> Result<Self> {
        if lower.is_nan() || upper.is_nan() || lower > upper {
            return Err(AutodeError::settings(format!(
                "invalid bounds [{lower}, {upper}]"
            )));
        }
        Ok(Self { lower, upper })
    }

    /// `[-half_width, half_width]`
    pub fn symmetric(half_width: f64) -> Self {
        Self {
            lower: -half_width,
            upper: half_width,
        }
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.max(self.lower).min(self.upper)
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.lower && value <= self.upper
    }

    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Minimum {
    pub params: Vec<f64>,
    /// Sum of squared residuals at `params`.
    pub cost: f64,
    pub evaluations: usize,
    pub iterations: usize,
}

/// A least-squares routine: minimizes `|residual(p)|^2` over `p` inside `bounds`.
pub trait Minimizer {
    fn minimize(
        &self,
        residual: &mut dyn FnMut(&[f64]) -> Result<DVector<f64>>,
        initial: &[f64],
        bounds: Bounds,
    ) -> Result<Minimum>;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LmSettings {
    /// Residual evaluations per call, Jacobian columns included.
    pub max_evaluations: usize,
    /// Stop when an accepted step reduces the cost by less than this fraction.
    pub ftol: f64,
    /// Stop when a step moves the parameters by less than this (relative).
    pub xtol: f64,
    /// Stop when the gradient's largest component falls below this.
    pub gtol: f64,
    pub initial_damping: f64,
}

impl Default for LmSettings {
    fn default() -> Self {
        Self {
            max_evaluations: 10_000,
            ftol: 1e-12,
            xtol: 1e-12,
            gtol: 1e-14,
            initial_damping: 1e-3,
        }
    }
}

/// Forward-difference Jacobian with Marquardt's diagonal scaling. Trial points are
/// projected back into the box; a [`AutodeError::FitDivergence`] at a trial point
/// rejects the step and anything else propagates.
#[derive(Debug, Clone, Default)]
pub struct LevenbergMarquardt {
    settings: LmSettings,
}

impl LevenbergMarquardt {
    pub fn new(settings: LmSettings) -> Result<Self> {
        if settings.max_evaluations == 0 {
            return Err(AutodeError::settings("max_evaluations must be at least 1"));
        }
        if !(settings.initial_damping > 0.0) {
            return Err(AutodeError::settings("initial_damping must be positive"));
        }
        Ok(Self { settings })
    }

    pub fn settings(&self) -> &LmSettings {
        &self.settings
    }

    fn jacobian(
        residual: &mut dyn FnMut(&[f64]) -> Result<DVector<f64>>,
        x: &[f64],
        r: &DVector<f64>,
        bounds: Bounds,
        evaluations: &mut usize,
    ) -> Result<DMatrix<f64>> {
        let mut jac = DMatrix::zeros(r.len(), x.len());
        let mut probe = x.to_vec();
        for j in 0..x.len() {
            let h = f64::EPSILON.sqrt() * x[j].abs().max(1.0);
            let step = if x[j] + h <= bounds.upper { h } else { -h };
            probe[j] = x[j] + step;
            let shifted = residual(&probe)?;
            *evaluations += 1;
            probe[j] = x[j];
            if shifted.len() != r.len() {
                return Err(AutodeError::shape(format!(
                    "residual length changed from {} to {}",
                    r.len(),
                    shifted.len()
                )));
            }
            jac.set_column(j, &((shifted - r) / step));
        }
        if jac.iter().any(|v| !v.is_finite()) {
            return Err(AutodeError::divergence("Jacobian has non-finite entries"));
        }
        Ok(jac)
    }
}

fn solve_damped(jtj: &DMatrix<f64>, g: &DVector<f64>, damping: f64) -> Option<DVector<f64>> {
    let mut a = jtj.clone();
    for i in 0..a.nrows() {
        a[(i, i)] += damping * jtj[(i, i)].max(MIN_DAMPING);
    }
    let rhs = -g;
    match a.clone().cholesky() {
        Some(chol) => Some(chol.solve(&rhs)),
        None => a.lu().solve(&rhs),
    }
}

impl Minimizer for LevenbergMarquardt {
    fn minimize(
        &self,
        residual: &mut dyn FnMut(&[f64]) -> Result<DVector<f64>>,
        initial: &[f64],
        bounds: Bounds,
    ) -> Result<Minimum> {
        let settings = &self.settings;
        let mut x: Vec<f64> = initial.iter().map(|&v| bounds.clamp(v)).collect();
        let mut r = residual(&x)?;
        let mut evaluations = 1;
        let mut cost = r.norm_squared();
        if !cost.is_finite() {
            return Err(AutodeError::divergence(
                "residual is not finite at the starting point",
            ));
        }

        let mut damping = settings.initial_damping;
        let mut iterations = 0;
        'outer: while !x.is_empty() && cost > 0.0 && evaluations < settings.max_evaluations {
            iterations += 1;
            let jac = Self::jacobian(residual, &x, &r, bounds, &mut evaluations)?;
            let g = jac.tr_mul(&r);
            if g.amax() <= settings.gtol {
                break;
            }
            let jtj = jac.tr_mul(&jac);

            loop {
                if evaluations >= settings.max_evaluations {
                    break 'outer;
                }
                let Some(step) = solve_damped(&jtj, &g, damping) else {
                    damping *= 10.0;
                    if damping > MAX_DAMPING {
                        break 'outer;
                    }
                    continue;
                };

                let candidate: Vec<f64> = x
                    .iter()
                    .zip(step.iter())
                    .map(|(xi, si)| bounds.clamp(xi + si))
                    .collect();
                let moved = x
                    .iter()
                    .zip(&candidate)
                    .map(|(a, b)| (a - b).abs())
                    .fold(0.0, f64::max);
                let scale = x.iter().map(|v| v.abs()).fold(0.0, f64::max);
                if moved <= settings.xtol * (scale + settings.xtol) {
                    break 'outer;
                }

                evaluations += 1;
                match residual(&candidate) {
                    Ok(next) => {
                        let next_cost = next.norm_squared();
                        if next_cost.is_finite() && next_cost < cost {
                            let reduction = (cost - next_cost) / cost;
                            x = candidate;
                            r = next;
                            cost = next_cost;
                            damping = (damping / 10.0).max(MIN_DAMPING);
                            trace!(iterations, cost, damping, "accepted step");
                            if reduction <= settings.ftol {
                                break 'outer;
                            }
                            continue 'outer;
                        }
                    }
                    Err(err) if err.is_recoverable() => {}
                    Err(err) => return Err(err),
                }

                damping *= 10.0;
                if damping > MAX_DAMPING {
                    break 'outer;
                }
            }
        }

        Ok(Minimum {
            params: x,
            cost,
            evaluations,
            iterations,
        })
    }
}
