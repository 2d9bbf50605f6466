use crate::dataset::Dataset;
use crate::error::{AutodeError, Result};
use crate::integrator::{ensure_initial_row, Integrator, OdeIntegrator};
use crate::least_squares::{Bounds, LevenbergMarquardt, Minimizer, Minimum};
use crate::traits::Evaluator;
use crate::vector_field::VectorField;
use nalgebra::DVector;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitSettings {
    /// Stop once the best sum of squared residuals drops below this.
    pub threshold: f64,
    /// Growth factor of the search bounds between epochs.
    pub base: f64,
    pub attempts_per_exponent: usize,
    /// Number of bound-growth epochs.
    pub max_exponent: usize,
    /// Seed for the starting points; `None` draws one from the OS.
    pub seed: Option<u64>,
}

impl Default for FitSettings {
    fn default() -> Self {
        Self {
            threshold: 1e-5,
            base: 10.0,
            attempts_per_exponent: 100,
            max_exponent: 10,
            seed: None,
        }
    }
}

impl FitSettings {
    pub fn validate(&self) -> Result<()> {
        if !self.threshold.is_finite() || self.threshold < 0.0 {
            return Err(AutodeError::settings(format!(
                "threshold must be finite and non-negative, got {}",
                self.threshold
            )));
        }
        if !self.base.is_finite() || self.base <= 0.0 {
            return Err(AutodeError::settings(format!(
                "base must be finite and positive, got {}",
                self.base
            )));
        }
        if let Some(last) = self.max_exponent.checked_sub(1) {
            let widest = self.bound_for(last);
            if !widest.is_finite() || widest == 0.0 {
                return Err(AutodeError::settings(format!(
                    "base {} over {} epochs gives unusable bound {widest}",
                    self.base, self.max_exponent
                )));
            }
        }
        Ok(())
    }

    /// Half width of the search box in epoch `exponent`.
    pub fn bound_for(&self, exponent: usize) -> f64 {
        self.base.powi(exponent.min(i32::MAX as usize) as i32)
    }
}

/// Cooperative cancellation shared between a caller and a running fit.
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_triggered() {
            return Err(AutodeError::Interrupted);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    /// Best coefficients found, `None` when every attempt failed.
    pub params: Option<Vec<f64>>,
    /// Best sum of squared residuals; `+inf` until an attempt succeeds.
    pub score: f64,
    pub coefficient_names: Vec<String>,
    pub attempts: usize,
    pub failed_attempts: usize,
    /// Best score after each attempt.
    pub history: Vec<f64>,
}

impl FitResult {
    pub fn unfitted(coefficient_names: Vec<String>) -> Self {
        Self {
            params: None,
            score: f64::INFINITY,
            coefficient_names,
            attempts: 0,
            failed_attempts: 0,
            history: Vec::new(),
        }
    }

    /// False means the candidate could not be fitted at all; that is a verdict on
    /// the candidate, not an error.
    pub fn is_fitted(&self) -> bool {
        self.params.is_some()
    }

    /// Takes `minimum` if it beats the current best. Returns whether it did.
    pub fn absorb(&mut self, minimum: &Minimum) -> bool {
        self.attempts += 1;
        let improved = minimum.cost < self.score;
        if improved {
            self.score = minimum.cost;
            self.params = Some(minimum.params.clone());
        }
        self.history.push(self.score);
        improved
    }

    pub fn record_failure(&mut self) {
        self.attempts += 1;
        self.failed_attempts += 1;
        self.history.push(self.score);
    }

    pub fn named_params(&self) -> Option<Vec<(&str, f64)>> {
        let params = self.params.as_ref()?;
        Some(
            self.coefficient_names
                .iter()
                .map(String::as_str)
                .zip(params.iter().copied())
                .collect(),
        )
    }
}

/// Multi-start least-squares fitter over an [`Integrator`] and a [`Minimizer`].
///
/// Epoch `e` draws starting points uniformly from `[-base^e, base^e]` and boxes the
/// minimizer to the same range. The search stops once the best score beats the
/// threshold.
#[derive(Debug, Clone)]
pub struct MultiStartFitter<I = OdeIntegrator, M = LevenbergMarquardt> {
    settings: FitSettings,
    integrator: I,
    minimizer: M,
    interrupt: Interrupt,
}

impl MultiStartFitter {
    pub fn new(settings: FitSettings) -> Result<Self> {
        Self::with_parts(settings, OdeIntegrator::default(), LevenbergMarquardt::default())
    }
}

impl<I: Integrator, M: Minimizer> MultiStartFitter<I, M> {
    pub fn with_parts(settings: FitSettings, integrator: I, minimizer: M) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            settings,
            integrator,
            minimizer,
            interrupt: Interrupt::new(),
        })
    }

    /// Shares `interrupt` with the caller; triggering it aborts a running fit.
    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn interrupt(&self) -> &Interrupt {
        &self.interrupt
    }

    pub fn settings(&self) -> &FitSettings {
        &self.settings
    }

    /// Flattened `observations - integrate(field(params))`.
    fn residual(
        &self,
        dataset: &Dataset,
        field: &VectorField,
        initial_state: &[f64],
        params: &[f64],
    ) -> Result<DVector<f64>> {
        self.interrupt.check()?;
        let system = field.bind(params)?;
        let predicted = self
            .integrator
            .integrate(&system, initial_state, dataset.times())?;
        ensure_initial_row(&predicted, initial_state)?;
        if predicted.shape() != dataset.observations().shape() {
            return Err(AutodeError::shape(format!(
                "integrator returned {:?} for {:?} observations",
                predicted.shape(),
                dataset.observations().shape()
            )));
        }
        let diff = dataset.observations() - predicted;
        Ok(DVector::from_column_slice(diff.as_slice()))
    }

    pub fn fit(&self, dataset: &Dataset, field: &VectorField) -> Result<FitResult> {
        if dataset.dimension() != field.dimension() {
            return Err(AutodeError::shape(format!(
                "dataset has {} state columns but the field has dimension {}",
                dataset.dimension(),
                field.dimension()
            )));
        }
        let settings = &self.settings;
        let count = field.coefficient_count();
        let initial_state = dataset.initial_state();
        let mut rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut residual =
            |params: &[f64]| self.residual(dataset, field, &initial_state, params);

        let schedule = (0..settings.max_exponent)
            .flat_map(|e| (0..settings.attempts_per_exponent).map(move |a| (e, a)));
        let mut best = FitResult::unfitted(field.coefficient_names().to_vec());
        for (exponent, attempt) in schedule {
            if best.score < settings.threshold {
                break;
            }
            self.interrupt.check()?;

            let bounds = Bounds::symmetric(settings.bound_for(exponent));
            let initial: Vec<f64> = (0..count)
                .map(|_| rng.gen_range(bounds.lower..=bounds.upper))
                .collect();
            match self.minimizer.minimize(&mut residual, &initial, bounds) {
                Ok(minimum) => {
                    if best.absorb(&minimum) {
                        debug!(exponent, attempt, score = minimum.cost, "improved fit");
                    }
                }
                Err(err) if err.is_recoverable() => {
                    best.record_failure();
                    debug!(exponent, attempt, error = %err, "discarded attempt");
                }
                Err(err) => return Err(err),
            }

            if count == 0 {
                // Nothing to randomize; more attempts would repeat the same evaluation.
                break;
            }
        }

        info!(
            score = best.score,
            attempts = best.attempts,
            failed = best.failed_attempts,
            "fit finished"
        );
        Ok(best)
    }
}

impl<I: Integrator, M: Minimizer> Evaluator for MultiStartFitter<I, M> {
    fn evaluate(&self, dataset: &Dataset, field: &VectorField) -> Result<FitResult> {
        self.fit(dataset, field)
    }
}
