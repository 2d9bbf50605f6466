use crate::traits::{DynamicalSystem, Scalar, Steppable};

/// Butcher tableau of an explicit Runge-Kutta method.
/// `a[i]` holds the coefficients of stage `i + 1` on stages `0..=i`.
#[derive(Debug)]
pub struct Tableau {
    pub c: &'static [f64],
    pub a: &'static [&'static [f64]],
    pub b: &'static [f64],
}

/// Classic Runge-Kutta 4th order.
pub const RK4_TABLEAU: Tableau = Tableau {
    c: &[0.0, 0.5, 0.5, 1.0],
    a: &[&[0.5], &[0.0, 0.5], &[0.0, 0.0, 1.0]],
    b: &[1.0 / 6.0, 1.0 / 3.0, 1.0 / 3.0, 1.0 / 6.0],
};

/// Tsitouras 5/4, fixed step using the 5th order weights.
pub const TSIT5_TABLEAU: Tableau = Tableau {
    c: &[0.0, 0.161, 0.327, 0.9, 0.9800255409045097, 1.0],
    a: &[
        &[0.161],
        &[-0.008480655492356989, 0.335480655492357],
        &[2.898, -6.359447987781783, 4.361447987781783],
        &[
            5.325864858437957,
            -11.748883564062828,
            7.495539342889693,
            -0.09249506636030195,
        ],
        &[
            5.86145544294642,
            -12.92096931784711,
            8.159367898576159,
            -0.071584973281401,
            -0.02826857949054663,
        ],
    ],
    b: &[
        0.09646076681806523,
        0.01,
        0.4798896504144996,
        1.379008574103742,
        -3.290069515436099,
        2.324710524099774,
    ],
};

/// Fixed-step explicit Runge-Kutta stepper with preallocated stage buffers.
pub struct RungeKutta<T: Scalar> {
    tableau: &'static Tableau,
    k: Vec<Vec<T>>,
    tmp: Vec<T>,
}

impl<T: Scalar> RungeKutta<T> {
    pub fn new(tableau: &'static Tableau, dim: usize) -> Self {
        let z = T::zero();
        Self {
            tableau,
            k: vec![vec![z; dim]; tableau.b.len()],
            tmp: vec![z; dim],
        }
    }

    pub fn rk4(dim: usize) -> Self {
        Self::new(&RK4_TABLEAU, dim)
    }

    pub fn tsit5(dim: usize) -> Self {
        Self::new(&TSIT5_TABLEAU, dim)
    }
}

fn constant<T: Scalar>(value: f64) -> T {
    T::from_f64(value).unwrap_or_else(T::nan)
}

impl<T: Scalar> Steppable<T> for RungeKutta<T> {
    fn step(&mut self, system: &impl DynamicalSystem<T>, t: &mut T, state: &mut [T], dt: T) {
        let t0 = *t;
        let tableau = self.tableau;

        system.apply(t0, state, &mut self.k[0]);
        for stage in 1..tableau.b.len() {
            let row = tableau.a[stage - 1];
            for i in 0..state.len() {
                let mut incr = T::zero();
                for (j, &a) in row.iter().enumerate() {
                    incr = incr + constant::<T>(a) * self.k[j][i];
                }
                self.tmp[i] = state[i] + dt * incr;
            }
            let ts = t0 + constant::<T>(tableau.c[stage]) * dt;
            system.apply(ts, &self.tmp, &mut self.k[stage]);
        }

        for i in 0..state.len() {
            let mut incr = T::zero();
            for (j, &b) in tableau.b.iter().enumerate() {
                incr = incr + constant::<T>(b) * self.k[j][i];
            }
            state[i] = state[i] + dt * incr;
        }

        *t = t0 + dt;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Decay {
        rate: f64,
    }

    impl DynamicalSystem<f64> for Decay {
        fn dimension(&self) -> usize {
            1
        }

        fn apply(&self, _t: f64, x: &[f64], out: &mut [f64]) {
            out[0] = self.rate * x[0];
        }
    }

    struct Ramp;

    impl DynamicalSystem<f64> for Ramp {
        fn dimension(&self) -> usize {
            1
        }

        fn apply(&self, t: f64, _x: &[f64], out: &mut [f64]) {
            out[0] = 3.0 * t * t;
        }
    }

    fn run(mut stepper: RungeKutta<f64>, system: &impl DynamicalSystem<f64>, x0: f64) -> f64 {
        let mut t = 0.0;
        let mut state = [x0];
        for _ in 0..100 {
            stepper.step(system, &mut t, &mut state, 0.01);
        }
        assert!((t - 1.0).abs() < 1e-12);
        state[0]
    }

    #[test]
    fn weights_are_consistent() {
        for tableau in [&RK4_TABLEAU, &TSIT5_TABLEAU] {
            assert!((tableau.b.iter().sum::<f64>() - 1.0).abs() < 1e-12);
            assert_eq!(tableau.a.len() + 1, tableau.b.len());
            for (row, &c) in tableau.a.iter().zip(&tableau.c[1..]) {
                // Tsit5's published coefficients satisfy this only to ~1e-7.
                assert!((row.iter().sum::<f64>() - c).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn both_methods_track_exponential_decay() {
        let expected = (-1.0f64).exp();
        let rk4 = run(RungeKutta::rk4(1), &Decay { rate: -1.0 }, 1.0);
        let tsit5 = run(RungeKutta::tsit5(1), &Decay { rate: -1.0 }, 1.0);
        assert!((rk4 - expected).abs() < 1e-8);
        assert!((tsit5 - expected).abs() < 1e-8);
    }

    #[test]
    fn time_dependent_fields_see_stage_times() {
        // x' = 3t^2 is integrated exactly by a 4th order method.
        let x = run(RungeKutta::rk4(1), &Ramp, 0.0);
        assert!((x - 1.0).abs() < 1e-12);
    }
}
