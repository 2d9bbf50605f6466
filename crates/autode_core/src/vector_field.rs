use crate::compiler::CompiledFunction;
use crate::error::{AutodeError, Result};
use crate::terms::Role;
use crate::traits::{DynamicalSystem, Scalar};
use std::collections::HashMap;

/// Source of one declared parameter of one equation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Binding {
    /// Zero-based slot in the state vector.
    State(usize),
    Time,
    /// Slot in the global coefficient vector.
    Coefficient(usize),
}

/// N compiled equations sharing one flat coefficient vector.
///
/// Calling convention: `(state, time, coefficients) -> derivative`, with the
/// coefficients laid out as [`VectorField::coefficient_names`]. Every parameter of
/// every equation is resolved to a slot when the field is assembled, so calls do no
/// name lookups.
#[derive(Debug, Clone)]
pub struct VectorField {
    equations: Vec<CompiledFunction>,
    bindings: Vec<Vec<Binding>>,
    coefficient_names: Vec<String>,
}

impl VectorField {
    /// Assembles equations whose coefficients are laid out in discovery order:
    /// equation by equation, each in its declared order. A name used by several
    /// equations occupies a single shared slot.
    pub fn assemble(functions: Vec<CompiledFunction>) -> Result<Self> {
        let mut names: Vec<String> = Vec::new();
        for function in &functions {
            for name in function.coefficients() {
                if !names.iter().any(|n| n == name) {
                    names.push(name.to_string());
                }
            }
        }
        Self::build(functions, names)
    }

    /// Assembles equations against an explicit coefficient layout.
    ///
    /// Every coefficient an equation references must be listed, and every listed
    /// name must be referenced by some equation. An unused slot would be a direction
    /// the residual can never see, leaving the least-squares problem rank deficient.
    pub fn assemble_with_coefficients<S: AsRef<str>>(
        functions: Vec<CompiledFunction>,
        coefficient_names: &[S],
    ) -> Result<Self> {
        let names: Vec<String> = coefficient_names
            .iter()
            .map(|n| n.as_ref().to_string())
            .collect();
        let field = Self::build(functions, names)?;
        let mut used = vec![false; field.coefficient_names.len()];
        for binding in field.bindings.iter().flatten() {
            if let Binding::Coefficient(slot) = binding {
                used[*slot] = true;
            }
        }
        if let Some(slot) = used.iter().position(|u| !u) {
            return Err(AutodeError::resolution(format!(
                "coefficient `{}` is not used by any equation",
                field.coefficient_names[slot]
            )));
        }
        Ok(field)
    }

    fn build(functions: Vec<CompiledFunction>, coefficient_names: Vec<String>) -> Result<Self> {
        let dim = functions.len();
        if dim == 0 {
            return Err(AutodeError::shape("a vector field needs at least one equation"));
        }

        let mut slots = HashMap::with_capacity(coefficient_names.len());
        for (slot, name) in coefficient_names.iter().enumerate() {
            if slots.insert(name.as_str(), slot).is_some() {
                return Err(AutodeError::resolution(format!(
                    "coefficient `{name}` is listed more than once"
                )));
            }
        }

        let mut bindings = Vec::with_capacity(dim);
        for (i, function) in functions.iter().enumerate() {
            let mut equation = Vec::with_capacity(function.arity());
            for param in function.parameters() {
                let binding = match param.role() {
                    Role::State(k) if k >= 1 && k <= dim => Binding::State(k - 1),
                    Role::State(_) => {
                        return Err(AutodeError::resolution(format!(
                            "`{}` in equation {} (`{}`) is outside the state x1..x{dim}",
                            param.name(),
                            i + 1,
                            function.source()
                        )))
                    }
                    Role::Time => Binding::Time,
                    Role::Coefficient => match slots.get(param.name()) {
                        Some(&slot) => Binding::Coefficient(slot),
                        None => {
                            return Err(AutodeError::resolution(format!(
                                "coefficient `{}` in equation {} (`{}`) has no slot",
                                param.name(),
                                i + 1,
                                function.source()
                            )))
                        }
                    },
                };
                equation.push(binding);
            }
            bindings.push(equation);
        }

        Ok(Self {
            equations: functions,
            bindings,
            coefficient_names,
        })
    }

    pub fn dimension(&self) -> usize {
        self.equations.len()
    }

    pub fn equations(&self) -> &[CompiledFunction] {
        &self.equations
    }

    pub fn coefficient_names(&self) -> &[String] {
        &self.coefficient_names
    }

    pub fn coefficient_count(&self) -> usize {
        self.coefficient_names.len()
    }

    /// Writes dx/dt into `out`. Slice lengths are the caller's responsibility;
    /// use [`VectorField::evaluate`] for a checked call.
    pub fn apply<T: Scalar>(&self, t: T, state: &[T], coefficients: &[T], out: &mut [T]) {
        debug_assert_eq!(state.len(), self.dimension());
        debug_assert_eq!(coefficients.len(), self.coefficient_count());
        for ((equation, binding), slot) in self.equations.iter().zip(&self.bindings).zip(out) {
            *slot = equation.evaluate_with(&|pos| match binding[pos] {
                Binding::State(j) => state[j],
                Binding::Time => t,
                Binding::Coefficient(j) => coefficients[j],
            });
        }
    }

    pub fn evaluate(&self, state: &[f64], t: f64, coefficients: &[f64]) -> Result<Vec<f64>> {
        if state.len() != self.dimension() {
            return Err(AutodeError::shape(format!(
                "state has {} components but the field has dimension {}",
                state.len(),
                self.dimension()
            )));
        }
        self.check_coefficients(coefficients.len())?;
        let mut out = vec![0.0; self.dimension()];
        self.apply(t, state, coefficients, &mut out);
        Ok(out)
    }

    /// Fixes the coefficients, producing a system an integrator can step.
    pub fn bind<'a, T: Scalar>(&'a self, coefficients: &'a [T]) -> Result<BoundVectorField<'a, T>> {
        self.check_coefficients(coefficients.len())?;
        Ok(BoundVectorField {
            field: self,
            coefficients,
        })
    }

    fn check_coefficients(&self, given: usize) -> Result<()> {
        if given != self.coefficient_count() {
            return Err(AutodeError::resolution(format!(
                "field has {} coefficients but {given} were given",
                self.coefficient_count()
            )));
        }
        Ok(())
    }
}

/// A [`VectorField`] with its coefficient vector fixed.
#[derive(Debug, Clone, Copy)]
pub struct BoundVectorField<'a, T> {
    field: &'a VectorField,
    coefficients: &'a [T],
}

impl<T: Scalar> DynamicalSystem<T> for BoundVectorField<'_, T> {
    fn dimension(&self) -> usize {
        self.field.dimension()
    }

    fn apply(&self, t: T, x: &[T], out: &mut [T]) {
        self.field.apply(t, x, self.coefficients, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;

    fn field(equations: &[&str]) -> Result<VectorField> {
        let functions = equations
            .iter()
            .map(|e| compile(e, equations.len()))
            .collect::<Result<Vec<_>>>()?;
        VectorField::assemble(functions)
    }

    fn assert_err_contains<T: std::fmt::Debug>(result: Result<T>, needle: &str) {
        let err = result.expect_err("expected error");
        let message = format!("{err}");
        assert!(
            message.contains(needle),
            "expected error to contain \"{needle}\", got \"{message}\""
        );
    }

    #[test]
    fn concatenates_coefficients_across_equations() {
        let f = field(&["(a0 * x1) + (a1 * x2)", "(b0 * x1) + (b1 * t)"]).expect("assembles");
        assert_eq!(f.coefficient_names(), &["a0", "a1", "b0", "b1"]);
        let out = f.evaluate(&[2.0, 3.0], 10.0, &[1.0, -1.0, 0.5, 0.1]).expect("evaluates");
        assert!((out[0] - (2.0 - 3.0)).abs() < 1e-12);
        assert!((out[1] - (1.0 + 1.0)).abs() < 1e-12);
    }

    #[test]
    fn shared_names_share_one_slot() {
        let f = field(&["k * x2", "-k * x1"]).expect("assembles");
        assert_eq!(f.coefficient_count(), 1);
        let out = f.evaluate(&[1.0, 2.0], 0.0, &[3.0]).expect("evaluates");
        assert_eq!(out, vec![6.0, -3.0]);
    }

    #[test]
    fn out_of_range_state_fails_at_assembly() {
        let functions = vec![
            compile("a0 * x1", 2).expect("compiles"),
            compile("b0 * x3", 2).expect("compiles"),
        ];
        assert_err_contains(VectorField::assemble(functions), "`x3` in equation 2");
        assert_err_contains(field(&["a0 * x0"]), "outside the state");
    }

    #[test]
    fn explicit_layout_is_checked_both_ways() {
        let functions = || {
            vec![
                compile("a0 * x1 + a1", 2).expect("compiles"),
                compile("b0 * x2", 2).expect("compiles"),
            ]
        };
        let f = VectorField::assemble_with_coefficients(functions(), &["b0", "a1", "a0"])
            .expect("assembles");
        let out = f.evaluate(&[1.0, 1.0], 0.0, &[5.0, 2.0, 3.0]).expect("evaluates");
        assert_eq!(out, vec![5.0, 5.0]);

        assert_err_contains(
            VectorField::assemble_with_coefficients(functions(), &["a0", "a1"]),
            "`b0` in equation 2",
        );
        assert_err_contains(
            VectorField::assemble_with_coefficients(functions(), &["a0", "a1", "b0", "c9"]),
            "`c9` is not used",
        );
        assert_err_contains(
            VectorField::assemble_with_coefficients(functions(), &["a0", "a0", "a1", "b0"]),
            "listed more than once",
        );
    }

    #[test]
    fn checked_calls_validate_lengths() {
        let f = field(&["a0 * x1"]).expect("assembles");
        assert!(matches!(
            f.evaluate(&[1.0, 2.0], 0.0, &[1.0]),
            Err(AutodeError::Shape { .. })
        ));
        assert!(matches!(
            f.evaluate(&[1.0], 0.0, &[]),
            Err(AutodeError::Resolution { .. })
        ));
        assert!(f.bind(&[1.0, 2.0]).is_err());
        assert_err_contains(VectorField::assemble(Vec::new()), "at least one equation");
    }

    #[test]
    fn bound_field_is_a_dynamical_system() {
        let f = field(&["a0 * x2", "b0 * x1 * t"]).expect("assembles");
        let coefficients = [2.0, -1.0];
        let system = f.bind(&coefficients).expect("binds");
        let mut out = [0.0; 2];
        system.apply(3.0, &[1.0, 4.0], &mut out);
        assert_eq!(system.dimension(), 2);
        assert_eq!(out, [8.0, -3.0]);
    }

    #[test]
    fn fields_can_be_shared_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<VectorField>();
    }
}
