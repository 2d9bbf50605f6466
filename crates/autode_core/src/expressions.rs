use crate::compiler::compile;
use crate::error::{AutodeError, Result};
use crate::terms::{infer_role, Monomial, Role, TermEnumerator};
use crate::vector_field::VectorField;
use std::fmt;
use std::sync::Arc;

/// Coefficient prefixes handed out to dimensions in order. `t` and `x` are skipped
/// because `t0` reads like time and `x0`, `x1` collide with state names.
pub const COEFFICIENT_PREFIXES: [char; 22] = [
    'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r',
    's', 'u', 'v', 'w',
];

/// Checks that `prefix` followed by any index is an identifier the compiler reads
/// as a coefficient.
fn validate_prefix(prefix: &str) -> Result<()> {
    let mut chars = prefix.chars();
    let well_formed = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !well_formed {
        return Err(AutodeError::settings(format!(
            "coefficient prefix `{prefix}` is not an identifier"
        )));
    }
    // `x` or `x1` followed by digits is a state name for every index.
    if infer_role(&format!("{prefix}1")) != Role::Coefficient {
        return Err(AutodeError::settings(format!(
            "coefficient prefix `{prefix}` would produce state names"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Term {
    pub coefficient: String,
    pub monomial: Monomial,
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({} * {})", self.coefficient, self.monomial)
    }
}

/// A sum of coefficient-scaled monomials with no monomial repeated.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AdditiveExpression {
    terms: Vec<Term>,
}

impl AdditiveExpression {
    pub fn new(terms: Vec<Term>) -> Result<Self> {
        let expression = Self { terms };
        if expression.terms.is_empty() {
            return Err(AutodeError::parse("", "an expression needs at least one term"));
        }
        for (i, term) in expression.terms.iter().enumerate() {
            let earlier = &expression.terms[..i];
            if infer_role(&term.coefficient) != Role::Coefficient {
                return Err(AutodeError::parse(
                    &expression.to_string(),
                    format!("`{}` is a time or state name, not a coefficient", term.coefficient),
                ));
            }
            if earlier.iter().any(|e| e.monomial == term.monomial) {
                return Err(AutodeError::parse(
                    &expression.to_string(),
                    format!("monomial `{}` appears more than once", term.monomial),
                ));
            }
            if earlier.iter().any(|e| e.coefficient == term.coefficient) {
                return Err(AutodeError::parse(
                    &expression.to_string(),
                    format!("coefficient `{}` appears more than once", term.coefficient),
                ));
            }
        }
        Ok(expression)
    }

    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    pub fn coefficients(&self) -> impl Iterator<Item = &str> {
        self.terms.iter().map(|t| t.coefficient.as_str())
    }

    /// Direct algebraic evaluation; `coefficients[i]` scales the i-th term.
    pub fn evaluate(&self, state: &[f64], t: f64, coefficients: &[f64]) -> Result<f64> {
        if coefficients.len() != self.terms.len() {
            return Err(AutodeError::resolution(format!(
                "expression has {} terms but {} coefficients were given",
                self.terms.len(),
                coefficients.len()
            )));
        }
        let mut sum = 0.0;
        for (term, c) in self.terms.iter().zip(coefficients) {
            sum += c * term.monomial.evaluate(state, t)?;
        }
        Ok(sum)
    }
}

impl fmt::Display for AdditiveExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, term) in self.terms.iter().enumerate() {
            if i > 0 {
                f.write_str(" + ")?;
            }
            write!(f, "{term}")?;
        }
        Ok(())
    }
}

/// All additive expressions of `1..=max_summands` distinct monomials for one dimension.
#[derive(Debug, Clone)]
pub struct ExpressionSpace {
    monomials: Arc<[Monomial]>,
    max_summands: usize,
    prefix: String,
}

impl ExpressionSpace {
    pub fn new(
        monomials: impl IntoIterator<Item = Monomial>,
        max_summands: usize,
        prefix: impl Into<String>,
    ) -> Result<Self> {
        let prefix = prefix.into();
        validate_prefix(&prefix)?;
        Ok(Self {
            monomials: monomials.into_iter().collect(),
            max_summands,
            prefix,
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn monomials(&self) -> &[Monomial] {
        &self.monomials
    }

    pub fn iter(&self) -> ExpressionIter {
        // More summands than monomials can never be duplicate free.
        let max_summands = self.max_summands.min(self.monomials.len());
        ExpressionIter {
            monomials: Arc::clone(&self.monomials),
            max_summands,
            prefix: self.prefix.clone(),
            indices: Vec::new(),
            done: max_summands == 0,
        }
    }
}

impl IntoIterator for &ExpressionSpace {
    type Item = AdditiveExpression;
    type IntoIter = ExpressionIter;

    fn into_iter(self) -> ExpressionIter {
        self.iter()
    }
}

/// Enumerates the expressions of one output dimension.
pub fn expressions_for_one_dimension(
    monomials: impl IntoIterator<Item = Monomial>,
    max_summands: usize,
    coefficient_prefix: &str,
) -> Result<ExpressionIter> {
    Ok(ExpressionSpace::new(monomials, max_summands, coefficient_prefix)?.iter())
}

/// Odometer over ordered k-tuples of monomial indices, k growing from 1.
#[derive(Debug, Clone)]
pub struct ExpressionIter {
    monomials: Arc<[Monomial]>,
    max_summands: usize,
    prefix: String,
    indices: Vec<usize>,
    done: bool,
}

impl ExpressionIter {
    fn advance(&mut self) -> bool {
        if self.done {
            return false;
        }
        if self.indices.is_empty() {
            self.indices.push(0);
            return true;
        }
        let width = self.monomials.len();
        for pos in (0..self.indices.len()).rev() {
            self.indices[pos] += 1;
            if self.indices[pos] < width {
                return true;
            }
            self.indices[pos] = 0;
        }
        let next_len = self.indices.len() + 1;
        if next_len > self.max_summands {
            self.done = true;
            return false;
        }
        self.indices = vec![0; next_len];
        true
    }

    fn is_duplicate_free(&self) -> bool {
        self.indices.iter().enumerate().all(|(i, &a)| {
            self.indices[..i]
                .iter()
                .all(|&b| self.monomials[a] != self.monomials[b])
        })
    }

    fn current(&self) -> AdditiveExpression {
        let terms = self
            .indices
            .iter()
            .enumerate()
            .map(|(i, &idx)| Term {
                coefficient: format!("{}{}", self.prefix, i),
                monomial: self.monomials[idx].clone(),
            })
            .collect();
        AdditiveExpression { terms }
    }
}

impl Iterator for ExpressionIter {
    type Item = AdditiveExpression;

    fn next(&mut self) -> Option<AdditiveExpression> {
        while self.advance() {
            if self.is_duplicate_free() {
                return Some(self.current());
            }
        }
        None
    }
}

impl std::iter::FusedIterator for ExpressionIter {}

/// One hypothesis for the whole vector field: an expression per state dimension.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CandidateModel {
    equations: Vec<AdditiveExpression>,
}

impl CandidateModel {
    pub fn new(equations: Vec<AdditiveExpression>) -> Result<Self> {
        let model = Self { equations };
        let mut seen = std::collections::HashSet::new();
        for name in model.coefficient_names() {
            if !seen.insert(name) {
                return Err(AutodeError::resolution(format!(
                    "coefficient `{name}` is used by more than one term of the model"
                )));
            }
        }
        Ok(model)
    }

    pub fn dimension(&self) -> usize {
        self.equations.len()
    }

    pub fn equations(&self) -> &[AdditiveExpression] {
        &self.equations
    }

    /// Coefficient names in equation order, then term order.
    pub fn coefficient_names(&self) -> impl Iterator<Item = &str> {
        self.equations.iter().flat_map(AdditiveExpression::coefficients)
    }

    /// Per-equation source text, ready for [`compile`].
    pub fn render(&self) -> Vec<String> {
        self.equations.iter().map(ToString::to_string).collect()
    }

    /// Compiles every equation and assembles them into one vector field.
    pub fn compile(&self) -> Result<VectorField> {
        let dim = self.dimension();
        let functions = self
            .render()
            .iter()
            .map(|text| compile(text, dim))
            .collect::<Result<Vec<_>>>()?;
        VectorField::assemble(functions)
    }

    /// Direct algebraic evaluation of the right-hand side.
    pub fn evaluate(&self, state: &[f64], t: f64, coefficients: &[f64]) -> Result<Vec<f64>> {
        let total: usize = self.equations.iter().map(|e| e.terms().len()).sum();
        if coefficients.len() != total {
            return Err(AutodeError::resolution(format!(
                "model has {total} coefficients but {} were given",
                coefficients.len()
            )));
        }
        let mut offset = 0;
        let mut out = Vec::with_capacity(self.equations.len());
        for equation in &self.equations {
            let count = equation.terms().len();
            out.push(equation.evaluate(state, t, &coefficients[offset..offset + count])?);
            offset += count;
        }
        Ok(out)
    }
}

/// Cartesian product of one expression space per state dimension.
#[derive(Debug, Clone)]
pub struct ModelSpace {
    dimensions: Vec<ExpressionSpace>,
}

impl ModelSpace {
    pub fn new(num_state_vars: usize, max_factors: usize, max_summands: usize) -> Result<Self> {
        if num_state_vars > COEFFICIENT_PREFIXES.len() {
            return Err(AutodeError::settings(format!(
                "at most {} state dimensions have coefficient prefixes, got {num_state_vars}",
                COEFFICIENT_PREFIXES.len()
            )));
        }
        let terms = TermEnumerator::new(num_state_vars, max_factors);
        let monomials: Arc<[Monomial]> = terms.iter().collect();
        let dimensions = COEFFICIENT_PREFIXES
            .iter()
            .take(num_state_vars)
            .map(|prefix| ExpressionSpace {
                monomials: Arc::clone(&monomials),
                max_summands,
                prefix: prefix.to_string(),
            })
            .collect();
        Ok(Self { dimensions })
    }

    pub fn from_dimensions(dimensions: Vec<ExpressionSpace>) -> Self {
        Self { dimensions }
    }

    pub fn dimensions(&self) -> &[ExpressionSpace] {
        &self.dimensions
    }

    pub fn iter(&self) -> ModelIter {
        ModelIter {
            spaces: self.dimensions.clone(),
            cursors: Vec::new(),
            current: Vec::new(),
            started: false,
            done: self.dimensions.is_empty(),
        }
    }
}

impl IntoIterator for &ModelSpace {
    type Item = CandidateModel;
    type IntoIter = ModelIter;

    fn into_iter(self) -> ModelIter {
        self.iter()
    }
}

/// Lazily enumerates every candidate model for an `num_state_vars`-dimensional system.
pub fn full_model_space(
    num_state_vars: usize,
    max_factors: usize,
    max_summands: usize,
) -> Result<ModelIter> {
    Ok(ModelSpace::new(num_state_vars, max_factors, max_summands)?.iter())
}

/// Odometer over per-dimension cursors; the last dimension varies fastest and a
/// dimension's cursor is restarted from its space when it runs out.
#[derive(Debug, Clone)]
pub struct ModelIter {
    spaces: Vec<ExpressionSpace>,
    cursors: Vec<ExpressionIter>,
    current: Vec<AdditiveExpression>,
    started: bool,
    done: bool,
}

impl ModelIter {
    fn start(&mut self) -> Option<()> {
        for space in &self.spaces {
            let mut cursor = space.iter();
            let first = cursor.next()?;
            self.cursors.push(cursor);
            self.current.push(first);
        }
        Some(())
    }

    fn emit(&self) -> CandidateModel {
        CandidateModel {
            equations: self.current.clone(),
        }
    }
}

impl Iterator for ModelIter {
    type Item = CandidateModel;

    fn next(&mut self) -> Option<CandidateModel> {
        if self.done {
            return None;
        }
        if !self.started {
            self.started = true;
            if self.start().is_none() {
                self.done = true;
                return None;
            }
            return Some(self.emit());
        }
        for dim in (0..self.spaces.len()).rev() {
            if let Some(expr) = self.cursors[dim].next() {
                self.current[dim] = expr;
                return Some(self.emit());
            }
            let mut cursor = self.spaces[dim].iter();
            match cursor.next() {
                Some(first) => self.current[dim] = first,
                None => break,
            }
            self.cursors[dim] = cursor;
        }
        self.done = true;
        None
    }
}

impl std::iter::FusedIterator for ModelIter {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terms::{enumerate, Variable};
    use std::collections::HashSet;

    fn monomial(names: &[&str]) -> Monomial {
        Monomial::new(names.iter().map(|n| Variable::new(*n))).expect("valid monomial")
    }

    #[test]
    fn single_dimension_renders_indexed_coefficients() {
        let monomials = vec![monomial(&["x1"]), monomial(&["x2", "x2"])];
        let rendered: Vec<String> = expressions_for_one_dimension(monomials, 2, "a")
            .expect("valid prefix")
            .map(|e| e.to_string())
            .collect();
        assert_eq!(
            rendered,
            vec![
                "(a0 * x1)",
                "(a0 * (x2**2))",
                "(a0 * x1) + (a1 * (x2**2))",
                "(a0 * (x2**2)) + (a1 * x1)",
            ]
        );
    }

    #[test]
    fn expressions_never_repeat_a_monomial() {
        let space = ExpressionSpace::new(enumerate(2, 2), 3, "b").expect("valid prefix");
        let mut count = 0;
        for expr in &space {
            let set: HashSet<&Monomial> = expr.terms().iter().map(|t| &t.monomial).collect();
            assert_eq!(set.len(), expr.terms().len(), "duplicate in {expr}");
            count += 1;
        }
        // 9 monomials: 9 + 9*8 + 9*8*7 ordered tuples without repeats
        assert_eq!(count, 9 + 72 + 504);
    }

    #[test]
    fn duplicate_monomials_in_the_input_are_still_rejected() {
        let monomials = vec![monomial(&["x1"]), monomial(&["x1"])];
        let rendered: Vec<String> = expressions_for_one_dimension(monomials, 2, "a")
            .expect("valid prefix")
            .map(|e| e.to_string())
            .collect();
        assert_eq!(rendered, vec!["(a0 * x1)", "(a0 * x1)"]);
    }

    #[test]
    fn empty_inputs_yield_nothing() {
        let count = |monomials: Vec<Monomial>, max_summands| {
            expressions_for_one_dimension(monomials, max_summands, "a")
                .expect("valid prefix")
                .count()
        };
        assert_eq!(count(Vec::new(), 3), 0);
        assert_eq!(count(enumerate(1, 1).collect(), 0), 0);
        assert_eq!(full_model_space(0, 2, 2).expect("valid").count(), 0);
    }

    #[test]
    fn prefixes_that_collide_with_reserved_names_are_rejected() {
        for prefix in ["x", "x1", "x12", "", "1a", "a b"] {
            assert!(
                matches!(
                    expressions_for_one_dimension(enumerate(1, 1), 2, prefix),
                    Err(AutodeError::InvalidSettings { .. })
                ),
                "prefix {prefix:?}"
            );
        }
        for prefix in ["a", "xa", "coef_", "t"] {
            assert!(ExpressionSpace::new(enumerate(1, 1), 2, prefix).is_ok(), "prefix {prefix:?}");
        }
    }

    #[test]
    fn additive_expression_rejects_reserved_coefficient_names() {
        let err = AdditiveExpression::new(vec![Term {
            coefficient: "x1".into(),
            monomial: monomial(&["x1"]),
        }])
        .unwrap_err();
        assert!(err.to_string().contains("not a coefficient"));
    }

    #[test]
    fn additive_expression_rejects_duplicates() {
        let err = AdditiveExpression::new(vec![
            Term {
                coefficient: "a0".into(),
                monomial: monomial(&["x1"]),
            },
            Term {
                coefficient: "a1".into(),
                monomial: monomial(&["x1"]),
            },
        ])
        .unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn model_space_is_the_product_of_dimensions() {
        // 3 monomials (t, x1, x2), one summand each: 3 * 3 models
        let models: Vec<CandidateModel> = full_model_space(2, 1, 1).expect("valid").collect();
        assert_eq!(models.len(), 9);
        assert_eq!(models[0].render(), vec!["(a0 * t)", "(b0 * t)"]);
        assert_eq!(models[1].render(), vec!["(a0 * t)", "(b0 * x1)"]);
        assert_eq!(models[8].render(), vec!["(a0 * x2)", "(b0 * x2)"]);
        let unique: HashSet<&CandidateModel> = models.iter().collect();
        assert_eq!(unique.len(), 9);
    }

    #[test]
    fn model_coefficients_are_globally_unique() {
        for model in full_model_space(3, 1, 2).expect("valid").step_by(97).take(50) {
            let names: Vec<&str> = model.coefficient_names().collect();
            let unique: HashSet<&&str> = names.iter().collect();
            assert_eq!(unique.len(), names.len());
        }
    }

    #[test]
    fn model_space_stays_lazy() {
        // Far too many models to materialize; pulling a few must be instant.
        let mut models = full_model_space(4, 3, 4).expect("valid");
        let first = models.next().expect("non-empty");
        assert_eq!(first.dimension(), 4);
        assert_eq!(models.take(5).count(), 5);
    }

    #[test]
    fn too_many_dimensions_is_rejected() {
        let err = full_model_space(COEFFICIENT_PREFIXES.len() + 1, 1, 1).unwrap_err();
        assert!(matches!(err, AutodeError::InvalidSettings { .. }));
    }

    #[test]
    fn compiled_candidate_matches_direct_evaluation() {
        let state = [1.5, -0.75];
        let t = 0.3;
        for model in full_model_space(2, 2, 2).expect("valid").step_by(131).take(40) {
            let field = model.compile().expect("rendered models compile");
            let coefficients: Vec<f64> = (0..field.coefficient_count())
                .map(|i| 0.5 - 0.25 * i as f64)
                .collect();
            let compiled = field.evaluate(&state, t, &coefficients).expect("evaluates");
            let direct = model.evaluate(&state, t, &coefficients).expect("evaluates");
            for (a, b) in compiled.iter().zip(&direct) {
                assert!((a - b).abs() < 1e-12, "{:?}: {a} vs {b}", model.render());
            }
        }
    }
}
