use crate::error::{AutodeError, Result};
use std::fmt;
use std::sync::Arc;

/// Reserved name of the time variable.
pub const TIME_NAME: &str = "t";

/// Prefix of the reserved state variable names `x1..xN`.
pub const STATE_PREFIX: char = 'x';

/// How an identifier participates in a compiled expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    /// The time scalar.
    Time,
    /// One-based index into the state vector.
    State(usize),
    /// A free coefficient to be fitted.
    Coefficient,
}

/// Infers the role of an identifier from its shape alone.
pub fn infer_role(name: &str) -> Role {
    if name == TIME_NAME {
        return Role::Time;
    }
    match name.strip_prefix(STATE_PREFIX) {
        Some(digits) if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) => {
            // `x01` would alias `x1` under a different name; only the plain spelling is a state.
            match digits.parse::<usize>() {
                Ok(k) if digits == k.to_string() => Role::State(k),
                _ => Role::Coefficient,
            }
        }
        _ => Role::Coefficient,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Variable {
    name: String,
    role: Role,
}

impl Variable {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let role = infer_role(&name);
        Self { name, role }
    }

    pub fn time() -> Self {
        Self::new(TIME_NAME)
    }

    pub fn state(index: usize) -> Self {
        Self::new(format!("{STATE_PREFIX}{index}"))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> Role {
        self.role
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// A product of time/state powers in canonical form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Monomial {
    factors: Vec<(Variable, u32)>,
}

impl Monomial {
    /// Canonicalizes an arbitrary ordering of factors.
    pub fn new(factors: impl IntoIterator<Item = Variable>) -> Result<Self> {
        let mut factors: Vec<Variable> = factors.into_iter().collect();
        if factors.is_empty() {
            return Err(AutodeError::parse("", "a monomial needs at least one factor"));
        }
        if let Some(coefficient) = factors.iter().find(|v| v.role == Role::Coefficient) {
            let rendered: Vec<&str> = factors.iter().map(Variable::name).collect();
            return Err(AutodeError::parse(
                &rendered.join(" * "),
                format!("coefficient `{}` cannot appear inside a monomial", coefficient.name),
            ));
        }
        factors.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(Self::fold_sorted(factors))
    }

    fn fold_sorted(sorted: impl IntoIterator<Item = Variable>) -> Self {
        let mut factors: Vec<(Variable, u32)> = Vec::new();
        for var in sorted {
            match factors.last_mut() {
                Some((last, power)) if *last == var => *power += 1,
                _ => factors.push((var, 1)),
            }
        }
        Self { factors }
    }

    /// Factors with their folded powers, sorted by name.
    pub fn factors(&self) -> &[(Variable, u32)] {
        &self.factors
    }

    pub fn degree(&self) -> u32 {
        self.factors.iter().map(|(_, p)| p).sum()
    }

    /// Expands the folded powers back into a flat factor list.
    pub fn expanded(&self) -> Vec<Variable> {
        self.factors
            .iter()
            .flat_map(|(var, power)| std::iter::repeat(var.clone()).take(*power as usize))
            .collect()
    }

    /// Direct evaluation at a state vector (`x1` is `state[0]`) and time.
    pub fn evaluate(&self, state: &[f64], t: f64) -> Result<f64> {
        let mut value = 1.0;
        for (var, power) in &self.factors {
            let base = match var.role {
                Role::Time => t,
                Role::State(k) if k >= 1 && k <= state.len() => state[k - 1],
                _ => {
                    return Err(AutodeError::resolution(format!(
                        "`{}` is not a component of a {}-dimensional state",
                        var.name,
                        state.len()
                    )))
                }
            };
            value *= base.powi(*power as i32);
        }
        Ok(value)
    }
}

impl fmt::Display for Monomial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (var, power)) in self.factors.iter().enumerate() {
            if i > 0 {
                f.write_str(" * ")?;
            }
            if *power >= 2 {
                write!(f, "({var}**{power})")?;
            } else {
                write!(f, "{var}")?;
            }
        }
        Ok(())
    }
}

/// Restartable source of every canonical monomial with `1..=max_factors` factors.
#[derive(Debug, Clone)]
pub struct TermEnumerator {
    alphabet: Arc<[Variable]>,
    max_factors: usize,
}

impl TermEnumerator {
    pub fn new(num_state_vars: usize, max_factors: usize) -> Self {
        let mut alphabet: Vec<Variable> = std::iter::once(Variable::time())
            .chain((1..=num_state_vars).map(Variable::state))
            .collect();
        alphabet.sort_by(|a, b| a.name.cmp(&b.name));
        Self {
            alphabet: alphabet.into(),
            max_factors,
        }
    }

    /// The factor alphabet in canonical (name) order. Always contains `t`.
    pub fn alphabet(&self) -> &[Variable] {
        &self.alphabet
    }

    pub fn max_factors(&self) -> usize {
        self.max_factors
    }

    /// Starts a fresh, independent cursor.
    pub fn iter(&self) -> MonomialIter {
        MonomialIter {
            alphabet: Arc::clone(&self.alphabet),
            max_factors: self.max_factors,
            cursor: Vec::with_capacity(self.max_factors),
            started: false,
        }
    }
}

impl IntoIterator for &TermEnumerator {
    type Item = Monomial;
    type IntoIter = MonomialIter;

    fn into_iter(self) -> MonomialIter {
        self.iter()
    }
}

/// Enumerates canonical monomials over `{t, x1..x<num_state_vars>}`.
pub fn enumerate(num_state_vars: usize, max_factors: usize) -> MonomialIter {
    TermEnumerator::new(num_state_vars, max_factors).iter()
}

/// Depth-first cursor over non-decreasing alphabet index lists.
///
/// `cursor` holds the factor list of the last yielded monomial. Its successor in
/// pre-order is either the list extended by its own last factor, or, at full depth,
/// the deepest position that can still be incremented.
#[derive(Debug, Clone)]
pub struct MonomialIter {
    alphabet: Arc<[Variable]>,
    max_factors: usize,
    cursor: Vec<usize>,
    started: bool,
}

impl MonomialIter {
    fn current(&self) -> Monomial {
        Monomial::fold_sorted(self.cursor.iter().map(|&i| self.alphabet[i].clone()))
    }
}

impl Iterator for MonomialIter {
    type Item = Monomial;

    fn next(&mut self) -> Option<Monomial> {
        if !self.started {
            self.started = true;
            if self.max_factors == 0 || self.alphabet.is_empty() {
                return None;
            }
            self.cursor.push(0);
        } else if self.cursor.len() < self.max_factors {
            let last = *self.cursor.last()?;
            self.cursor.push(last);
        } else {
            loop {
                let last = self.cursor.pop()?;
                if last + 1 < self.alphabet.len() {
                    self.cursor.push(last + 1);
                    break;
                }
            }
        }
        Some(self.current())
    }
}

impl std::iter::FusedIterator for MonomialIter {}
