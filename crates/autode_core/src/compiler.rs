use crate::equation_engine::{parse, BinaryOp, Expr, Function};
use crate::error::{AutodeError, Result};
use crate::terms::{infer_role, Role, Variable};
use crate::traits::Scalar;
use std::collections::{BTreeSet, HashMap};

/// Expression tree with identifiers resolved to declared parameter positions.
#[derive(Debug, Clone)]
enum Node {
    Const(f64),
    Arg(usize),
    Binary(Box<Node>, BinaryOp, Box<Node>),
    PowI(Box<Node>, i32),
    Neg(Box<Node>),
    Call(Function, Box<Node>),
}

impl Node {
    fn lower(expr: &Expr, positions: &Positions) -> Node {
        match expr {
            Expr::Number(n) => Node::Const(*n),
            Expr::Variable(name) => Node::Arg(positions.of(name)),
            Expr::Binary(left, BinaryOp::Pow, right) => {
                let base = Box::new(Node::lower(left, positions));
                match right.as_ref() {
                    Expr::Number(n)
                        if n.fract() == 0.0 && n.abs() <= f64::from(i32::MAX) =>
                    {
                        Node::PowI(base, *n as i32)
                    }
                    _ => Node::Binary(base, BinaryOp::Pow, Box::new(Node::lower(right, positions))),
                }
            }
            Expr::Binary(left, op, right) => Node::Binary(
                Box::new(Node::lower(left, positions)),
                *op,
                Box::new(Node::lower(right, positions)),
            ),
            Expr::Neg(operand) => Node::Neg(Box::new(Node::lower(operand, positions))),
            Expr::Call(function, arg) => {
                Node::Call(*function, Box::new(Node::lower(arg, positions)))
            }
        }
    }

    fn eval<T: Scalar>(&self, arg: &impl Fn(usize) -> T) -> T {
        match self {
            Node::Const(c) => T::from_f64(*c).unwrap_or_else(T::nan),
            Node::Arg(i) => arg(*i),
            Node::Binary(left, op, right) => {
                let a = left.eval(arg);
                let b = right.eval(arg);
                match op {
                    BinaryOp::Add => a + b,
                    BinaryOp::Sub => a - b,
                    BinaryOp::Mul => a * b,
                    BinaryOp::Div => a / b,
                    BinaryOp::Pow => a.powf(b),
                }
            }
            Node::PowI(base, n) => base.eval(arg).powi(*n),
            Node::Neg(operand) => -operand.eval(arg),
            Node::Call(function, operand) => {
                let v = operand.eval(arg);
                match function {
                    Function::Sin => v.sin(),
                    Function::Cos => v.cos(),
                    Function::Exp => v.exp(),
                    Function::Log => v.ln(),
                }
            }
        }
    }
}

/// Where each role lives in the declared parameter list.
struct Positions {
    states: HashMap<usize, usize>,
    time: usize,
    coefficients: HashMap<String, usize>,
}

impl Positions {
    fn of(&self, name: &str) -> usize {
        // Every leaf was registered while declaring parameters.
        match infer_role(name) {
            Role::State(k) => self.states[&k],
            Role::Time => self.time,
            Role::Coefficient => self.coefficients[name],
        }
    }
}

/// A scalar function of its declared parameters.
#[derive(Debug, Clone)]
pub struct CompiledFunction {
    source: String,
    num_state_vars: usize,
    parameters: Vec<Variable>,
    body: Node,
}

/// Parses `expression_text` and infers which identifiers are states, time and coefficients.
///
/// Declared parameters are `x1..xN`, then `t` if referenced, then coefficients in
/// order of first appearance.
pub fn compile(expression_text: &str, num_state_vars: usize) -> Result<CompiledFunction> {
    let expr = parse(expression_text)?;

    let mut extra_states = BTreeSet::new();
    let mut uses_time = false;
    let mut coefficients: Vec<&str> = Vec::new();
    expr.for_each_variable(&mut |name| match infer_role(name) {
        Role::State(k) if k == 0 || k > num_state_vars => {
            extra_states.insert(k);
        }
        Role::State(_) => {}
        Role::Time => uses_time = true,
        Role::Coefficient => {
            if !coefficients.contains(&name) {
                coefficients.push(name);
            }
        }
    });

    let mut parameters: Vec<Variable> = (1..=num_state_vars)
        .chain(extra_states)
        .map(Variable::state)
        .collect();
    let states = parameters
        .iter()
        .enumerate()
        .filter_map(|(pos, var)| match var.role() {
            Role::State(k) => Some((k, pos)),
            _ => None,
        })
        .collect();
    let time = parameters.len();
    if uses_time {
        parameters.push(Variable::time());
    }
    let coefficient_positions = coefficients
        .iter()
        .enumerate()
        .map(|(i, name)| (name.to_string(), parameters.len() + i))
        .collect();
    parameters.extend(coefficients.iter().map(|name| Variable::new(*name)));

    let positions = Positions {
        states,
        time,
        coefficients: coefficient_positions,
    };
    let body = Node::lower(&expr, &positions);

    Ok(CompiledFunction {
        source: expression_text.to_string(),
        num_state_vars,
        parameters,
        body,
    })
}

impl CompiledFunction {
    pub fn source(&self) -> &str {
        &self.source
    }

    /// State arity the function was compiled for.
    pub fn num_state_vars(&self) -> usize {
        self.num_state_vars
    }

    /// Declared parameters in calling order.
    pub fn parameters(&self) -> &[Variable] {
        &self.parameters
    }

    pub fn arity(&self) -> usize {
        self.parameters.len()
    }

    pub fn uses_time(&self) -> bool {
        self.parameters.iter().any(|p| p.role() == Role::Time)
    }

    /// One-based state indices in declared order.
    pub fn state_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.parameters.iter().filter_map(|p| match p.role() {
            Role::State(k) => Some(k),
            _ => None,
        })
    }

    /// Free coefficient names in the order a coefficient vector must supply them.
    pub fn coefficients(&self) -> impl Iterator<Item = &str> {
        self.parameters
            .iter()
            .filter(|p| p.role() == Role::Coefficient)
            .map(Variable::name)
    }

    /// Calls the function with arguments in declared parameter order.
    pub fn evaluate<T: Scalar>(&self, args: &[T]) -> Result<T> {
        if args.len() != self.arity() {
            return Err(AutodeError::resolution(format!(
                "`{}` takes {} arguments but {} were given",
                self.source,
                self.arity(),
                args.len()
            )));
        }
        Ok(self.body.eval(&|i| args[i]))
    }

    /// Evaluates with each declared position resolved on demand.
    pub(crate) fn evaluate_with<T: Scalar>(&self, resolve: &impl Fn(usize) -> T) -> T {
        self.body.eval(resolve)
    }
}
