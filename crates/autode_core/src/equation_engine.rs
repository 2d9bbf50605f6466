use crate::error::{AutodeError, Result};
use std::fmt;

// --- AST ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Pow => "**",
        };
        f.write_str(symbol)
    }
}

/// Functions a call node may name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Sin,
    Cos,
    Exp,
    Log,
}

impl Function {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "sin" => Some(Function::Sin),
            "cos" => Some(Function::Cos),
            "exp" => Some(Function::Exp),
            "log" | "ln" => Some(Function::Log),
            _ => None,
        }
    }
}

/// Abstract Syntax Tree nodes for expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Variable(String),
    Binary(Box<Expr>, BinaryOp, Box<Expr>),
    Neg(Box<Expr>),
    Call(Function, Box<Expr>),
}

impl Expr {
    /// Visits every variable leaf left to right.
    pub fn for_each_variable<'a>(&'a self, visit: &mut impl FnMut(&'a str)) {
        match self {
            Expr::Number(_) => {}
            Expr::Variable(name) => visit(name),
            Expr::Binary(left, _, right) => {
                left.for_each_variable(visit);
                right.for_each_variable(visit);
            }
            Expr::Neg(operand) | Expr::Call(_, operand) => operand.for_each_variable(visit),
        }
    }
}

// --- Simple Parser ---

/// Parses a string expression into an AST.
///
/// `**` and `^` both denote powers. Anything the grammar does not accept, including
/// stray characters and malformed numbers, is an error rather than being skipped.
pub fn parse(input: &str) -> Result<Expr> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(AutodeError::parse(input, "expression is empty"));
    }
    let mut parser = Parser {
        source: input,
        tokens,
        pos: 0,
    };
    let expr = parser.parse_expression()?;
    match parser.peek() {
        None => Ok(expr),
        Some(token) => Err(parser.error(format!("unexpected {token} after the expression"))),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Identifier(String),
    Plus,
    Minus,
    Star,
    Slash,
    Power,
    LParen,
    RParen,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Number(n) => write!(f, "number {n}"),
            Token::Identifier(name) => write!(f, "identifier `{name}`"),
            Token::Plus => f.write_str("`+`"),
            Token::Minus => f.write_str("`-`"),
            Token::Star => f.write_str("`*`"),
            Token::Slash => f.write_str("`/`"),
            Token::Power => f.write_str("`**`"),
            Token::LParen => f.write_str("`(`"),
            Token::RParen => f.write_str("`)`"),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c.is_ascii_digit() || c == '.' {
            let mut num_str = String::new();
            while let Some(&d) = chars.peek() {
                if d.is_ascii_digit() || d == '.' {
                    num_str.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            // scientific notation: 1e-5, 2.5E3
            if let Some(&e) = chars.peek() {
                if e == 'e' || e == 'E' {
                    num_str.push(e);
                    chars.next();
                    if let Some(&sign) = chars.peek() {
                        if sign == '+' || sign == '-' {
                            num_str.push(sign);
                            chars.next();
                        }
                    }
                    while let Some(&d) = chars.peek() {
                        if d.is_ascii_digit() {
                            num_str.push(d);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                }
            }
            let value = num_str.parse::<f64>().map_err(|_| {
                AutodeError::parse(input, format!("malformed number `{num_str}`"))
            })?;
            tokens.push(Token::Number(value));
        } else if c.is_alphabetic() || c == '_' {
            let mut ident = String::new();
            while let Some(&d) = chars.peek() {
                if d.is_alphanumeric() || d == '_' {
                    ident.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Token::Identifier(ident));
        } else {
            chars.next();
            let token = match c {
                '+' => Token::Plus,
                '-' => Token::Minus,
                '*' => {
                    if chars.peek() == Some(&'*') {
                        chars.next();
                        Token::Power
                    } else {
                        Token::Star
                    }
                }
                '/' => Token::Slash,
                '^' => Token::Power,
                '(' => Token::LParen,
                ')' => Token::RParen,
                other => {
                    return Err(AutodeError::parse(
                        input,
                        format!("unexpected character `{other}`"),
                    ))
                }
            };
            tokens.push(token);
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn consume(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn error(&self, what: impl Into<String>) -> AutodeError {
        AutodeError::parse(self.source, what)
    }

    fn expect_rparen(&mut self) -> Result<()> {
        match self.consume() {
            Some(Token::RParen) => Ok(()),
            Some(token) => Err(self.error(format!("expected `)` but found {token}"))),
            None => Err(self.error("unbalanced parentheses, expected `)`")),
        }
    }

    fn parse_expression(&mut self) -> Result<Expr> {
        self.parse_sum()
    }

    fn parse_sum(&mut self) -> Result<Expr> {
        let mut left = self.parse_product()?;

        while let Some(token) = self.peek() {
            let op = match token {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.consume();
            let right = self.parse_product()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn parse_product(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary()?;

        while let Some(token) = self.peek() {
            let op = match token {
                Token::Star => BinaryOp::Mul,
                Token::Slash => BinaryOp::Div,
                _ => break,
            };
            self.consume();
            let right = self.parse_unary()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        match self.peek() {
            Some(Token::Minus) => {
                self.consume();
                let expr = self.parse_unary()?;
                Ok(Expr::Neg(Box::new(expr)))
            }
            Some(Token::Plus) => {
                self.consume();
                self.parse_unary()
            }
            _ => self.parse_power(),
        }
    }

    // Right associative, and tighter than a unary minus on its left: -x**2 == -(x**2).
    fn parse_power(&mut self) -> Result<Expr> {
        let base = self.parse_primary()?;
        if let Some(Token::Power) = self.peek() {
            self.consume();
            let exponent = self.parse_unary()?;
            return Ok(Expr::Binary(Box::new(base), BinaryOp::Pow, Box::new(exponent)));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.consume() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Identifier(name)) => {
                if let Some(Token::LParen) = self.peek() {
                    let function = Function::from_name(&name)
                        .ok_or_else(|| self.error(format!("unknown function `{name}`")))?;
                    self.consume(); // eat '('
                    let arg = self.parse_expression()?;
                    self.expect_rparen()?;
                    Ok(Expr::Call(function, Box::new(arg)))
                } else {
                    Ok(Expr::Variable(name))
                }
            }
            Some(Token::LParen) => {
                let expr = self.parse_expression()?;
                self.expect_rparen()?;
                Ok(expr)
            }
            Some(token) => Err(self.error(format!("expected an operand but found {token}"))),
            None => Err(self.error("expected an operand at the end of the expression")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(name: &str) -> Box<Expr> {
        Box::new(Expr::Variable(name.to_string()))
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
    fn parses_rendered_candidate_terms() {
        let expr = parse("(a0 * x1) + (a1 * (x2**2))").expect("valid");
        let expected = Expr::Binary(
            Box::new(Expr::Binary(var("a0"), BinaryOp::Mul, var("x1"))),
            BinaryOp::Add,
            Box::new(Expr::Binary(
                var("a1"),
                BinaryOp::Mul,
                Box::new(Expr::Binary(
                    var("x2"),
                    BinaryOp::Pow,
                    Box::new(Expr::Number(2.0)),
                )),
            )),
        );
        assert_eq!(expr, expected);
    }

    #[test]
    fn power_is_right_associative_and_binds_tighter_than_negation() {
        assert_eq!(
            parse("x1**2**3").expect("valid"),
            Expr::Binary(
                var("x1"),
                BinaryOp::Pow,
                Box::new(Expr::Binary(
                    Box::new(Expr::Number(2.0)),
                    BinaryOp::Pow,
                    Box::new(Expr::Number(3.0)),
                )),
            )
        );
        assert_eq!(
            parse("-x1^2").expect("valid"),
            Expr::Neg(Box::new(Expr::Binary(
                var("x1"),
                BinaryOp::Pow,
                Box::new(Expr::Number(2.0)),
            )))
        );
    }

    #[test]
    fn subtraction_and_division_are_left_associative() {
        assert_eq!(
            parse("a - b - c").expect("valid"),
            Expr::Binary(
                Box::new(Expr::Binary(var("a"), BinaryOp::Sub, var("b"))),
                BinaryOp::Sub,
                var("c"),
            )
        );
        assert_eq!(
            parse("a / b * c").expect("valid"),
            Expr::Binary(
                Box::new(Expr::Binary(var("a"), BinaryOp::Div, var("b"))),
                BinaryOp::Mul,
                var("c"),
            )
        );
    }

    #[test]
    fn reads_scientific_notation_and_calls() {
        assert_eq!(parse("2.5e-3").expect("valid"), Expr::Number(0.0025));
        assert_eq!(
            parse("exp(k * t)").expect("valid"),
            Expr::Call(
                Function::Exp,
                Box::new(Expr::Binary(var("k"), BinaryOp::Mul, var("t"))),
            )
        );
    }

    #[test]
    fn rejects_malformed_input() {
        assert_err_contains(parse(""), "empty");
        assert_err_contains(parse("   "), "empty");
        assert_err_contains(parse("a0 * "), "expected an operand");
        assert_err_contains(parse("a0 + * x1"), "expected an operand");
        assert_err_contains(parse("(a0 * x1"), "unbalanced");
        assert_err_contains(parse("a0 * x1)"), "after the expression");
        assert_err_contains(parse("a0 x1"), "after the expression");
        assert_err_contains(parse("1.2.3 * x1"), "malformed number");
        assert_err_contains(parse("a0 % x1"), "unexpected character");
        assert_err_contains(parse("foo(x1)"), "unknown function");
        assert_err_contains(parse("()"), "expected an operand");
    }

    #[test]
    fn visits_variables_in_source_order() {
        let expr = parse("b * x2 + sin(a) - b / t").expect("valid");
        let mut seen = Vec::new();
        expr.for_each_variable(&mut |name| seen.push(name.to_string()));
        assert_eq!(seen, vec!["b", "x2", "a", "b", "t"]);
    }
}
