// SPDX-FileCopyrightText: 2026 Corvid Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `calculate`: a recursive-descent arithmetic evaluator.
//!
//! Grammar, lowest precedence first:
//!
//! ```text
//! sum     = product (("+" | "-") product)*
//! product = power (("*" | "/" | "%") power)*
//! power   = unary ("^" power)?            right-associative
//! unary   = ("+" | "-") unary | primary
//! primary = number | "(" sum ")" | ident | ident "(" args ")"
//! ```
//!
//! Identifiers are case-insensitive. Nesting of parentheses, signs, powers
//! and function calls is capped at [`MAX_DEPTH`] levels, and expressions
//! longer than [`MAX_EXPRESSION_LEN`] characters are rejected unparsed.

use async_trait::async_trait;
use corvid_core::CorvidError;
use thiserror::Error;

use crate::tool::{Tool, ToolOutput};

/// Deepest nesting the parser descends into.
pub const MAX_DEPTH: usize = 64;

/// Longest expression, in characters, the tool evaluates.
pub const MAX_EXPRESSION_LEN: usize = 1000;

/// Why an expression could not be evaluated.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("Expected number at position {0}")]
    ExpectedNumber(usize),
    #[error("Invalid number `{0}`")]
    InvalidNumber(String),
    #[error("Expected ')' at position {0}")]
    UnclosedParen(usize),
    #[error("Unknown function: {0}")]
    UnknownFunction(String),
    #[error("Unknown identifier: {0}")]
    UnknownIdentifier(String),
    #[error("Function {name} expects {expected} argument(s), got {got}")]
    Arity {
        name: String,
        expected: &'static str,
        got: usize,
    },
    #[error("Division by zero")]
    DivisionByZero,
    #[error("Unexpected character '{ch}' at position {pos}")]
    Trailing { ch: char, pos: usize },
    #[error("Expression nests deeper than {0} levels")]
    TooDeep(usize),
    #[error("Expression is longer than {0} characters")]
    TooLong(usize),
}

fn constant(name: &str) -> Option<f64> {
    match name {
        "pi" => Some(std::f64::consts::PI),
        "e" => Some(std::f64::consts::E),
        "tau" => Some(std::f64::consts::TAU),
        "inf" => Some(f64::INFINITY),
        _ => None,
    }
}

fn unary(name: &str) -> Option<fn(f64) -> f64> {
    let f: fn(f64) -> f64 = match name {
        "sin" => f64::sin,
        "cos" => f64::cos,
        "tan" => f64::tan,
        "asin" => f64::asin,
        "acos" => f64::acos,
        "atan" => f64::atan,
        "sqrt" => f64::sqrt,
        "abs" => f64::abs,
        "ceil" => f64::ceil,
        "floor" => f64::floor,
        // Halves round toward positive infinity.
        "round" => |x| (x + 0.5).floor(),
        "log" | "log10" => f64::log10,
        "ln" => f64::ln,
        "log2" => f64::log2,
        "exp" => f64::exp,
        _ => return None,
    };
    Some(f)
}

fn call(name: &str, args: &[f64]) -> Result<f64, EvalError> {
    let arity = |expected| EvalError::Arity {
        name: name.to_string(),
        expected,
        got: args.len(),
    };
    match name {
        "pow" => match args {
            [base, exp] => Ok(base.powf(*exp)),
            _ => Err(arity("2")),
        },
        "min" | "max" => {
            if args.is_empty() {
                return Err(arity("at least 1"));
            }
            let pick: fn(f64, f64) -> f64 = if name == "min" { f64::min } else { f64::max };
            Ok(args.iter().copied().fold(args[0], pick))
        }
        _ => {
            let f = unary(name).ok_or_else(|| EvalError::UnknownFunction(name.to_string()))?;
            match args {
                [x] => Ok(f(*x)),
                _ => Err(arity("1")),
            }
        }
    }
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn new(expr: &str) -> Self {
        Self {
            chars: expr.chars().collect(),
            pos: 0,
            depth: 0,
        }
    }

    /// Runs `f` one nesting level deeper.
    fn nested<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, EvalError>,
    ) -> Result<T, EvalError> {
        if self.depth >= MAX_DEPTH {
            return Err(EvalError::TooDeep(MAX_DEPTH));
        }
        self.depth += 1;
        let out = f(self);
        self.depth -= 1;
        out
    }

    fn peek(&mut self) -> Option<char> {
        while self.chars.get(self.pos).is_some_and(|c| c.is_whitespace()) {
            self.pos += 1;
        }
        self.chars.get(self.pos).copied()
    }

    fn eat(&mut self, ch: char) -> bool {
        if self.peek() == Some(ch) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_close(&mut self) -> Result<(), EvalError> {
        if self.eat(')') {
            Ok(())
        } else {
            Err(EvalError::UnclosedParen(self.pos))
        }
    }

    fn sum(&mut self) -> Result<f64, EvalError> {
        let mut left = self.product()?;
        loop {
            if self.eat('+') {
                left += self.product()?;
            } else if self.eat('-') {
                left -= self.product()?;
            } else {
                return Ok(left);
            }
        }
    }

    fn product(&mut self) -> Result<f64, EvalError> {
        let mut left = self.power()?;
        loop {
            if self.eat('*') {
                left *= self.power()?;
            } else if self.eat('/') {
                let right = self.power()?;
                if right == 0.0 {
                    return Err(EvalError::DivisionByZero);
                }
                left /= right;
            } else if self.eat('%') {
                left %= self.power()?;
            } else {
                return Ok(left);
            }
        }
    }

    fn power(&mut self) -> Result<f64, EvalError> {
        let base = self.unary()?;
        if self.eat('^') {
            let exp = self.nested(Self::power)?;
            return Ok(base.powf(exp));
        }
        Ok(base)
    }

    fn unary(&mut self) -> Result<f64, EvalError> {
        if self.eat('-') {
            return Ok(-self.nested(Self::unary)?);
        }
        if self.eat('+') {
            return self.nested(Self::unary);
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<f64, EvalError> {
        match self.peek() {
            Some('(') => {
                self.pos += 1;
                let value = self.nested(Self::sum)?;
                self.expect_close()?;
                Ok(value)
            }
            Some(c) if c.is_ascii_alphabetic() => {
                let name = self.identifier().to_ascii_lowercase();
                if self.eat('(') {
                    let args = self.nested(Self::args)?;
                    self.expect_close()?;
                    call(&name, &args)
                } else {
                    constant(&name).ok_or(EvalError::UnknownIdentifier(name))
                }
            }
            _ => self.number(),
        }
    }

    fn identifier(&mut self) -> String {
        let start = self.pos;
        while self
            .chars
            .get(self.pos)
            .is_some_and(|c| c.is_ascii_alphanumeric())
        {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn args(&mut self) -> Result<Vec<f64>, EvalError> {
        let mut args = Vec::new();
        if self.peek() == Some(')') {
            return Ok(args);
        }
        args.push(self.sum()?);
        while self.eat(',') {
            args.push(self.sum()?);
        }
        Ok(args)
    }

    fn number(&mut self) -> Result<f64, EvalError> {
        self.peek();
        let start = self.pos;
        while self
            .chars
            .get(self.pos)
            .is_some_and(|c| c.is_ascii_digit() || *c == '.')
        {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(EvalError::ExpectedNumber(self.pos));
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        text.parse().map_err(|_| EvalError::InvalidNumber(text))
    }
}

/// Parses and evaluates an arithmetic expression.
pub fn evaluate(expr: &str) -> Result<f64, EvalError> {
    if expr.chars().count() > MAX_EXPRESSION_LEN {
        return Err(EvalError::TooLong(MAX_EXPRESSION_LEN));
    }
    let mut parser = Parser::new(expr);
    let value = parser.sum()?;
    match parser.peek() {
        None => Ok(value),
        Some(ch) => Err(EvalError::Trailing {
            ch,
            pos: parser.pos,
        }),
    }
}

/// Rounds away float noise (0.30000000000000004 becomes 0.3).
fn display_number(n: f64) -> String {
    if !n.is_finite() {
        return n.to_string();
    }
    let rounded: f64 = format!("{n:.14e}").parse().unwrap_or(n);
    if rounded == 0.0 {
        // Avoid "-0".
        return "0".to_string();
    }
    rounded.to_string()
}

pub struct Calculate;

#[async_trait]
impl Tool for Calculate {
    fn name(&self) -> &str {
        super::CALCULATE
    }

    fn description(&self) -> &str {
        "Evaluate a mathematical expression. Supports +, -, *, /, %, ^ (exponentiation), \
         parentheses, and functions like sin, cos, sqrt, abs, log, ln, min, max, etc. \
         Constants: pi, e, tau, inf."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "expression": {
                    "type": "string",
                    "description": "The math expression to evaluate (e.g. \"sqrt(2) * pi\", \"2^10\", \"0.1 + 0.2\")"
                }
            },
            "required": ["expression"]
        })
    }

    async fn invoke(&self, input: serde_json::Value) -> Result<ToolOutput, CorvidError> {
        let expression = input["expression"].as_str().unwrap_or_default();
        Ok(match evaluate(expression) {
            Ok(value) => ToolOutput::text(format!("{expression} = {}", display_number(value))),
            Err(e @ EvalError::TooLong(_)) => {
                ToolOutput::error(format!("Error evaluating expression: {e}"))
            }
            Err(e) => ToolOutput::error(format!("Error evaluating \"{expression}\": {e}")),
        })
    }
}
