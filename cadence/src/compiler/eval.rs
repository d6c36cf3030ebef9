/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Literal-only expression evaluator.
//!
//! Only `+` is defined.  It works for every pairing of number and string:
//!
//! | lhs    | rhs    | result                      |
//! |--------|--------|-----------------------------|
//! | float  | float  | numeric sum                 |
//! | string | string | concatenation               |
//! | float  | string | number text + string        |
//! | string | float  | string + number text        |

use std::fmt;

use thiserror::Error;

use crate::program::{BinaryOp, Expr, Literal};

/// A fully evaluated command argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Float(f64),
    Str(String),
}

impl Value {
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Str(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            Value::Float(_) => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Value::Float(_) => "number",
            Value::Str(_) => "string",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Float(v) => write!(f, "{v}"),
            Value::Str(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    #[error("variable '{name}' is not supported; arguments must be literal")]
    UnsupportedFeature { name: String },

    #[error("operator '{op}' is not supported; only '+' can be evaluated")]
    InvalidExpression { op: char },
}

pub fn eval(expr: &Expr) -> Result<Value, EvalError> {
    match expr {
        Expr::Const(Literal::Float(v)) => Ok(Value::Float(*v)),
        Expr::Const(Literal::String(s)) => Ok(Value::Str(s.clone())),
        Expr::Const(Literal::Variable(name)) => {
            Err(EvalError::UnsupportedFeature { name: name.clone() })
        }
        Expr::Binary { op, lhs, rhs } => {
            if *op != BinaryOp::Add {
                return Err(EvalError::InvalidExpression { op: op.symbol() });
            }
            let lhs = eval(lhs)?;
            let rhs = eval(rhs)?;
            Ok(add(lhs, rhs))
        }
    }
}

fn add(lhs: Value, rhs: Value) -> Value {
    match (lhs, rhs) {
        (Value::Float(a), Value::Float(b)) => Value::Float(a + b),
        (Value::Str(mut a), Value::Str(b)) => {
            a.push_str(&b);
            Value::Str(a)
        }
        (a, b) => Value::Str(format!("{a}{b}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add_expr(lhs: Expr, rhs: Expr) -> Expr {
        Expr::binary(BinaryOp::Add, lhs, rhs)
    }

    #[test]
    fn literals_evaluate_to_themselves() {
        assert_eq!(eval(&Expr::float(2.5)).unwrap(), Value::Float(2.5));
        assert_eq!(eval(&Expr::string("x")).unwrap(), Value::Str("x".into()));
    }

    #[test]
    fn addition_covers_every_operand_pairing() {
        let cases = [
            (Expr::float(1.0), Expr::float(2.5), Value::Float(3.5)),
            (Expr::string("a"), Expr::string("b"), Value::Str("ab".into())),
            (Expr::float(3.0), Expr::string("ms"), Value::Str("3ms".into())),
            (Expr::string("t="), Expr::float(1.5), Value::Str("t=1.5".into())),
        ];
        for (lhs, rhs, expected) in cases {
            assert_eq!(eval(&add_expr(lhs, rhs)).unwrap(), expected);
        }
    }

    #[test]
    fn nested_addition_is_left_to_right() {
        // ("n=" + 1) + 2 keeps concatenating once a string appears.
        let expr = add_expr(add_expr(Expr::string("n="), Expr::float(1.0)), Expr::float(2.0));
        assert_eq!(eval(&expr).unwrap(), Value::Str("n=12".into()));
    }

    #[test]
    fn variables_are_unsupported() {
        let expr = add_expr(Expr::float(1.0), Expr::Const(Literal::Variable("speed".into())));
        assert_eq!(
            eval(&expr).unwrap_err(),
            EvalError::UnsupportedFeature {
                name: "speed".into()
            }
        );
    }

    #[test]
    fn other_operators_are_invalid() {
        let expr = Expr::binary(BinaryOp::Mul, Expr::float(2.0), Expr::float(3.0));
        assert_eq!(eval(&expr).unwrap_err(), EvalError::InvalidExpression { op: '*' });
    }
}
