//! Pixelwise expression evaluation.
//!
//! Evaluation operates on Float32 samples; callers resolve band
//! variables per pixel and are responsible for skipping no-data pixels
//! before evaluating (any no-data input makes the output no-data).

use crate::error::{BandMathError, BandMathResult};
use crate::parser::{BinaryOp, Expr, UnaryOp};

/// Runtime value of a sub-expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f32),
    Bool(bool),
    Str(String),
}

impl Value {
    fn as_number(&self) -> BandMathResult<f32> {
        match self {
            Value::Number(n) => Ok(*n),
            other => Err(BandMathError::Type(format!(
                "expected a number, got {other:?}"
            ))),
        }
    }

    fn as_bool(&self) -> BandMathResult<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(BandMathError::Type(format!(
                "expected a boolean, got {other:?}"
            ))),
        }
    }
}

fn call_function(name: &str, args: &[Value]) -> BandMathResult<Value> {
    let numeric = |args: &[Value]| -> BandMathResult<Vec<f32>> {
        args.iter().map(Value::as_number).collect()
    };

    match name {
        "abs" | "sqrt" | "log" | "exp" => {
            if args.len() != 1 {
                return Err(BandMathError::Arity {
                    name: name.to_string(),
                    expected: "1".to_string(),
                    got: args.len(),
                });
            }
            let v = args[0].as_number()?;
            let out = match name {
                "abs" => v.abs(),
                "sqrt" => v.sqrt(),
                "log" => v.ln(),
                _ => v.exp(),
            };
            Ok(Value::Number(out))
        }
        "min" | "max" | "avg" => {
            if args.len() < 2 {
                return Err(BandMathError::Arity {
                    name: name.to_string(),
                    expected: ">=2".to_string(),
                    got: args.len(),
                });
            }
            let vals = numeric(args)?;
            let out = match name {
                "min" => vals.iter().copied().fold(f32::INFINITY, f32::min),
                "max" => vals.iter().copied().fold(f32::NEG_INFINITY, f32::max),
                _ => vals.iter().sum::<f32>() / vals.len() as f32,
            };
            Ok(Value::Number(out))
        }
        other => Err(BandMathError::UnknownFunction(other.to_string())),
    }
}

/// Evaluate an expression for one pixel.
///
/// `resolve` maps a band variable name to its sample at this pixel;
/// returning `None` is a validation error (unknown variables should have
/// been rejected by the ACL check before evaluation starts).
pub fn eval_expr<F>(expr: &Expr, resolve: &F) -> BandMathResult<Value>
where
    F: Fn(&str) -> Option<f32>,
{
    match expr {
        Expr::Number(n) => Ok(Value::Number(*n as f32)),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Str(s) => Ok(Value::Str(s.clone())),
        Expr::Variable(name) => resolve(name)
            .map(Value::Number)
            .ok_or_else(|| BandMathError::UnknownVariable {
                name: name.clone(),
                supported: String::new(),
            }),
        Expr::Function(name, args) => {
            let mut vals = Vec::with_capacity(args.len());
            for arg in args {
                vals.push(eval_expr(arg, resolve)?);
            }
            call_function(name, &vals)
        }
        Expr::Unary(op, operand) => {
            let v = eval_expr(operand, resolve)?;
            match op {
                UnaryOp::Neg => Ok(Value::Number(-v.as_number()?)),
                UnaryOp::Not => Ok(Value::Bool(!v.as_bool()?)),
            }
        }
        Expr::Binary(op, lhs, rhs) => {
            // Short-circuit logical operators before evaluating rhs.
            if matches!(op, BinaryOp::And | BinaryOp::Or) {
                let l = eval_expr(lhs, resolve)?.as_bool()?;
                let short = match op {
                    BinaryOp::And => !l,
                    _ => l,
                };
                if short {
                    return Ok(Value::Bool(l));
                }
                return Ok(Value::Bool(eval_expr(rhs, resolve)?.as_bool()?));
            }

            let l = eval_expr(lhs, resolve)?;
            let r = eval_expr(rhs, resolve)?;

            if matches!(op, BinaryOp::Eq | BinaryOp::Ne) {
                if let (Value::Str(a), Value::Str(b)) = (&l, &r) {
                    let eq = a == b;
                    return Ok(Value::Bool(if *op == BinaryOp::Eq { eq } else { !eq }));
                }
            }

            let a = l.as_number()?;
            let b = r.as_number()?;
            let out = match op {
                BinaryOp::Add => Value::Number(a + b),
                BinaryOp::Sub => Value::Number(a - b),
                BinaryOp::Mul => Value::Number(a * b),
                BinaryOp::Div => Value::Number(a / b),
                BinaryOp::Rem => Value::Number(a % b),
                BinaryOp::Eq => Value::Bool(a == b),
                BinaryOp::Ne => Value::Bool(a != b),
                BinaryOp::Lt => Value::Bool(a < b),
                BinaryOp::Le => Value::Bool(a <= b),
                BinaryOp::Gt => Value::Bool(a > b),
                BinaryOp::Ge => Value::Bool(a >= b),
                BinaryOp::And | BinaryOp::Or => unreachable!(),
            };
            Ok(out)
        }
        Expr::Ternary(cond, then_branch, else_branch) => {
            if eval_expr(cond, resolve)?.as_bool()? {
                eval_expr(then_branch, resolve)
            } else {
                eval_expr(else_branch, resolve)
            }
        }
    }
}

/// Evaluate an expression to a numeric sample.
pub fn eval_number<F>(expr: &Expr, resolve: &F) -> BandMathResult<f32>
where
    F: Fn(&str) -> Option<f32>,
{
    eval_expr(expr, resolve)?.as_number()
}
