//! AST evaluation.

use serde_json::Value;

use crate::context::EvaluationContext;
use crate::core::ast::{BinaryOp, Expr, UnaryOp};
use crate::error::{ExpressionError, ExpressionResult};
use crate::value_utils::{
    both_integers, is_truthy, number_as_f64, number_as_i64, to_display_string, value_type_name,
};

/// Maximum recursion depth for expression evaluation.
const MAX_RECURSION_DEPTH: usize = 256;

/// Evaluator for expression ASTs.
#[derive(Debug, Default)]
pub struct Evaluator;

impl Evaluator {
    /// Create a new evaluator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Evaluate an expression in the given context.
    #[inline]
    pub fn eval(&self, expr: &Expr, context: &EvaluationContext) -> ExpressionResult<Value> {
        self.eval_with_depth(expr, context, 0)
    }

    fn eval_with_depth(
        &self,
        expr: &Expr,
        context: &EvaluationContext,
        depth: usize,
    ) -> ExpressionResult<Value> {
        if depth > MAX_RECURSION_DEPTH {
            return Err(ExpressionError::type_mismatch(
                format!("expression nested at most {MAX_RECURSION_DEPTH} deep"),
                "deeper nesting",
            ));
        }

        match expr {
            Expr::Literal(val) => Ok(val.clone()),

            Expr::Identifier(name) => context
                .resolve(name)
                .cloned()
                .ok_or_else(|| ExpressionError::UnboundIdentifier(name.clone())),

            Expr::Unary { op, expr } => {
                let val = self.eval_with_depth(expr, context, depth + 1)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!is_truthy(&val))),
                    UnaryOp::Neg => match &val {
                        Value::Number(n) => {
                            if let Some(i) = n.as_i64() {
                                Ok(Value::from(-i))
                            } else if let Some(f) = number_as_f64(n) {
                                Ok(serde_json::json!(-f))
                            } else {
                                Err(ExpressionError::type_mismatch("number", "unrepresentable"))
                            }
                        }
                        other => Err(ExpressionError::type_mismatch(
                            "number",
                            value_type_name(other),
                        )),
                    },
                }
            }

            Expr::Binary { left, op, right } => {
                // Short-circuit logic first; both sides use truthiness.
                match op {
                    BinaryOp::And => {
                        let l = self.eval_with_depth(left, context, depth + 1)?;
                        if !is_truthy(&l) {
                            return Ok(Value::Bool(false));
                        }
                        let r = self.eval_with_depth(right, context, depth + 1)?;
                        return Ok(Value::Bool(is_truthy(&r)));
                    }
                    BinaryOp::Or => {
                        let l = self.eval_with_depth(left, context, depth + 1)?;
                        if is_truthy(&l) {
                            return Ok(Value::Bool(true));
                        }
                        let r = self.eval_with_depth(right, context, depth + 1)?;
                        return Ok(Value::Bool(is_truthy(&r)));
                    }
                    _ => {}
                }

                let l = self.eval_with_depth(left, context, depth + 1)?;
                let r = self.eval_with_depth(right, context, depth + 1)?;
                eval_binary(*op, &l, &r)
            }

            Expr::Property { object, property } => {
                let obj = self.eval_with_depth(object, context, depth + 1)?;
                match obj {
                    Value::Object(map) => Ok(map.get(property).cloned().unwrap_or(Value::Null)),
                    Value::Null => Ok(Value::Null),
                    other => Err(ExpressionError::type_mismatch(
                        "object",
                        value_type_name(&other),
                    )),
                }
            }

            Expr::Index { object, index } => {
                let obj = self.eval_with_depth(object, context, depth + 1)?;
                let idx = self.eval_with_depth(index, context, depth + 1)?;
                eval_index(&obj, &idx)
            }
        }
    }
}

fn eval_binary(op: BinaryOp, l: &Value, r: &Value) -> ExpressionResult<Value> {
    match op {
        BinaryOp::Add => eval_add(l, r),
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => eval_arithmetic(op, l, r),
        BinaryOp::Eq => Ok(Value::Bool(values_equal(l, r))),
        BinaryOp::Ne => Ok(Value::Bool(!values_equal(l, r))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => eval_comparison(op, l, r),
        BinaryOp::And | BinaryOp::Or => unreachable!("short-circuited by the caller"),
    }
}

fn eval_add(l: &Value, r: &Value) -> ExpressionResult<Value> {
    match (l, r) {
        (Value::Number(ln), Value::Number(rn)) => {
            if both_integers(ln, rn) {
                let (li, ri) = (ln.as_i64().unwrap_or(0), rn.as_i64().unwrap_or(0));
                match li.checked_add(ri) {
                    Some(sum) => Ok(Value::from(sum)),
                    None => float_result(li as f64 + ri as f64),
                }
            } else {
                let (lf, rf) = require_floats(ln, rn)?;
                float_result(lf + rf)
            }
        }
        // `+` doubles as string concatenation when either side is a string.
        (Value::String(_), _) | (_, Value::String(_)) => Ok(Value::String(format!(
            "{}{}",
            to_display_string(l),
            to_display_string(r)
        ))),
        (Value::Number(_), other) | (other, _) => Err(ExpressionError::type_mismatch(
            "number or string",
            value_type_name(other),
        )),
    }
}

fn eval_arithmetic(op: BinaryOp, l: &Value, r: &Value) -> ExpressionResult<Value> {
    let (Value::Number(ln), Value::Number(rn)) = (l, r) else {
        let bad = if l.is_number() { r } else { l };
        return Err(ExpressionError::type_mismatch(
            "number",
            value_type_name(bad),
        ));
    };

    if both_integers(ln, rn) {
        let (li, ri) = (ln.as_i64().unwrap_or(0), rn.as_i64().unwrap_or(0));
        return match op {
            BinaryOp::Sub => match li.checked_sub(ri) {
                Some(v) => Ok(Value::from(v)),
                None => float_result(li as f64 - ri as f64),
            },
            BinaryOp::Mul => match li.checked_mul(ri) {
                Some(v) => Ok(Value::from(v)),
                None => float_result(li as f64 * ri as f64),
            },
            BinaryOp::Div => {
                if ri == 0 {
                    Err(ExpressionError::type_mismatch("non-zero divisor", "0"))
                } else if li % ri == 0 {
                    Ok(Value::from(li / ri))
                } else {
                    float_result(li as f64 / ri as f64)
                }
            }
            BinaryOp::Mod => {
                if ri == 0 {
                    Err(ExpressionError::type_mismatch("non-zero divisor", "0"))
                } else {
                    Ok(Value::from(li % ri))
                }
            }
            _ => unreachable!(),
        };
    }

    let (lf, rf) = require_floats(ln, rn)?;
    match op {
        BinaryOp::Sub => float_result(lf - rf),
        BinaryOp::Mul => float_result(lf * rf),
        BinaryOp::Div => {
            if rf == 0.0 {
                Err(ExpressionError::type_mismatch("non-zero divisor", "0"))
            } else {
                float_result(lf / rf)
            }
        }
        BinaryOp::Mod => {
            if rf == 0.0 {
                Err(ExpressionError::type_mismatch("non-zero divisor", "0"))
            } else {
                float_result(lf % rf)
            }
        }
        _ => unreachable!(),
    }
}

fn eval_comparison(op: BinaryOp, l: &Value, r: &Value) -> ExpressionResult<Value> {
    let ordering = match (l, r) {
        (Value::Number(ln), Value::Number(rn)) => {
            let (lf, rf) = require_floats(ln, rn)?;
            lf.partial_cmp(&rf).ok_or_else(|| {
                ExpressionError::type_mismatch("comparable numbers", "NaN")
            })?
        }
        (Value::String(ls), Value::String(rs)) => ls.cmp(rs),
        (l, r) => {
            return Err(ExpressionError::type_mismatch(
                "two numbers or two strings",
                format!("{} and {}", value_type_name(l), value_type_name(r)),
            ));
        }
    };

    let result = match op {
        BinaryOp::Lt => ordering.is_lt(),
        BinaryOp::Le => ordering.is_le(),
        BinaryOp::Gt => ordering.is_gt(),
        BinaryOp::Ge => ordering.is_ge(),
        _ => unreachable!(),
    };
    Ok(Value::Bool(result))
}

fn eval_index(obj: &Value, idx: &Value) -> ExpressionResult<Value> {
    match (obj, idx) {
        (Value::Array(items), Value::Number(n)) => {
            let i = number_as_i64(n)
                .ok_or_else(|| ExpressionError::type_mismatch("integer index", "float"))?;
            if i < 0 {
                return Err(ExpressionError::type_mismatch(
                    "non-negative index",
                    i.to_string(),
                ));
            }
            Ok(items.get(i as usize).cloned().unwrap_or(Value::Null))
        }
        (Value::Object(map), Value::String(key)) => {
            Ok(map.get(key).cloned().unwrap_or(Value::Null))
        }
        (Value::Null, _) => Ok(Value::Null),
        (obj, idx) => Err(ExpressionError::type_mismatch(
            "array[number] or object[string]",
            format!("{}[{}]", value_type_name(obj), value_type_name(idx)),
        )),
    }
}

/// Number-aware equality: `1 == 1.0` holds; everything else is deep equality.
fn values_equal(l: &Value, r: &Value) -> bool {
    if let (Value::Number(ln), Value::Number(rn)) = (l, r) {
        match (number_as_f64(ln), number_as_f64(rn)) {
            (Some(lf), Some(rf)) => return lf == rf,
            _ => return ln == rn,
        }
    }
    l == r
}

fn require_floats(
    l: &serde_json::Number,
    r: &serde_json::Number,
) -> ExpressionResult<(f64, f64)> {
    match (number_as_f64(l), number_as_f64(r)) {
        (Some(lf), Some(rf)) => Ok((lf, rf)),
        _ => Err(ExpressionError::type_mismatch("number", "unrepresentable")),
    }
}

fn float_result(f: f64) -> ExpressionResult<Value> {
    serde_json::Number::from_f64(f)
        .map(Value::Number)
        .ok_or_else(|| ExpressionError::type_mismatch("finite number", "NaN or infinity"))
}
