#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # MBFlow Expression
//!
//! The expression language used by MBFlow edge conditions, router routes,
//! and transform nodes: identifiers, literals, arithmetic, comparison,
//! short-circuit logic, dotted member access, bracket indexing, and string
//! concatenation via `+`.
//!
//! ```text
//! score >= 80
//! user.tags[0] == "vip" && attempts < 3
//! "result: " + input * 2
//! ```

pub mod context;
pub mod core;
pub mod error;
pub mod eval;
pub mod value_utils;

pub use context::EvaluationContext;
pub use crate::core::ast::{BinaryOp, Expr, UnaryOp};
pub use error::{ExpressionError, ExpressionResult};
pub use eval::Evaluator;

use serde_json::Value;

/// A parsed, reusable expression.
#[derive(Debug, Clone)]
pub struct Expression {
    source: String,
    ast: Expr,
}

impl Expression {
    /// Parse an expression from source text.
    pub fn parse(source: impl Into<String>) -> ExpressionResult<Self> {
        let source = source.into();
        let ast = crate::core::parser::parse(&source)?;
        Ok(Self { source, ast })
    }

    /// The original source text.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate against a context.
    pub fn evaluate(&self, context: &EvaluationContext) -> ExpressionResult<Value> {
        Evaluator::new().eval(&self.ast, context)
    }

    /// Evaluate against a context and coerce the result to a boolean
    /// (truthiness semantics).
    pub fn evaluate_bool(&self, context: &EvaluationContext) -> ExpressionResult<bool> {
        self.evaluate(context).map(|v| value_utils::is_truthy(&v))
    }
}

/// One-shot convenience: parse and evaluate in a single call.
pub fn evaluate(source: &str, context: &EvaluationContext) -> ExpressionResult<Value> {
    Expression::parse(source)?.evaluate(context)
}
