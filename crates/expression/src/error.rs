//! Expression error types.

use thiserror::Error;

/// Result alias used throughout the expression crate.
pub type ExpressionResult<T> = Result<T, ExpressionError>;

/// Errors produced while parsing or evaluating an expression.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExpressionError {
    /// The source text is not a valid expression.
    #[error("syntax error at offset {offset}: {message}")]
    SyntaxError {
        /// Byte offset into the source where the error was detected.
        offset: usize,
        /// What went wrong.
        message: String,
    },

    /// An identifier could not be resolved in the evaluation context.
    #[error("unbound identifier: {0}")]
    UnboundIdentifier(String),

    /// An operation was applied to values of the wrong type.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        /// What the operation needed.
        expected: String,
        /// What it actually received.
        found: String,
    },
}

impl ExpressionError {
    /// Create a syntax error.
    pub fn syntax(offset: usize, message: impl Into<String>) -> Self {
        Self::SyntaxError {
            offset,
            message: message.into(),
        }
    }

    /// Create a type-mismatch error.
    pub fn type_mismatch(expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            found: found.into(),
        }
    }
}
