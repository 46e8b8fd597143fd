//! Band-math error type.

use thiserror::Error;

pub type BandMathResult<T> = Result<T, BandMathError>;

#[derive(Debug, Error)]
pub enum BandMathError {
    #[error("band math error: invalid expression: {0}")]
    InvalidExpression(String),

    #[error("band math error: {message} at position {position}")]
    Parse { message: String, position: usize },

    #[error("band math error: user-defined band math is not enabled for this layer")]
    Disabled,

    #[error("band math error: Too many expressions: {0}")]
    TooManyExpressions(usize),

    #[error("band math error: Too many variables: {0}")]
    TooManyVariables(usize),

    #[error("band math error: Too many tokens: {0}")]
    TooManyTokens(usize),

    #[error("band math error: variable not supported: {name}, supported variables are: {supported}")]
    UnknownVariable { name: String, supported: String },

    #[error("band math error: Operation not supported: {0}")]
    OperationNotSupported(String),

    #[error("band math error: unknown function: {0}")]
    UnknownFunction(String),

    #[error("band math error: function {name} expects {expected} argument(s), got {got}")]
    Arity {
        name: String,
        expected: String,
        got: usize,
    },

    #[error("band math error: type mismatch: {0}")]
    Type(String),
}
