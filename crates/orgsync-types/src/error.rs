use thiserror::Error;

/// Errors produced by type construction and parsing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid instant: {0}")]
    InvalidInstant(String),

    #[error("invalid unit id: {0}")]
    InvalidUnitId(String),

    #[error("empty validity window: [{from}, {to})")]
    EmptyValidity { from: String, to: String },
}

pub type TypeResult<T> = Result<T, TypeError>;
