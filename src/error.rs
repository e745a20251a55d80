//! Command validation errors (spec §7 category 1). Mutation-path functions
//! return `Result<_, CoreError>`; nothing persists when one is returned.

use thiserror::Error;

use crate::money::DecimalError;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("account_not_found")]
    AccountNotFound,
    #[error("insufficient_funds")]
    InsufficientFunds,
    #[error("invalid_amount: {0}")]
    InvalidAmount(String),
    #[error("invalid_rate: {0}")]
    InvalidRate(String),
    #[error("invalid_basis: day_count_basis must be >= 360, got {0}")]
    InvalidBasis(i64),
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        CoreError::Storage(err.to_string())
    }
}

impl From<DecimalError> for CoreError {
    fn from(err: DecimalError) -> Self {
        CoreError::InvalidAmount(err.to_string())
    }
}
