// src/types/errors.rs - Simulator error types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Simulator error type. Validation and insufficiency errors are rejected
/// before any state mutation; storage errors are recovered locally by the
/// history store and never reach facade callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SimError {
    // Validation errors
    InvalidAmount(String),
    InvalidPrice(String),

    // Insufficiency errors
    InsufficientBalance(String),
    InsufficientMargin(String),
    InsufficientHoldings(String),
    ExceedsMaxBorrow(String),
    NothingToRepay,

    // Lookup errors
    PositionNotFound(u64),
    OrderNotFound(u64),

    // Operation not available for the instrument kind
    UnsupportedOperation(String),

    // Persistence errors (swallowed by the history store)
    Storage(String),
}

impl fmt::Display for SimError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SimError::InvalidAmount(msg) => write!(f, "Invalid amount: {}", msg),
            SimError::InvalidPrice(msg) => write!(f, "Invalid price: {}", msg),
            SimError::InsufficientBalance(msg) => write!(f, "Insufficient balance: {}", msg),
            SimError::InsufficientMargin(msg) => write!(f, "Insufficient margin: {}", msg),
            SimError::InsufficientHoldings(msg) => write!(f, "Insufficient holdings: {}", msg),
            SimError::ExceedsMaxBorrow(msg) => write!(f, "Exceeds max borrow: {}", msg),
            SimError::NothingToRepay => write!(f, "Nothing to repay"),
            SimError::PositionNotFound(id) => write!(f, "Position not found: {}", id),
            SimError::OrderNotFound(id) => write!(f, "Order not found: {}", id),
            SimError::UnsupportedOperation(msg) => write!(f, "Unsupported operation: {}", msg),
            SimError::Storage(msg) => write!(f, "Storage error: {}", msg),
        }
    }
}

impl std::error::Error for SimError {}

impl SimError {
    /// Whether the error should surface as a user-facing notice rather than
    /// a log line.
    pub fn is_user_facing(&self) -> bool {
        !matches!(self, SimError::Storage(_))
    }
}
