// ============================================================================
// Numeric Errors
// Failures of checked fixed-point arithmetic
// ============================================================================

use thiserror::Error;

/// Errors that can occur during fixed-point arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum NumericError {
    #[error("arithmetic overflow: result exceeded maximum value")]
    Overflow,
    #[error("arithmetic underflow: result below minimum value")]
    Underflow,
    #[error("division by zero")]
    DivisionByZero,
    #[error("precision loss: conversion would lose significant digits")]
    PrecisionLoss,
    #[error("invalid input: could not parse value")]
    InvalidInput,
}

/// Result type alias for numeric operations
pub type NumericResult<T> = Result<T, NumericError>;
