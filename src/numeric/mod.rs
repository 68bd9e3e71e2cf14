// ============================================================================
// Numeric Module
// Fixed-point arithmetic for prices, quantities and fees
// ============================================================================
//
// - FixedDecimal<D>: i64-backed fixed-point decimal, D decimal places
// - Price / Quantity aliases used throughout the engine
// - All arithmetic is checked and returns NumericResult
// - Volume: sums over many orders or trades, held in rust_decimal

mod errors;
mod fixed_decimal;

pub use errors::{NumericError, NumericResult};
pub use fixed_decimal::{FixedDecimal, Price, Quantity};

/// Quantity summed across orders or trades (book depth, bar volume).
///
/// Each `Quantity` fits in an i64, but their sum need not, so aggregates use
/// the 96-bit decimal instead.
pub type Volume = rust_decimal::Decimal;
