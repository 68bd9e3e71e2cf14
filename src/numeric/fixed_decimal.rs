// ============================================================================
// Fixed-Point Decimal
// i64-backed decimal with compile-time precision for prices and quantities
// ============================================================================

use super::errors::{NumericError, NumericResult};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Fixed-point decimal number with compile-time precision.
///
/// Stores `value × 10^DECIMALS` as an i64. Every arithmetic operation is
/// checked; there are no panicking operator impls, so matching code has to
/// thread `NumericResult` through `?`.
///
/// With the default `DECIMALS = 9` the range is roughly ±9.2 billion with
/// nano-unit resolution, which covers listed prices and fee amounts alike.
///
/// # Example
/// ```
/// use order_matching_engine::numeric::Price;
///
/// let price: Price = "100.25".parse().unwrap();
/// let qty = Price::from_integer(4).unwrap();
/// assert_eq!(price.checked_mul(qty).unwrap(), Price::from_integer(401).unwrap());
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct FixedDecimal<const DECIMALS: u8 = 9>(i64);

/// 10^n, evaluated at compile time for the scale constants.
const fn pow10(n: u8) -> i64 {
    let mut result: i64 = 1;
    let mut i = 0;
    while i < n {
        result *= 10;
        i += 1;
    }
    result
}

impl<const D: u8> FixedDecimal<D> {
    /// The scale factor (10^DECIMALS)
    pub const SCALE: i64 = pow10(D);

    const HALF_SCALE: i64 = pow10(D) / 2;

    pub const ZERO: Self = Self(0);
    pub const ONE: Self = Self(pow10(D));
    pub const MAX: Self = Self(i64::MAX);

    #[inline]
    pub const fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    /// Create from a whole number.
    #[inline]
    pub fn from_integer(value: i64) -> NumericResult<Self> {
        value
            .checked_mul(Self::SCALE)
            .map(Self)
            .ok_or(NumericError::Overflow)
    }

    /// Create from integer and fractional parts, e.g. `from_parts(100, 500_000_000)`
    /// is 100.5 with nine decimals.
    pub fn from_parts(integer: i64, fraction: u64) -> NumericResult<Self> {
        if fraction >= Self::SCALE as u64 {
            return Err(NumericError::InvalidInput);
        }

        let frac = if integer < 0 {
            -(fraction as i64)
        } else {
            fraction as i64
        };

        integer
            .checked_mul(Self::SCALE)
            .and_then(|scaled| scaled.checked_add(frac))
            .map(Self)
            .ok_or(NumericError::Overflow)
    }

    #[inline]
    pub const fn raw_value(self) -> i64 {
        self.0
    }

    #[inline]
    pub const fn integer_part(self) -> i64 {
        self.0 / Self::SCALE
    }

    #[inline]
    pub const fn fractional_part(self) -> u64 {
        (self.0 % Self::SCALE).unsigned_abs()
    }

    #[inline]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    #[inline]
    pub fn checked_add(self, rhs: Self) -> NumericResult<Self> {
        self.0.checked_add(rhs.0).map(Self).ok_or(if rhs.0 > 0 {
            NumericError::Overflow
        } else {
            NumericError::Underflow
        })
    }

    #[inline]
    pub fn checked_sub(self, rhs: Self) -> NumericResult<Self> {
        self.0.checked_sub(rhs.0).map(Self).ok_or(if rhs.0 < 0 {
            NumericError::Overflow
        } else {
            NumericError::Underflow
        })
    }

    /// Checked multiplication, rounding half away from zero.
    ///
    /// The product is formed in i128 and only narrowed after rescaling.
    pub fn checked_mul(self, rhs: Self) -> NumericResult<Self> {
        let product = (self.0 as i128) * (rhs.0 as i128);
        let half = Self::HALF_SCALE as i128;
        let rounded = if product >= 0 {
            product + half
        } else {
            product - half
        };
        let result = rounded / Self::SCALE as i128;

        if result > i64::MAX as i128 {
            Err(NumericError::Overflow)
        } else if result < i64::MIN as i128 {
            Err(NumericError::Underflow)
        } else {
            Ok(Self(result as i64))
        }
    }

    /// Whether `self` is an exact multiple of `step` (tick and lot checks).
    pub fn is_multiple_of(self, step: Self) -> NumericResult<bool> {
        if step.0 == 0 {
            return Err(NumericError::DivisionByZero);
        }
        Ok(self.0 % step.0 == 0)
    }

    #[inline]
    pub fn min(self, other: Self) -> Self {
        Self(self.0.min(other.0))
    }

    #[inline]
    pub fn max(self, other: Self) -> Self {
        Self(self.0.max(other.0))
    }

    /// Sum an iterator of values, failing on the first overflow.
    pub fn checked_sum<I>(values: I) -> NumericResult<Self>
    where
        I: IntoIterator<Item = Self>,
    {
        values
            .into_iter()
            .try_fold(Self::ZERO, |acc, value| acc.checked_add(value))
    }
}

impl<const D: u8> PartialOrd for FixedDecimal<D> {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<const D: u8> Ord for FixedDecimal<D> {
    #[inline]
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl<const D: u8> fmt::Debug for FixedDecimal<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

/// Prints the shortest exact form: `100`, `100.5`, `-0.25`.
impl<const D: u8> fmt::Display for FixedDecimal<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let int_part = self.integer_part().unsigned_abs();
        let frac_part = self.fractional_part();

        if D == 0 || frac_part == 0 {
            return write!(f, "{}{}", sign, int_part);
        }

        let digits = format!("{:0>width$}", frac_part, width = D as usize);
        write!(f, "{}{}.{}", sign, int_part, digits.trim_end_matches('0'))
    }
}

// ============================================================================
// rust_decimal conversions (API boundaries: fee rates, external input)
// ============================================================================

impl<const D: u8> FixedDecimal<D> {
    /// Convert from `rust_decimal::Decimal`, refusing to drop significant digits.
    pub fn from_decimal(d: rust_decimal::Decimal) -> NumericResult<Self> {
        use rust_decimal::prelude::ToPrimitive;

        let scaled = d
            .checked_mul(rust_decimal::Decimal::from(Self::SCALE))
            .ok_or(NumericError::Overflow)?;
        if scaled.fract() != rust_decimal::Decimal::ZERO {
            return Err(NumericError::PrecisionLoss);
        }
        scaled.to_i64().map(Self).ok_or(NumericError::Overflow)
    }

    /// Convert from `rust_decimal::Decimal`, rounding half away from zero to
    /// `DECIMALS` places, the same rounding as [`FixedDecimal::checked_mul`].
    pub fn from_decimal_rounded(d: rust_decimal::Decimal) -> NumericResult<Self> {
        Self::from_decimal(
            d.round_dp_with_strategy(D as u32, rust_decimal::RoundingStrategy::MidpointAwayFromZero),
        )
    }

    pub fn to_decimal(self) -> rust_decimal::Decimal {
        rust_decimal::Decimal::new(self.0, D as u32)
    }
}

impl<const D: u8> FromStr for FixedDecimal<D> {
    type Err = NumericError;

    /// Parse `"123"`, `"123.45"` or `"-0.001"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (negative, body) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        if body.is_empty() {
            return Err(NumericError::InvalidInput);
        }

        let (int_str, frac_str) = match body.split_once('.') {
            Some((int_str, frac_str)) => (int_str, frac_str),
            None => (body, ""),
        };
        if !int_str.chars().all(|c| c.is_ascii_digit())
            || !frac_str.chars().all(|c| c.is_ascii_digit())
        {
            return Err(NumericError::InvalidInput);
        }
        if frac_str.len() > D as usize {
            return Err(NumericError::PrecisionLoss);
        }

        let int_val: i64 = if int_str.is_empty() {
            0
        } else {
            int_str.parse().map_err(|_| NumericError::Overflow)?
        };
        let frac_val: u64 = if frac_str.is_empty() {
            0
        } else {
            format!("{:0<width$}", frac_str, width = D as usize)
                .parse()
                .map_err(|_| NumericError::InvalidInput)?
        };

        let magnitude = Self::from_parts(int_val, frac_val)?;
        if negative {
            Self::ZERO.checked_sub(magnitude)
        } else {
            Ok(magnitude)
        }
    }
}

#[cfg(feature = "serde")]
impl<const D: u8> serde::Serialize for FixedDecimal<D> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(feature = "serde")]
impl<'de, const D: u8> serde::Deserialize<'de> for FixedDecimal<D> {
    fn deserialize<De: serde::Deserializer<'de>>(deserializer: De) -> Result<Self, De::Error> {
        let raw = <String as serde::Deserialize>::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Limit price, nine decimal places
pub type Price = FixedDecimal<9>;

/// Order quantity, nine decimal places
pub type Quantity = FixedDecimal<9>;

#[cfg(test)]
mod tests {
    use super::*;

    type FD9 = FixedDecimal<9>;

    #[test]
    fn test_from_integer_and_parts() {
        let x = FD9::from_integer(100).unwrap();
        assert_eq!(x.raw_value(), 100_000_000_000);

        let y = FD9::from_parts(123, 456_000_000).unwrap();
        assert_eq!(y.integer_part(), 123);
        assert_eq!(y.fractional_part(), 456_000_000);

        assert_eq!(
            FD9::from_parts(1, 1_000_000_000),
            Err(NumericError::InvalidInput)
        );
    }

    #[test]
    fn test_checked_arithmetic() {
        let a = FD9::from_integer(100).unwrap();
        let b = FD9::from_integer(30).unwrap();
        assert_eq!(a.checked_sub(b).unwrap(), FD9::from_integer(70).unwrap());
        assert_eq!(a.checked_add(b).unwrap(), FD9::from_integer(130).unwrap());
        assert_eq!(FD9::MAX.checked_add(FD9::ONE), Err(NumericError::Overflow));
    }

    #[test]
    fn test_checked_mul_rounds_half_up() {
        let third = FD9::from_raw(333_333_333);
        let three = FD9::from_integer(3).unwrap();
        assert_eq!(third.checked_mul(three).unwrap().raw_value(), 999_999_999);

        let x = FD9::from_parts(1, 500_000_000).unwrap();
        assert_eq!(x.checked_mul(x).unwrap(), "2.25".parse().unwrap());

        let large = FD9::from_integer(1_000_000_000).unwrap();
        assert_eq!(large.checked_mul(large), Err(NumericError::Overflow));
    }

    #[test]
    fn test_is_multiple_of() {
        let tick: FD9 = "0.01".parse().unwrap();
        assert!("100.25".parse::<FD9>().unwrap().is_multiple_of(tick).unwrap());
        assert!(!"100.255".parse::<FD9>().unwrap().is_multiple_of(tick).unwrap());
        assert_eq!(
            FD9::ONE.is_multiple_of(FD9::ZERO),
            Err(NumericError::DivisionByZero)
        );
    }

    #[test]
    fn test_display_is_shortest_exact_form() {
        assert_eq!(FD9::from_integer(100).unwrap().to_string(), "100");
        assert_eq!("100.50".parse::<FD9>().unwrap().to_string(), "100.5");
        assert_eq!("-0.25".parse::<FD9>().unwrap().to_string(), "-0.25");
        assert_eq!(FD9::ZERO.to_string(), "0");
    }

    #[test]
    fn test_from_str_rejects_garbage() {
        assert_eq!("abc".parse::<FD9>(), Err(NumericError::InvalidInput));
        assert_eq!("".parse::<FD9>(), Err(NumericError::InvalidInput));
        assert_eq!("1.2.3".parse::<FD9>(), Err(NumericError::InvalidInput));
        assert_eq!(
            "1.1234567890".parse::<FD9>(),
            Err(NumericError::PrecisionLoss)
        );
    }

    #[test]
    fn test_decimal_conversions() {
        use rust_decimal::Decimal;

        let x = FD9::from_decimal(Decimal::new(12345, 2)).unwrap();
        assert_eq!(x, "123.45".parse().unwrap());
        assert_eq!(x.to_decimal(), Decimal::new(12345, 2));
        assert_eq!(
            FD9::from_decimal(Decimal::new(1, 12)),
            Err(NumericError::PrecisionLoss)
        );
    }

    #[test]
    fn test_checked_sum() {
        let values = vec![FD9::ONE, FD9::from_integer(2).unwrap()];
        assert_eq!(FD9::checked_sum(values).unwrap(), FD9::from_integer(3).unwrap());
        assert_eq!(
            FD9::checked_sum(vec![FD9::MAX, FD9::ONE]),
            Err(NumericError::Overflow)
        );
    }
}
