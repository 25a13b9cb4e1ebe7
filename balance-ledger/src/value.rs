//! Numeric value types a ledger table can store
//!
//! A ledger is generic over its value type. The capability contract is small:
//! a column type for the schema, a zero sentinel for absent rows, a sign test,
//! and checked arithmetic for stores that compute in-process. Column encoding
//! and decoding come from sqlx.

use crate::error::{Error, Result};
use rust_decimal::Decimal;
use sqlx::Postgres;
use std::fmt::{Debug, Display};

/// A non-negative numeric value stored per key
pub trait LedgerValue:
    Copy
    + PartialOrd
    + Debug
    + Display
    + Send
    + Sync
    + Unpin
    + 'static
    + sqlx::Type<Postgres>
    + for<'q> sqlx::Encode<'q, Postgres>
    + for<'r> sqlx::Decode<'r, Postgres>
{
    /// SQL column type of the `value` column
    const COLUMN_TYPE: &'static str;

    /// Value reported for absent rows and empty tables
    fn zero() -> Self;

    /// True if strictly below zero
    fn is_negative(&self) -> bool;

    /// Checked addition, `None` on overflow
    fn checked_add(self, rhs: Self) -> Option<Self>;

    /// Checked subtraction, `None` on overflow
    fn checked_sub(self, rhs: Self) -> Option<Self>;

    /// True if the column holds this value exactly, without rounding or overflow
    fn fits_column(&self) -> bool {
        true
    }

    /// True if equal to zero
    fn is_zero(&self) -> bool {
        *self == Self::zero()
    }
}

/// Fractional digits kept by the decimal column
pub const DECIMAL_SCALE: u32 = 8;

/// Integer digits kept by the decimal column
pub const DECIMAL_INTEGER_DIGITS: u32 = 20;

/// Smallest magnitude the decimal column cannot hold, 10^20
fn decimal_bound() -> Decimal {
    Decimal::from_i128_with_scale(10_i128.pow(DECIMAL_INTEGER_DIGITS), 0)
}

impl LedgerValue for Decimal {
    // 20 integer digits, 8 fractional; fits the 96-bit mantissa
    const COLUMN_TYPE: &'static str = "NUMERIC(28, 8)";

    fn zero() -> Self {
        Decimal::ZERO
    }

    fn is_negative(&self) -> bool {
        *self < Decimal::ZERO
    }

    fn checked_add(self, rhs: Self) -> Option<Self> {
        Decimal::checked_add(self, rhs)
    }

    fn checked_sub(self, rhs: Self) -> Option<Self> {
        Decimal::checked_sub(self, rhs)
    }

    fn fits_column(&self) -> bool {
        self.normalize().scale() <= DECIMAL_SCALE && self.abs() < decimal_bound()
    }
}

impl LedgerValue for i64 {
    const COLUMN_TYPE: &'static str = "BIGINT";

    fn zero() -> Self {
        0
    }

    fn is_negative(&self) -> bool {
        *self < 0
    }

    fn checked_add(self, rhs: Self) -> Option<Self> {
        i64::checked_add(self, rhs)
    }

    fn checked_sub(self, rhs: Self) -> Option<Self> {
        i64::checked_sub(self, rhs)
    }
}

/// Reject amounts the store must not see: negative, or too precise to
/// store exactly
pub fn validate_amount<V: LedgerValue>(amount: &V) -> Result<()> {
    if amount.is_negative() {
        return Err(Error::InvalidArgument(format!("amount < 0: {}", amount)));
    }
    if !amount.fits_column() {
        return Err(Error::InvalidArgument(format!(
            "amount {} exceeds column type {}",
            amount,
            V::COLUMN_TYPE
        )));
    }
    Ok(())
}
