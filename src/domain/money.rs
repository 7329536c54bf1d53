//! Fixed-point money.
//! Amounts are held as integer minor units tagged with their currency.

use bigdecimal::{BigDecimal, ToPrimitive};
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MoneyError {
    #[error("amount must be greater than zero, got {0}")]
    NotPositive(String),

    #[error("amount {amount} has more than {exponent} decimal places")]
    TooPrecise { amount: String, exponent: u32 },

    #[error("amount {0} is out of range")]
    OutOfRange(String),

    #[error("invalid currency code: {0}")]
    InvalidCurrency(String),
}

/// ISO 4217 currency with the number of digits in its minor unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Currency {
    code: String,
    exponent: u32,
}

impl Currency {
    pub fn new(code: &str, exponent: u32) -> Result<Self, MoneyError> {
        let code = code.trim().to_ascii_uppercase();
        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(MoneyError::InvalidCurrency(code));
        }
        if exponent > 4 {
            return Err(MoneyError::InvalidCurrency(format!(
                "{} with exponent {}",
                code, exponent
            )));
        }
        Ok(Self { code, exponent })
    }

    /// Looks up the minor-unit exponent for well-known codes, defaulting to 2.
    pub fn from_code(code: &str) -> Result<Self, MoneyError> {
        let exponent = match code.trim().to_ascii_uppercase().as_str() {
            "JPY" | "KRW" | "VND" | "CLP" | "ISK" | "UGX" => 0,
            "BHD" | "KWD" | "OMR" | "JOD" | "TND" | "LYD" | "IQD" => 3,
            _ => 2,
        };
        Self::new(code, exponent)
    }

    pub fn zar() -> Self {
        Self {
            code: "ZAR".to_string(),
            exponent: 2,
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn exponent(&self) -> u32 {
        self.exponent
    }

    fn scale_factor(&self) -> i64 {
        10_i64.pow(self.exponent)
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.code)
    }
}

impl Serialize for Currency {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.code)
    }
}

/// An amount of money in integer minor units (cents for ZAR).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Money {
    minor: i64,
    currency: Currency,
}

impl Money {
    /// Builds a strictly positive amount from a decimal, rejecting anything
    /// finer than the currency's minor unit.
    pub fn from_decimal(amount: &BigDecimal, currency: Currency) -> Result<Self, MoneyError> {
        if *amount <= BigDecimal::from(0) {
            return Err(MoneyError::NotPositive(amount.to_string()));
        }
        Self::from_stored_decimal(amount, currency)
    }

    /// Like `from_decimal` but accepts zero and negative values. Used when
    /// reading persisted shares, which may legitimately be zero.
    pub fn from_stored_decimal(
        amount: &BigDecimal,
        currency: Currency,
    ) -> Result<Self, MoneyError> {
        let scaled = amount.clone() * BigDecimal::from(currency.scale_factor());
        let whole = scaled.with_scale(0);
        if whole != scaled {
            return Err(MoneyError::TooPrecise {
                amount: amount.to_string(),
                exponent: currency.exponent,
            });
        }

        let minor = whole
            .to_i64()
            .ok_or_else(|| MoneyError::OutOfRange(amount.to_string()))?;

        Ok(Self { minor, currency })
    }

    pub fn from_minor(minor: i64, currency: Currency) -> Self {
        Self { minor, currency }
    }

    pub fn zero(currency: Currency) -> Self {
        Self { minor: 0, currency }
    }

    pub fn minor(&self) -> i64 {
        self.minor
    }

    pub fn currency(&self) -> &Currency {
        &self.currency
    }

    pub fn is_zero(&self) -> bool {
        self.minor == 0
    }

    pub fn is_positive(&self) -> bool {
        self.minor > 0
    }

    /// None on currency mismatch or overflow.
    pub fn checked_add(&self, other: &Money) -> Option<Money> {
        if self.currency != other.currency {
            return None;
        }
        self.minor.checked_add(other.minor).map(|minor| Money {
            minor,
            currency: self.currency.clone(),
        })
    }

    pub fn checked_sub(&self, other: &Money) -> Option<Money> {
        if self.currency != other.currency {
            return None;
        }
        self.minor.checked_sub(other.minor).map(|minor| Money {
            minor,
            currency: self.currency.clone(),
        })
    }

    pub fn to_decimal(&self) -> BigDecimal {
        let value = BigDecimal::from(self.minor) / BigDecimal::from(self.currency.scale_factor());
        value.with_scale(self.currency.exponent as i64)
    }

    /// Plain decimal rendering without the currency code, e.g. `1498.20`.
    pub fn amount_string(&self) -> String {
        let exponent = self.currency.exponent as usize;
        let sign = if self.minor < 0 { "-" } else { "" };
        let abs = self.minor.unsigned_abs();
        if exponent == 0 {
            return format!("{}{}", sign, abs);
        }
        let factor = self.currency.scale_factor() as u64;
        format!(
            "{}{}.{:0width$}",
            sign,
            abs / factor,
            abs % factor,
            width = exponent
        )
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.currency.code, self.amount_string())
    }
}

impl Serialize for Money {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Money", 2)?;
        state.serialize_field("amount", &self.amount_string())?;
        state.serialize_field("currency", self.currency.code())?;
        state.end()
    }
}
