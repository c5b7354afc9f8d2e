//! Fixed-point decimal types for prices and volumes
//!
//! Uses rust_decimal for deterministic arithmetic (no floating-point errors).
//! Running sums over thousands of trades must not drift, so binary floats
//! never appear in a price or a volume.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::TypeError;

/// Trade price. Never negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Price(Decimal);

impl Price {
    /// Create a price, rejecting negative values.
    pub fn try_new(value: Decimal) -> Result<Self, TypeError> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(TypeError::NegativePrice(value.to_string()));
        }
        Ok(Self(value))
    }

    pub fn from_u64(value: u64) -> Self {
        Self(Decimal::from(value))
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Price {
    type Error = TypeError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::try_new(value)
    }
}

impl From<Price> for Decimal {
    fn from(price: Price) -> Self {
        price.0
    }
}

impl FromStr for Price {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = Decimal::from_str(s.trim())
            .map_err(|_| TypeError::InvalidDecimal(s.to_string()))?;
        Self::try_new(value)
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Traded volume (base asset size). Never negative; zero is allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Volume(Decimal);

impl Volume {
    /// Create a volume, rejecting negative values.
    pub fn try_new(value: Decimal) -> Result<Self, TypeError> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(TypeError::NegativeVolume(value.to_string()));
        }
        Ok(Self(value))
    }

    pub fn from_u64(value: u64) -> Self {
        Self(Decimal::from(value))
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Volume {
    type Error = TypeError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::try_new(value)
    }
}

impl From<Volume> for Decimal {
    fn from(volume: Volume) -> Self {
        volume.0
    }
}

impl FromStr for Volume {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = Decimal::from_str(s.trim())
            .map_err(|_| TypeError::InvalidDecimal(s.to_string()))?;
        Self::try_new(value)
    }
}

impl fmt::Display for Volume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_price_display_parses_back(mantissa in 0i64..i64::MAX, scale in 0u32..12) {
            let price = Price::try_new(Decimal::new(mantissa, scale)).unwrap();
            prop_assert_eq!(price.to_string().parse::<Price>().unwrap(), price);
        }

        #[test]
        fn prop_volume_sign_decides_validity(
            mantissa in i64::MIN + 1..i64::MAX,
            scale in 0u32..12,
        ) {
            let value = Decimal::new(mantissa, scale);
            prop_assert_eq!(Volume::try_new(value).is_ok(), mantissa >= 0);
            let json = format!("\"{}\"", value);
            prop_assert_eq!(serde_json::from_str::<Volume>(&json).is_ok(), mantissa >= 0);
        }
    }
}
