//! Identifier types for traded instruments and feed sequencing

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::TypeError;

/// Trading instrument identifier (e.g., "BTC-USD")
///
/// Any non-blank symbol is accepted; the feed decides the naming scheme.
/// Deserialization applies the same check as [`InstrumentId::try_new`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InstrumentId(String);

impl InstrumentId {
    /// Create a new InstrumentId from a string
    ///
    /// # Panics
    /// Panics if the symbol is empty or only whitespace
    pub fn new(symbol: impl Into<String>) -> Self {
        let s = symbol.into();
        assert!(!s.trim().is_empty(), "InstrumentId must not be blank");
        Self(s)
    }

    /// Try to create an InstrumentId, rejecting blank symbols
    pub fn try_new(symbol: impl Into<String>) -> Result<Self, TypeError> {
        let s = symbol.into();
        if s.trim().is_empty() {
            Err(TypeError::InvalidInstrument(s))
        } else {
            Ok(Self(s))
        }
    }

    /// Get the symbol string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstrumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for InstrumentId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl TryFrom<String> for InstrumentId {
    type Error = TypeError;

    fn try_from(symbol: String) -> Result<Self, Self::Error> {
        Self::try_new(symbol)
    }
}

impl From<InstrumentId> for String {
    fn from(id: InstrumentId) -> Self {
        id.0
    }
}

/// Feed-assigned sequence number.
///
/// Backed by `u128` so that counters wider than a machine word never wrap.
/// `Sequence::MIN` is the baseline every instrument starts from, which makes
/// the first message for an instrument always admissible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Sequence(u128);

impl Sequence {
    pub const MIN: Sequence = Sequence(u128::MIN);

    pub fn new(value: u128) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u128 {
        self.0
    }
}

impl From<u64> for Sequence {
    fn from(value: u64) -> Self {
        Self(u128::from(value))
    }
}

impl From<u128> for Sequence {
    fn from(value: u128) -> Self {
        Self(value)
    }
}

impl FromStr for Sequence {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u128>()
            .map(Self)
            .map_err(|_| TypeError::InvalidSequence(s.to_string()))
    }
}

// Feeds send sequences as JSON numbers; counters past u64 arrive as strings.
impl<'de> Deserialize<'de> for Sequence {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct SequenceVisitor;

        impl<'de> Visitor<'de> for SequenceVisitor {
            type Value = Sequence;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a non-negative integer or integer string")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Sequence, E> {
                Ok(Sequence::from(v))
            }

            fn visit_u128<E: de::Error>(self, v: u128) -> Result<Sequence, E> {
                Ok(Sequence(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Sequence, E> {
                u128::try_from(v)
                    .map(Sequence)
                    .map_err(|_| E::invalid_value(de::Unexpected::Signed(v), &self))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Sequence, E> {
                v.parse().map_err(|_| E::invalid_value(de::Unexpected::Str(v), &self))
            }
        }

        deserializer.deserialize_any(SequenceVisitor)
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
