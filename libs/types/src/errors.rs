//! Error types for value construction
//!
//! Comprehensive error taxonomy using thiserror

use thiserror::Error;

/// Errors raised while building a value type from untrusted input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("Invalid instrument: {0:?}")]
    InvalidInstrument(String),

    #[error("Invalid decimal: {0}")]
    InvalidDecimal(String),

    #[error("Invalid sequence: {0}")]
    InvalidSequence(String),

    #[error("Negative price: {0}")]
    NegativePrice(String),

    #[error("Negative volume: {0}")]
    NegativeVolume(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_instrument_display() {
        let err = TypeError::InvalidInstrument(" ".to_string());
        assert_eq!(err.to_string(), "Invalid instrument: \" \"");
    }

    #[test]
    fn test_negative_volume_display() {
        let err = TypeError::NegativeVolume("-1.5".to_string());
        assert!(err.to_string().contains("-1.5"));
    }
}
