//! Types library for the VWAP engine
//!
//! This library provides the value types shared by every crate in the
//! workspace: identifiers, decimal prices and volumes, trade events and
//! VWAP results.
//!
//! # Version
//! v1.0.0
//!
//! # Modules
//! - `ids`: Identifiers (InstrumentId, Sequence)
//! - `numeric`: Decimal newtypes (Price, Volume)
//! - `trade`: Trade events and VWAP results
//! - `errors`: Error taxonomy

// Public modules
pub mod ids;
pub mod numeric;
pub mod trade;
pub mod errors;

// Library version constant
pub const LIB_VERSION: &str = "1.0.0";

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::ids::*;
    pub use crate::numeric::*;
    pub use crate::trade::*;
    pub use crate::errors::*;
}
