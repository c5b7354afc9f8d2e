//! Trade events and VWAP results
//!
//! A `TradeEvent` is produced by the feed collaborator and consumed once by
//! the sequence guard and, if admitted, once by the window aggregator.

use crate::ids::{InstrumentId, Sequence};
use crate::numeric::{Price, Volume};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A single executed trade as seen on the public feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeEvent {
    pub instrument: InstrumentId,
    pub price: Price,
    pub volume: Volume,
}

impl TradeEvent {
    pub fn new(instrument: InstrumentId, price: Price, volume: Volume) -> Self {
        Self {
            instrument,
            price,
            volume,
        }
    }

    /// Trade value (price × volume), or `None` if the product does not fit
    /// in a `Decimal`.
    pub fn notional(&self) -> Option<Decimal> {
        self.price.as_decimal().checked_mul(self.volume.as_decimal())
    }
}

/// A trade tagged with its feed-assigned sequence number.
///
/// The sequence is consumed by the sequence guard and never stored in
/// window state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequencedTrade {
    pub sequence: Sequence,
    pub trade: TradeEvent,
}

impl SequencedTrade {
    pub fn new(sequence: Sequence, trade: TradeEvent) -> Self {
        Self { sequence, trade }
    }

    pub fn instrument(&self) -> &InstrumentId {
        &self.trade.instrument
    }
}

/// VWAP emitted for one admitted trade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VwapResult {
    pub instrument: InstrumentId,
    pub vwap: Decimal,
}
