//! Sliding-window VWAP aggregation
//!
//! Keeps a bounded, oldest-first trade history per instrument together with
//! running Σ(price × volume) and Σ(volume), so every push costs O(1)
//! regardless of window size.
//!
//! VWAP values are rounded to [`VWAP_SCALE`] fractional digits (half away
//! from zero) and normalized. A window whose volume sums to zero reports a
//! VWAP of zero.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use dashmap::DashMap;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use types::ids::InstrumentId;
use types::trade::TradeEvent;

use crate::config::{EvictionScope, WindowConfig};

/// Fractional digits kept in a VWAP.
pub const VWAP_SCALE: u32 = 16;

/// Σ(price × volume) / Σ(volume), or zero when the volume sum is zero.
pub fn weighted_average(sum_price_volume: Decimal, sum_volume: Decimal) -> Decimal {
    if sum_volume.is_zero() {
        return Decimal::ZERO;
    }
    match sum_price_volume.checked_div(sum_volume) {
        Some(q) => q
            .round_dp_with_strategy(VWAP_SCALE, RoundingStrategy::MidpointAwayFromZero)
            .normalize(),
        None => {
            warn!(
                sum_price_volume = %sum_price_volume,
                sum_volume = %sum_volume,
                "VWAP division overflowed, reporting zero"
            );
            Decimal::ZERO
        }
    }
}

/// Errors from pushing into a window.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WindowError {
    #[error("running sums for {instrument} would overflow")]
    Overflow { instrument: InstrumentId },
}

/// Window state for one instrument.
#[derive(Debug, Clone)]
struct WindowState {
    /// Retained trades, oldest first.
    history: VecDeque<TradeEvent>,
    sum_price_volume: Decimal,
    sum_volume: Decimal,
    /// Cached Σpv / Σv of `history`.
    vwap: Decimal,
}

impl WindowState {
    fn new(capacity: usize) -> Self {
        Self {
            history: VecDeque::with_capacity(capacity),
            sum_price_volume: Decimal::ZERO,
            sum_volume: Decimal::ZERO,
            vwap: Decimal::ZERO,
        }
    }

    /// Running sums after optionally dropping the oldest trade and then
    /// appending `trade`; `None` if any step overflows.
    fn sums_after(&self, trade: &TradeEvent, evict_oldest: bool) -> Option<(Decimal, Decimal)> {
        let mut sum_price_volume = self.sum_price_volume;
        let mut sum_volume = self.sum_volume;
        if evict_oldest {
            if let Some(oldest) = self.history.front() {
                sum_price_volume = sum_price_volume.checked_sub(oldest.notional()?)?;
                sum_volume = sum_volume.checked_sub(oldest.volume.as_decimal())?;
            }
        }
        Some((
            sum_price_volume.checked_add(trade.notional()?)?,
            sum_volume.checked_add(trade.volume.as_decimal())?,
        ))
    }

    /// Append `trade`, first evicting the oldest trade if `evict_oldest` is set.
    ///
    /// All arithmetic happens before the first mutation, so on overflow the
    /// window is left exactly as it was.
    fn apply(
        &mut self,
        trade: TradeEvent,
        evict_oldest: bool,
    ) -> Result<Option<TradeEvent>, WindowError> {
        let (sum_price_volume, sum_volume) = self
            .sums_after(&trade, evict_oldest)
            .ok_or_else(|| WindowError::Overflow {
                instrument: trade.instrument.clone(),
            })?;

        let evicted = if evict_oldest {
            self.history.pop_front()
        } else {
            None
        };
        self.history.push_back(trade);
        self.sum_price_volume = sum_price_volume;
        self.sum_volume = sum_volume;
        self.vwap = weighted_average(sum_price_volume, sum_volume);
        Ok(evicted)
    }

    /// Drop the oldest trade on behalf of another instrument's push.
    fn evict_oldest(&mut self) -> Option<TradeEvent> {
        let oldest = self.history.pop_front()?;
        // Retained trades passed the overflow check in `apply`, so removing
        // one only shrinks the sums
        let notional = oldest.notional().unwrap_or_default();
        self.sum_price_volume = self.sum_price_volume.saturating_sub(notional);
        self.sum_volume = self.sum_volume.saturating_sub(oldest.volume.as_decimal());
        self.vwap = weighted_average(self.sum_price_volume, self.sum_volume);
        Some(oldest)
    }

    fn snapshot(&self, instrument: &InstrumentId) -> WindowSnapshot {
        WindowSnapshot {
            instrument: instrument.clone(),
            len: self.history.len(),
            sum_price_volume: self.sum_price_volume,
            sum_volume: self.sum_volume,
            vwap: self.vwap,
        }
    }
}

/// Point-in-time view of one instrument's window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSnapshot {
    pub instrument: InstrumentId,
    /// Number of trades currently retained.
    pub len: usize,
    pub sum_price_volume: Decimal,
    pub sum_volume: Decimal,
    pub vwap: Decimal,
}

/// Per-instrument sliding windows with incrementally maintained VWAP.
///
/// Each push runs under the instrument's shard lock, so a concurrent
/// [`vwap`](Self::vwap) read never sees a half-applied update. In
/// [`EvictionScope::Feed`] a feed-wide arrival queue additionally serializes
/// pushes.
#[derive(Debug)]
pub struct WindowAggregator {
    config: WindowConfig,
    windows: DashMap<InstrumentId, WindowState>,
    /// Arrival order across instruments; only used in `EvictionScope::Feed`.
    feed_order: Mutex<VecDeque<InstrumentId>>,
    /// Total trades pushed.
    pushes: AtomicU64,
    /// Total trades evicted.
    evictions: AtomicU64,
}

impl WindowAggregator {
    /// Create an aggregator with the given window configuration.
    pub fn new(config: WindowConfig) -> Self {
        info!(
            capacity = config.capacity(),
            scope = ?config.scope(),
            "WindowAggregator initialized"
        );

        let feed_capacity = match config.scope() {
            EvictionScope::Feed => config.capacity(),
            EvictionScope::PerInstrument => 0,
        };

        Self {
            config,
            windows: DashMap::new(),
            feed_order: Mutex::new(VecDeque::with_capacity(feed_capacity)),
            pushes: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Create a per-instrument aggregator, clamping `capacity` into range.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(WindowConfig::new(capacity))
    }

    /// Push an admitted trade into its instrument's window and return the
    /// instrument's new VWAP.
    ///
    /// Evicts the oldest trade first when the window is full, then appends
    /// and recomputes the VWAP. A trade whose value or running sums would
    /// overflow is dropped and leaves every window unchanged.
    pub fn push(&self, trade: TradeEvent) -> Result<Decimal, WindowError> {
        let instrument = trade.instrument.clone();
        let price = trade.price;
        let volume = trade.volume;

        let pushed = if trade.notional().is_none() {
            Err(WindowError::Overflow {
                instrument: instrument.clone(),
            })
        } else {
            match self.config.scope() {
                EvictionScope::PerInstrument => self.push_per_instrument(trade),
                EvictionScope::Feed => self.push_feed(trade),
            }
        };

        match pushed {
            Ok(vwap) => {
                self.pushes.fetch_add(1, Ordering::Relaxed);
                Ok(vwap)
            }
            Err(e) => {
                warn!(
                    instrument = %instrument,
                    price = %price,
                    volume = %volume,
                    error = %e,
                    "Dropping trade, window unchanged"
                );
                Err(e)
            }
        }
    }

    /// Current VWAP for `instrument`, zero if it has never been pushed.
    pub fn vwap(&self, instrument: &InstrumentId) -> Decimal {
        self.windows
            .get(instrument)
            .map(|w| w.vwap)
            .unwrap_or(Decimal::ZERO)
    }

    /// Snapshot of an instrument's window, if it has been pushed.
    pub fn snapshot(&self, instrument: &InstrumentId) -> Option<WindowSnapshot> {
        self.windows.get(instrument).map(|w| w.snapshot(instrument))
    }

    /// Retained trades for an instrument (oldest first).
    pub fn history(&self, instrument: &InstrumentId) -> Vec<TradeEvent> {
        self.windows
            .get(instrument)
            .map(|w| w.history.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of trades retained for an instrument.
    pub fn len(&self, instrument: &InstrumentId) -> usize {
        self.windows.get(instrument).map_or(0, |w| w.history.len())
    }

    /// Instruments observed so far, sorted.
    pub fn instruments(&self) -> Vec<InstrumentId> {
        let mut ids: Vec<InstrumentId> = self.windows.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity()
    }

    pub fn scope(&self) -> EvictionScope {
        self.config.scope()
    }

    /// Total trades pushed since creation.
    pub fn pushes(&self) -> u64 {
        self.pushes.load(Ordering::Relaxed)
    }

    /// Total trades evicted since creation.
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    fn push_per_instrument(&self, trade: TradeEvent) -> Result<Decimal, WindowError> {
        let capacity = self.config.capacity();
        let instrument = trade.instrument.clone();
        self.with_window(&instrument, |w| -> Result<_, WindowError> {
            let full = w.history.len() >= capacity;
            let evicted = w.apply(trade, full)?;
            Ok((evicted, w.vwap))
        })
        .map(|(evicted, vwap)| {
            if let Some(evicted) = evicted {
                self.record_eviction(&evicted);
            }
            vwap
        })
    }

    fn push_feed(&self, trade: TradeEvent) -> Result<Decimal, WindowError> {
        let mut order = self
            .feed_order
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let instrument = trade.instrument.clone();
        let evict_from = if order.len() >= self.config.capacity() {
            order.front().cloned()
        } else {
            None
        };

        let vwap = match &evict_from {
            // Same instrument: evict and append under one lock
            Some(from) if *from == instrument => {
                let (evicted, vwap) =
                    self.with_window(&instrument, |w| -> Result<_, WindowError> {
                        let evicted = w.apply(trade, true)?;
                        Ok((evicted, w.vwap))
                    })?;
                if let Some(evicted) = evicted {
                    self.record_eviction(&evicted);
                }
                vwap
            }
            Some(from) => {
                // Feed pushes are serialized by `order`, so the target
                // window cannot change between this check and the append
                self.check_append(&trade)?;
                if let Some(mut w) = self.windows.get_mut(from) {
                    if let Some(evicted) = w.evict_oldest() {
                        self.record_eviction(&evicted);
                    }
                }
                self.append(trade)?
            }
            None => self.append(trade)?,
        };

        if evict_from.is_some() {
            order.pop_front();
        }
        order.push_back(instrument);
        Ok(vwap)
    }

    fn append(&self, trade: TradeEvent) -> Result<Decimal, WindowError> {
        let instrument = trade.instrument.clone();
        self.with_window(&instrument, |w| -> Result<_, WindowError> {
            w.apply(trade, false)?;
            Ok(w.vwap)
        })
    }

    fn check_append(&self, trade: &TradeEvent) -> Result<(), WindowError> {
        let fits = match self.windows.get(&trade.instrument) {
            Some(w) => w.sums_after(trade, false).is_some(),
            None => trade.notional().is_some(),
        };
        if fits {
            Ok(())
        } else {
            Err(WindowError::Overflow {
                instrument: trade.instrument.clone(),
            })
        }
    }

    /// Run `f` on the instrument's window, creating it on first use.
    fn with_window<R>(
        &self,
        instrument: &InstrumentId,
        f: impl FnOnce(&mut WindowState) -> R,
    ) -> R {
        if let Some(mut w) = self.windows.get_mut(instrument) {
            return f(&mut *w);
        }
        let mut w = self
            .windows
            .entry(instrument.clone())
            .or_insert_with(|| WindowState::new(self.config.capacity()));
        f(&mut *w)
    }

    fn record_eviction(&self, evicted: &TradeEvent) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
        debug!(
            instrument = %evicted.instrument,
            price = %evicted.price,
            volume = %evicted.volume,
            "Evicted oldest trade from window"
        );
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;
    use types::numeric::{Price, Volume};

    fn arb_trade() -> impl Strategy<Value = (u8, u32, u32)> {
        (0u8..3, 1u32..100_000, 0u32..10_000)
    }

    fn build(instrument: u8, price_cents: u32, volume_milli: u32) -> TradeEvent {
        TradeEvent::new(
            InstrumentId::new(format!("I-{}", instrument)),
            Price::try_new(Decimal::new(price_cents as i64, 2)).unwrap(),
            Volume::try_new(Decimal::new(volume_milli as i64, 3)).unwrap(),
        )
    }

    fn check_invariants(agg: &WindowAggregator) -> Result<(), TestCaseError> {
        let mut total = 0;
        for id in agg.instruments() {
            let snap = agg.snapshot(&id).unwrap();
            let history = agg.history(&id);
            prop_assert!(snap.len <= agg.capacity());
            prop_assert_eq!(snap.len, history.len());

            let spv: Decimal = history.iter().filter_map(|t| t.notional()).sum();
            let sv: Decimal = history.iter().map(|t| t.volume.as_decimal()).sum();
            prop_assert_eq!(snap.sum_price_volume, spv);
            prop_assert_eq!(snap.sum_volume, sv);
            prop_assert_eq!(snap.vwap, weighted_average(spv, sv));
            total += snap.len;
        }
        if agg.scope() == EvictionScope::Feed {
            prop_assert!(total <= agg.capacity());
        }
        Ok(())
    }

    proptest! {
        #[test]
        fn prop_per_instrument_invariants(
            capacity in 1usize..8,
            trades in proptest::collection::vec(arb_trade(), 0..120),
        ) {
            let agg = WindowAggregator::with_capacity(capacity);
            for (i, p, v) in trades {
                agg.push(build(i, p, v)).unwrap();
                check_invariants(&agg)?;
            }
        }

        #[test]
        fn prop_feed_scope_invariants(
            capacity in 1usize..8,
            trades in proptest::collection::vec(arb_trade(), 0..120),
        ) {
            let config = WindowConfig::with_scope(capacity, EvictionScope::Feed);
            let agg = WindowAggregator::new(config);
            for (i, p, v) in trades {
                agg.push(build(i, p, v)).unwrap();
                check_invariants(&agg)?;
            }
        }

        #[test]
        fn prop_window_matches_tail_of_input(
            capacity in 1usize..8,
            trades in proptest::collection::vec(arb_trade(), 1..60),
        ) {
            let agg = WindowAggregator::with_capacity(capacity);
            let pushed: Vec<TradeEvent> =
                trades.into_iter().map(|(_, p, v)| build(0, p, v)).collect();
            for t in &pushed {
                agg.push(t.clone()).unwrap();
            }
            let id = InstrumentId::new("I-0");
            let start = pushed.len().saturating_sub(capacity);
            prop_assert_eq!(agg.history(&id), pushed[start..].to_vec());
        }
    }
}
