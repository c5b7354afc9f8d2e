//! Sequence guard for the feed
//!
//! Drops messages that arrive out of order or replay an older sequence,
//! tracked independently per instrument.
//!
//! Tie policy: a sequence equal to the last accepted one is admitted. The
//! first message for an instrument establishes its baseline and is always
//! admitted.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tracing::{debug, info};
use types::ids::{InstrumentId, Sequence};
use types::trade::SequencedTrade;

/// Outcome of presenting a message to the guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Message is in order; the instrument's baseline moved to its sequence.
    Accepted,
    /// Message is older than the instrument's baseline and was dropped.
    Rejected { last: Sequence },
}

impl Admission {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Admission::Accepted)
    }
}

/// Per-instrument monotonic sequence filter.
///
/// Each instrument's counter sits in its own map entry, so instruments in
/// different shards never contend. Admission for one instrument is atomic
/// with the counter update.
#[derive(Debug, Default)]
pub struct SequenceGuard {
    /// Last accepted sequence per instrument.
    last_accepted: DashMap<InstrumentId, Sequence>,
    /// Total messages admitted.
    accepted: AtomicU64,
    /// Total messages rejected as stale.
    rejected: AtomicU64,
}

impl SequenceGuard {
    pub fn new() -> Self {
        info!("SequenceGuard initialized");
        Self::default()
    }

    /// Admit or reject `sequence` for `instrument`.
    ///
    /// Rejection leaves the instrument's state untouched.
    pub fn admit(&self, instrument: &InstrumentId, sequence: Sequence) -> Admission {
        let admission = match self.last_accepted.get_mut(instrument) {
            Some(mut last) => Self::advance(&mut *last, sequence),
            None => {
                let mut last = self
                    .last_accepted
                    .entry(instrument.clone())
                    .or_insert(Sequence::MIN);
                Self::advance(&mut *last, sequence)
            }
        };

        match admission {
            Admission::Accepted => {
                self.accepted.fetch_add(1, Ordering::Relaxed);
            }
            Admission::Rejected { last } => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                debug!(
                    instrument = %instrument,
                    last_sequence = %last,
                    received_sequence = %sequence,
                    "Dropping out-of-order message"
                );
            }
        }

        admission
    }

    /// Admit a sequenced trade from the feed.
    pub fn admit_trade(&self, trade: &SequencedTrade) -> Admission {
        self.admit(trade.instrument(), trade.sequence)
    }

    /// Last accepted sequence for an instrument, if any message was seen.
    pub fn last_accepted(&self, instrument: &InstrumentId) -> Option<Sequence> {
        self.last_accepted.get(instrument).map(|s| *s)
    }

    /// Total messages admitted since creation.
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    /// Total messages rejected since creation.
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    fn advance(last: &mut Sequence, sequence: Sequence) -> Admission {
        if sequence < *last {
            return Admission::Rejected { last: *last };
        }
        *last = sequence;
        Admission::Accepted
    }
}
