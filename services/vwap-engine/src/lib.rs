//! VWAP Engine
//!
//! Computes a running Volume-Weighted Average Price per instrument from a
//! live trade feed, over the most recent N trades of each instrument:
//! - Sequence guard dropping out-of-order and replayed feed messages
//! - Bounded per-instrument windows with O(1) running sums
//! - Streaming pipeline with cancellation
//! - Feed message codec and environment configuration
//!
//! # Architecture
//!
//! ```text
//!   Feed (external)
//!        │  SequencedTrade
//!   ┌────▼────┐
//!   │ Guard   │  ← drops sequence < last accepted
//!   └────┬────┘
//!        │  TradeEvent
//!   ┌────▼────┐
//!   │ Window  │  ← evict oldest, append, recompute VWAP
//!   └────┬────┘
//!        │  VwapResult
//!   Consumer (external)
//! ```

pub mod config;
pub mod feed;
pub mod metrics;
pub mod pipeline;
pub mod sequencer;
pub mod window;

pub use config::{EngineConfig, EvictionScope, WindowConfig, MAX_WINDOW_SIZE};
pub use pipeline::{Pipeline, PipelineSummary, StopReason};
pub use sequencer::{Admission, SequenceGuard};
pub use window::{WindowAggregator, WindowError, WindowSnapshot};

// Library version
pub const SERVICE_VERSION: &str = "0.1.0";
