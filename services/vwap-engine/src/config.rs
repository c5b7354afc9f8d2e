//! Engine configuration
//!
//! The window capacity is the only option the core recognizes. Everything
//! else here configures the process around it and is read from environment
//! variables with defaults.

use std::num::IntErrorKind;

use serde::{Deserialize, Serialize};
use tracing::warn;
use types::ids::InstrumentId;

/// Maximum number of trades retained per window.
pub const MAX_WINDOW_SIZE: usize = 200;

/// Default endpoint of the public trade feed.
pub const DEFAULT_FEED_ENDPOINT: &str = "wss://ws-feed.exchange.coinbase.com";

/// Default instruments subscribed to when `TRADING_PAIRS` is unset.
pub const DEFAULT_TRADING_PAIRS: &str = "BTC-USD ETH-USD ETH-BTC";

/// Default depth of the input and output channels.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Errors raised while loading configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },

    #[error("no trading pairs configured")]
    NoInstruments,
}

/// Which trades compete for the window's slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionScope {
    /// Every instrument keeps its own `capacity` most recent trades.
    #[default]
    PerInstrument,
    /// The `capacity` most recent trades across the whole feed; pushing a
    /// trade evicts the globally oldest one, whatever its instrument.
    Feed,
}

impl EvictionScope {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "instrument" | "per_instrument" => Some(EvictionScope::PerInstrument),
            "feed" => Some(EvictionScope::Feed),
            _ => None,
        }
    }
}

/// Window sizing, fixed at aggregator construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowConfig {
    capacity: usize,
    scope: EvictionScope,
}

impl WindowConfig {
    /// Build a per-instrument window config.
    ///
    /// Zero, or anything above [`MAX_WINDOW_SIZE`], clamps to
    /// [`MAX_WINDOW_SIZE`]. This never fails.
    pub fn new(capacity: usize) -> Self {
        Self::with_scope(capacity, EvictionScope::PerInstrument)
    }

    pub fn with_scope(capacity: usize, scope: EvictionScope) -> Self {
        let clamped = if capacity == 0 || capacity > MAX_WINDOW_SIZE {
            MAX_WINDOW_SIZE
        } else {
            capacity
        };
        if clamped != capacity {
            warn!(
                requested = capacity,
                capacity = clamped,
                "Window capacity out of range, clamped"
            );
        }
        Self {
            capacity: clamped,
            scope,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn scope(&self) -> EvictionScope {
        self.scope
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self::new(MAX_WINDOW_SIZE)
    }
}

/// Process-level configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub window: WindowConfig,
    /// Instruments to subscribe to on the feed.
    pub instruments: Vec<InstrumentId>,
    /// Bound of the pipeline's input and output channels.
    pub channel_capacity: usize,
    pub feed_endpoint: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            window: WindowConfig::default(),
            instruments: parse_instruments(DEFAULT_TRADING_PAIRS),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            feed_endpoint: DEFAULT_FEED_ENDPOINT.to_string(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from the process environment.
    ///
    /// Recognized variables: `WINDOW_SIZE`, `WINDOW_SCOPE`, `TRADING_PAIRS`,
    /// `CHANNEL_CAPACITY`, `WEBSOCKET_ENDPOINT`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let capacity = match lookup("WINDOW_SIZE") {
            Some(raw) => parse_window_size(&raw)?,
            None => MAX_WINDOW_SIZE,
        };

        let scope = match lookup("WINDOW_SCOPE") {
            Some(raw) => EvictionScope::parse(&raw).ok_or(ConfigError::InvalidValue {
                key: "WINDOW_SCOPE",
                value: raw,
            })?,
            None => EvictionScope::default(),
        };

        let instruments = match lookup("TRADING_PAIRS") {
            Some(raw) => parse_instruments(&raw),
            None => defaults.instruments,
        };
        if instruments.is_empty() {
            return Err(ConfigError::NoInstruments);
        }

        let channel_capacity = match lookup("CHANNEL_CAPACITY") {
            Some(raw) => match parse_usize("CHANNEL_CAPACITY", &raw)? {
                // tokio's bounded channels reject a zero capacity
                0 => {
                    return Err(ConfigError::InvalidValue {
                        key: "CHANNEL_CAPACITY",
                        value: raw,
                    })
                }
                n => n,
            },
            None => defaults.channel_capacity,
        };

        let feed_endpoint = lookup("WEBSOCKET_ENDPOINT").unwrap_or(defaults.feed_endpoint);

        Ok(Self {
            window: WindowConfig::with_scope(capacity, scope),
            instruments,
            channel_capacity,
            feed_endpoint,
        })
    }
}

fn parse_usize(key: &'static str, raw: &str) -> Result<usize, ConfigError> {
    raw.trim().parse::<usize>().map_err(|_| ConfigError::InvalidValue {
        key,
        value: raw.to_string(),
    })
}

/// Any integer above the ceiling clamps, including ones too wide for `usize`.
fn parse_window_size(raw: &str) -> Result<usize, ConfigError> {
    match raw.trim().parse::<usize>() {
        Ok(n) => Ok(n),
        Err(e) if *e.kind() == IntErrorKind::PosOverflow => Ok(usize::MAX),
        Err(_) => Err(ConfigError::InvalidValue {
            key: "WINDOW_SIZE",
            value: raw.to_string(),
        }),
    }
}

fn parse_instruments(raw: &str) -> Vec<InstrumentId> {
    raw.split_whitespace()
        .filter_map(|s| InstrumentId::try_new(s).ok())
        .collect()
}
