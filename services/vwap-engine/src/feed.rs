//! Feed message codec
//!
//! Boundary of the external market-data feed. The transport (dial,
//! handshake, reconnect) lives outside this crate; this module only knows
//! the JSON shapes of the `matches` channel and how to turn them into
//! sequenced trades.
//!
//! Flow: send [`SubscribeRequest`] → receive `subscriptions` ack → receive
//! `last_match` then a stream of `match` messages.

use std::io::BufRead;
use std::thread;

use serde::{Deserialize, Deserializer, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use types::ids::{InstrumentId, Sequence};
use types::numeric::{Price, Volume};
use types::trade::{SequencedTrade, TradeEvent};

/// Errors at the feed boundary.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("subscription requires at least one instrument")]
    NoInstruments,

    #[error("malformed feed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("feed reported an error: {0}")]
    Rejected(String),

    #[error("feed read failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    Subscribe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelType {
    Matches,
}

/// Subscription request for the `matches` channel.
///
/// Product IDs sit in the root object, which subscribes every listed
/// channel to all of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeRequest {
    #[serde(rename = "type")]
    pub request_type: RequestType,
    pub product_ids: Vec<InstrumentId>,
    pub channels: Vec<ChannelType>,
}

impl SubscribeRequest {
    pub fn matches(instruments: &[InstrumentId]) -> Result<Self, FeedError> {
        if instruments.is_empty() {
            return Err(FeedError::NoInstruments);
        }
        Ok(Self {
            request_type: RequestType::Subscribe,
            product_ids: instruments.to_vec(),
            channels: vec![ChannelType::Matches],
        })
    }
}

/// One channel entry in a `subscriptions` acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChannelSubscription {
    pub name: String,
    #[serde(default)]
    pub product_ids: Vec<InstrumentId>,
}

/// Payload of `match` and `last_match` messages. Unused fields are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MatchMessage {
    #[serde(deserialize_with = "integer_sequence")]
    pub sequence: Sequence,
    pub product_id: InstrumentId,
    pub size: Volume,
    pub price: Price,
}

/// Sequence from a JSON integer of any width, or from its decimal string.
///
/// serde_json's `arbitrary_precision` keeps the literal digits of numbers
/// past `u64::MAX`, which are parsed straight into a `u128`.
fn integer_sequence<'de, D>(deserializer: D) -> Result<Sequence, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let digits = match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => s,
        other => return Err(D::Error::custom(format!("invalid sequence: {}", other))),
    };
    digits.parse().map_err(D::Error::custom)
}

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedMessage {
    Subscriptions {
        #[serde(default)]
        channels: Vec<ChannelSubscription>,
    },
    Error {
        #[serde(default)]
        message: String,
    },
    Match(MatchMessage),
    LastMatch(MatchMessage),
    #[serde(other)]
    Other,
}

impl FeedMessage {
    pub fn parse(json: &str) -> Result<Self, FeedError> {
        Ok(serde_json::from_str(json)?)
    }

    /// The trade carried by a `match`/`last_match`; `None` for anything else.
    pub fn into_trade(self) -> Option<SequencedTrade> {
        match self {
            FeedMessage::Match(m) | FeedMessage::LastMatch(m) => Some(SequencedTrade::new(
                m.sequence,
                TradeEvent::new(m.product_id, m.price, m.size),
            )),
            _ => None,
        }
    }
}

/// Decode one line of feed JSON.
///
/// Returns `Ok(None)` for messages that carry no trade. An `error` message
/// from the feed is surfaced as [`FeedError::Rejected`].
pub fn decode_line(line: &str) -> Result<Option<SequencedTrade>, FeedError> {
    match FeedMessage::parse(line)? {
        FeedMessage::Error { message } => Err(FeedError::Rejected(message)),
        FeedMessage::Subscriptions { channels } => {
            info!(channels = channels.len(), "Feed subscription acknowledged");
            Ok(None)
        }
        msg => Ok(msg.into_trade()),
    }
}

/// Counters from a finished [`forward_lines`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedSummary {
    pub lines: u64,
    pub trades: u64,
}

/// Count one raw line and decode it. Blank lines carry no trade.
fn next_trade(line: &str, summary: &mut FeedSummary) -> Result<Option<SequencedTrade>, FeedError> {
    summary.lines += 1;
    if line.trim().is_empty() {
        return Ok(None);
    }
    decode_line(line).map_err(|e| {
        warn!(error = %e, line = summary.lines, "Feed decode failed, closing input");
        e
    })
}

/// Read newline-delimited feed JSON and forward trades to the pipeline.
///
/// Stops on end of input, cancellation, or when the pipeline hangs up. A
/// read or decode failure also ends the stream: the sender is dropped so
/// the pipeline sees end of input, and the error is returned. Blank lines
/// are skipped.
pub async fn forward_lines<R>(
    reader: R,
    sender: mpsc::Sender<SequencedTrade>,
    cancel: CancellationToken,
) -> Result<FeedSummary, FeedError>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut summary = FeedSummary::default();

    loop {
        let line = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Feed read failed, closing input");
                return Err(e.into());
            }
        };

        let Some(trade) = next_trade(&line, &mut summary)? else {
            continue;
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            sent = sender.send(trade) => {
                if sent.is_err() {
                    debug!("Pipeline closed its input, stopping feed");
                    break;
                }
                summary.trades += 1;
            }
        }
    }

    Ok(summary)
}

/// Forward feed lines from a blocking reader on a dedicated OS thread.
///
/// Meant for sources such as the process's stdin, where a pending read
/// cannot be interrupted. The thread checks `cancel` between lines and
/// stops once the pipeline closes its input. A read parked on an idle
/// source keeps only this thread alive, never the async runtime. Ends the
/// stream under the same rules as [`forward_lines`].
pub fn spawn_line_reader<R>(
    reader: R,
    sender: mpsc::Sender<SequencedTrade>,
    cancel: CancellationToken,
) -> Result<thread::JoinHandle<Result<FeedSummary, FeedError>>, FeedError>
where
    R: BufRead + Send + 'static,
{
    let handle = thread::Builder::new()
        .name("feed-reader".to_string())
        .spawn(move || read_lines_blocking(reader, sender, cancel))?;
    Ok(handle)
}

fn read_lines_blocking<R: BufRead>(
    reader: R,
    sender: mpsc::Sender<SequencedTrade>,
    cancel: CancellationToken,
) -> Result<FeedSummary, FeedError> {
    let mut summary = FeedSummary::default();

    for line in reader.lines() {
        if cancel.is_cancelled() {
            break;
        }
        let line = line.map_err(|e| {
            warn!(error = %e, "Feed read failed, closing input");
            e
        })?;

        let Some(trade) = next_trade(&line, &mut summary)? else {
            continue;
        };
        if sender.blocking_send(trade).is_err() {
            debug!("Pipeline closed its input, stopping feed");
            break;
        }
        summary.trades += 1;
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MATCH: &str = concat!(
        r#"{"type":"match","trade_id":10,"sequence":50,"#,
        r#""maker_order_id":"ac928c66-ca53-498f-9c13-a110027a60e8","#,
        r#""taker_order_id":"132fb6ae-456b-4654-b4e0-d681ac05cea1","#,
        r#""time":"2014-11-07T08:19:27.028459Z","product_id":"BTC-USD","#,
        r#""size":"5.23512","price":"400.23","side":"sell"}"#
    );

    #[test]
    fn test_subscribe_request_json() {
        let instruments = [InstrumentId::new("BTC-USD"), InstrumentId::new("ETH-USD")];
        let req = SubscribeRequest::matches(&instruments).unwrap();
        let json = serde_json::to_string(&req).unwrap();
        assert_eq!(
            json,
            r#"{"type":"subscribe","product_ids":["BTC-USD","ETH-USD"],"channels":["matches"]}"#
        );
    }

    #[test]
    fn test_subscribe_requires_instruments() {
        assert!(matches!(SubscribeRequest::matches(&[]), Err(FeedError::NoInstruments)));
    }

    #[test]
    fn test_decode_match() {
        let trade = decode_line(MATCH).unwrap().unwrap();
        assert_eq!(trade.sequence, Sequence::from(50u64));
        assert_eq!(trade.trade.instrument.as_str(), "BTC-USD");
        assert_eq!(trade.trade.price.to_string(), "400.23");
        assert_eq!(trade.trade.volume.to_string(), "5.23512");
    }

    fn with_sequence(raw: &str) -> String {
        MATCH.replace(r#""sequence":50"#, &format!(r#""sequence":{}"#, raw))
    }

    #[test]
    fn test_decode_sequence_wider_than_u64() {
        // 2^65
        let trade = decode_line(&with_sequence("36893488147419103232")).unwrap().unwrap();
        assert_eq!(trade.sequence, Sequence::new(1u128 << 65));
        assert!(trade.sequence > Sequence::from(u64::MAX));
    }

    #[test]
    fn test_decode_sequence_as_string() {
        let trade = decode_line(&with_sequence(r#""36893488147419103232""#)).unwrap().unwrap();
        assert_eq!(trade.sequence, Sequence::new(1u128 << 65));
    }

    #[test]
    fn test_decode_rejects_non_integer_sequence() {
        for bad in ["-1", "1.5", "null", "[1]"] {
            let result = decode_line(&with_sequence(bad));
            assert!(matches!(result, Err(FeedError::Malformed(_))), "{}", bad);
        }
    }

    #[test]
    fn test_decode_rejects_blank_product() {
        let line = MATCH.replace(r#""product_id":"BTC-USD""#, r#""product_id":"""#);
        assert!(matches!(decode_line(&line), Err(FeedError::Malformed(_))));
    }

    #[test]
    fn test_decode_last_match() {
        let line = MATCH.replace(r#""type":"match""#, r#""type":"last_match""#);
        assert!(decode_line(&line).unwrap().is_some());
    }

    #[test]
    fn test_subscriptions_ack_carries_no_trade() {
        let line = concat!(
            r#"{"type":"subscriptions","#,
            r#""channels":[{"name":"matches","product_ids":["BTC-USD"]}]}"#
        );
        assert_eq!(decode_line(line).unwrap(), None);

        match FeedMessage::parse(line).unwrap() {
            FeedMessage::Subscriptions { channels } => {
                assert_eq!(channels[0].name, "matches");
                assert_eq!(channels[0].product_ids, vec![InstrumentId::new("BTC-USD")]);
            }
            other => panic!("Expected Subscriptions, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_is_ignored() {
        assert_eq!(decode_line(r#"{"type":"heartbeat","sequence":90}"#).unwrap(), None);
    }

    #[test]
    fn test_feed_error_message() {
        let err = decode_line(r#"{"type":"error","message":"Failed to subscribe"}"#).unwrap_err();
        match err {
            FeedError::Rejected(msg) => assert_eq!(msg, "Failed to subscribe"),
            err => panic!("Expected Rejected, got {:?}", err),
        }
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(decode_line("{not json"), Err(FeedError::Malformed(_))));
        // Negative size is not a valid volume
        let line = MATCH.replace(r#""size":"5.23512""#, r#""size":"-1""#);
        assert!(matches!(decode_line(&line), Err(FeedError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_forward_lines_until_eof() {
        let second = MATCH.replace(r#""sequence":50"#, r#""sequence":51"#);
        let input = format!(
            "{}\n\n{}\n{}\n",
            r#"{"type":"subscriptions","channels":[]}"#,
            MATCH,
            second
        );
        let (tx, mut rx) = mpsc::channel(8);

        let summary = forward_lines(input.as_bytes(), tx, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary, FeedSummary { lines: 4, trades: 2 });
        assert_eq!(rx.recv().await.unwrap().sequence, Sequence::from(50u64));
        assert_eq!(rx.recv().await.unwrap().sequence, Sequence::from(51u64));
        // Sender dropped: the pipeline sees end of input
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_forward_lines_stops_on_garbage() {
        let input = format!("{}\ngarbage\n{}\n", MATCH, MATCH);
        let (tx, mut rx) = mpsc::channel(8);

        let result = forward_lines(input.as_bytes(), tx, CancellationToken::new()).await;

        assert!(matches!(result, Err(FeedError::Malformed(_))));
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_forward_lines_cancelled() {
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let summary = forward_lines(MATCH.as_bytes(), tx, cancel).await.unwrap();

        assert_eq!(summary.trades, 0);
        assert!(rx.recv().await.is_none());
    }

    fn two_matches() -> String {
        let second = MATCH.replace(r#""sequence":50"#, r#""sequence":51"#);
        format!("{}\n\n{}\n", MATCH, second)
    }

    #[test]
    fn test_line_reader_forwards_until_eof() {
        let (tx, mut rx) = mpsc::channel(8);

        let reader = std::io::Cursor::new(two_matches());
        let handle = spawn_line_reader(reader, tx, CancellationToken::new()).unwrap();
        let summary = handle.join().unwrap().unwrap();

        assert_eq!(summary, FeedSummary { lines: 3, trades: 2 });
        assert_eq!(rx.blocking_recv().unwrap().sequence, Sequence::from(50u64));
        assert_eq!(rx.blocking_recv().unwrap().sequence, Sequence::from(51u64));
        assert!(rx.blocking_recv().is_none());
    }

    #[test]
    fn test_line_reader_stops_when_pipeline_hangs_up() {
        let (tx, rx) = mpsc::channel(8);
        drop(rx);

        let reader = std::io::Cursor::new(two_matches());
        let handle = spawn_line_reader(reader, tx, CancellationToken::new()).unwrap();
        let summary = handle.join().unwrap().unwrap();

        assert_eq!(summary, FeedSummary { lines: 1, trades: 0 });
    }

    #[test]
    fn test_line_reader_stops_on_garbage() {
        let (tx, mut rx) = mpsc::channel(8);

        let reader = std::io::Cursor::new(format!("{}\ngarbage\n", MATCH));
        let handle = spawn_line_reader(reader, tx, CancellationToken::new()).unwrap();

        assert!(matches!(handle.join().unwrap(), Err(FeedError::Malformed(_))));
        assert!(rx.blocking_recv().is_some());
        assert!(rx.blocking_recv().is_none());
    }

    /// Reader parked until its release handle is dropped, like an idle stdin.
    struct Idle(std::sync::mpsc::Receiver<()>);

    impl std::io::Read for Idle {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            let _ = self.0.recv();
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_idle_reader_does_not_block_shutdown() {
        use std::sync::Arc;
        use std::time::Duration;

        use crate::{Pipeline, SequenceGuard, StopReason, WindowAggregator};

        let (release, parked) = std::sync::mpsc::channel::<()>();
        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let reader = std::io::BufReader::new(Idle(parked));
        let feed = spawn_line_reader(reader, tx, cancel.clone()).unwrap();
        let pipeline = Pipeline::new(
            Arc::new(SequenceGuard::new()),
            Arc::new(WindowAggregator::with_capacity(4)),
        );
        let (mut results, task) = pipeline.spawn(rx, cancel.clone(), 8);

        cancel.cancel();
        let summary = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("pipeline must stop while the reader is parked")
            .unwrap();
        assert_eq!(summary.stop_reason, StopReason::Cancelled);
        assert!(results.recv().await.is_none());
        assert!(!feed.is_finished());

        // Unparked, the reader hits end of input and exits cleanly
        drop(release);
        assert_eq!(feed.join().unwrap().unwrap().trades, 0);
    }
}
