//! Streaming VWAP pipeline
//!
//! Pulls sequenced trades from an input channel, filters them through the
//! [`SequenceGuard`], pushes admitted trades into the [`WindowAggregator`]
//! and emits one [`VwapResult`] per admitted trade.
//!
//! Events are handled strictly one at a time in arrival order. The loop
//! blocks only on receive and on send, and checks cancellation at both.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use types::trade::{SequencedTrade, VwapResult};

use crate::metrics::PipelineMetrics;
use crate::sequencer::SequenceGuard;
use crate::window::WindowAggregator;

/// Why the pipeline loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The producer closed the input channel.
    InputClosed,
    /// The cancellation token fired.
    Cancelled,
    /// The consumer dropped the output receiver.
    OutputClosed,
}

/// Counters for one [`Pipeline::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSummary {
    pub received: u64,
    pub admitted: u64,
    pub rejected: u64,
    pub emitted: u64,
    pub stop_reason: StopReason,
}

/// Sequence guard and window aggregator wired into one processing path.
///
/// Both collaborators are passed in, so several pipelines (or tests) never
/// share hidden state. The aggregator may be read concurrently through
/// [`aggregator`](Self::aggregator) while the pipeline runs.
#[derive(Clone)]
pub struct Pipeline {
    guard: Arc<SequenceGuard>,
    aggregator: Arc<WindowAggregator>,
    metrics: Arc<PipelineMetrics>,
}

impl Pipeline {
    pub fn new(guard: Arc<SequenceGuard>, aggregator: Arc<WindowAggregator>) -> Self {
        Self {
            guard,
            aggregator,
            metrics: Arc::new(PipelineMetrics::new()),
        }
    }

    pub fn guard(&self) -> &Arc<SequenceGuard> {
        &self.guard
    }

    pub fn aggregator(&self) -> &Arc<WindowAggregator> {
        &self.aggregator
    }

    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    /// Run one trade through guard and window.
    ///
    /// Returns the instrument's new VWAP, or `None` if the guard dropped
    /// the trade or the window could not absorb it.
    pub fn process(&self, message: SequencedTrade) -> Option<VwapResult> {
        let started = Instant::now();
        self.metrics.record_received();

        if !self.guard.admit_trade(&message).is_accepted() {
            self.metrics.record_rejected();
            return None;
        }

        let sequence = message.sequence;
        let instrument = message.trade.instrument.clone();
        let vwap = match self.aggregator.push(message.trade) {
            Ok(vwap) => vwap,
            Err(e) => {
                warn!(sequence = %sequence, error = %e, "Trade dropped by window");
                self.metrics.record_rejected();
                return None;
            }
        };

        self.metrics
            .record_admitted(started.elapsed().as_nanos().min(u128::from(u64::MAX)) as u64);

        Some(VwapResult { instrument, vwap })
    }

    /// Consume `input` until it closes, `cancel` fires, or the consumer of
    /// `output` goes away.
    ///
    /// `output` is dropped on return, which ends the consumer's receive
    /// loop. Nothing is sent once cancellation has been observed.
    pub async fn run(
        &self,
        mut input: mpsc::Receiver<SequencedTrade>,
        output: mpsc::Sender<VwapResult>,
        cancel: CancellationToken,
    ) -> PipelineSummary {
        info!(
            capacity = self.aggregator.capacity(),
            scope = ?self.aggregator.scope(),
            "Pipeline started"
        );

        let mut received = 0u64;
        let mut admitted = 0u64;
        let mut emitted = 0u64;

        let stop_reason = loop {
            let message = tokio::select! {
                biased;
                _ = cancel.cancelled() => break StopReason::Cancelled,
                message = input.recv() => match message {
                    Some(message) => message,
                    None => break StopReason::InputClosed,
                },
            };
            received += 1;

            let Some(result) = self.process(message) else {
                continue;
            };
            admitted += 1;

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break StopReason::Cancelled,
                sent = output.send(result) => {
                    if sent.is_err() {
                        break StopReason::OutputClosed;
                    }
                    emitted += 1;
                    self.metrics.record_emitted();
                }
            }
        };

        // Stop accepting; anything still queued is discarded.
        input.close();
        drop(output);

        let summary = PipelineSummary {
            received,
            admitted,
            rejected: received - admitted,
            emitted,
            stop_reason,
        };
        info!(
            received = summary.received,
            admitted = summary.admitted,
            rejected = summary.rejected,
            emitted = summary.emitted,
            reason = ?summary.stop_reason,
            "Pipeline stopped"
        );
        debug!(metrics = ?self.metrics.export(), "Final pipeline metrics");
        summary
    }

    /// Start [`run`](Self::run) on the tokio runtime.
    ///
    /// Returns the result receiver and a handle resolving to the summary.
    pub fn spawn(
        self,
        input: mpsc::Receiver<SequencedTrade>,
        cancel: CancellationToken,
        output_capacity: usize,
    ) -> (mpsc::Receiver<VwapResult>, JoinHandle<PipelineSummary>) {
        let (output, results) = mpsc::channel(output_capacity.max(1));
        let handle = tokio::spawn(async move { self.run(input, output, cancel).await });
        (results, handle)
    }
}
