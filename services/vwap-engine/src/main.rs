use std::io::BufReader;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use vwap_engine::feed::{self, SubscribeRequest};
use vwap_engine::{EngineConfig, Pipeline, SequenceGuard, StopReason, WindowAggregator};

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let config = EngineConfig::from_env()?;
    tracing::info!(
        version = vwap_engine::SERVICE_VERSION,
        capacity = config.window.capacity(),
        scope = ?config.window.scope(),
        endpoint = %config.feed_endpoint,
        "Starting VWAP engine"
    );

    // The transport that pipes the feed into stdin sends this first
    let request = SubscribeRequest::matches(&config.instruments)?;
    tracing::info!(request = %serde_json::to_string(&request)?, "Subscription request");

    let pipeline = Pipeline::new(
        Arc::new(SequenceGuard::new()),
        Arc::new(WindowAggregator::new(config.window)),
    );
    let cancel = CancellationToken::new();

    // Stdin reads cannot be cancelled, so they run on their own thread
    let (trades, input) = mpsc::channel(config.channel_capacity);
    let feed_reader =
        feed::spawn_line_reader(BufReader::new(std::io::stdin()), trades, cancel.clone())?;
    let (mut results, pipeline_task) =
        pipeline.clone().spawn(input, cancel.clone(), config.channel_capacity);

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Shutdown signal received");
                cancel.cancel();
            }
        });
    }

    while let Some(result) = results.recv().await {
        tracing::info!(instrument = %result.instrument, vwap = %result.vwap, "VWAP");
    }

    let summary = pipeline_task.await?;
    cancel.cancel();

    // After end of input the reader has already returned; otherwise it may
    // still be parked on stdin and is left behind
    if summary.stop_reason == StopReason::InputClosed || feed_reader.is_finished() {
        match feed_reader.join() {
            Ok(Ok(feed)) => tracing::info!(lines = feed.lines, trades = feed.trades, "Feed closed"),
            Ok(Err(e)) => tracing::warn!(error = %e, "Feed ended with error"),
            Err(_) => tracing::error!("Feed reader panicked"),
        }
    } else {
        tracing::info!("Feed reader still waiting on stdin, not joined");
    }

    let guard = pipeline.guard();
    tracing::info!(
        accepted = guard.accepted(),
        rejected = guard.rejected(),
        instruments = ?pipeline.aggregator().instruments(),
        "Final sequence state"
    );
    tracing::info!(?summary, "VWAP engine stopped");

    Ok(())
}
