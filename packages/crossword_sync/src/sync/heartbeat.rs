use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::metrics::ServerMetrics;

use super::registry::{StreamFrames, StreamRegistry};

/// Keep-alive loop for push streams.
///
/// Streams have no liveness signal of their own, so every tick writes a
/// comment frame to each one and reaps whatever fails. Runs until `cancel`.
pub async fn run_heartbeat(
    streams: Arc<StreamRegistry>,
    metrics: Arc<ServerMetrics>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; nobody needs a heartbeat at startup.
    ticker.tick().await;

    info!(interval_secs = interval.as_secs(), "Heartbeat started");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let report = streams.sweep(StreamFrames::heartbeat());
                metrics.heartbeat();
                if report.removed > 0 {
                    debug!(
                        delivered = report.delivered,
                        removed = report.removed,
                        "heartbeat reaped dead streams"
                    );
                }
            }
        }
    }
    info!("Heartbeat stopped");
}
