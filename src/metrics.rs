use crate::binlog::BinlogClient;
use crate::endpoint::DestinationEndpoint;
use metrics::{counter, gauge};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Polls destination liveness and replication delay on a fixed tick and
/// reports them through the `metrics` facade, the same macro-based style
/// `readyset`'s adapter uses for its Noria gauges. The Controller only spawns
/// this task when `is_exporter_enable` is set.
pub async fn run(
    endpoint: Arc<dyn DestinationEndpoint>,
    binlog_client: Arc<Mutex<Option<Box<dyn BinlogClient>>>>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        match endpoint.ping().await {
            Ok(up) => gauge!("transfer_destination_up").set(if up { 1.0 } else { 0.0 }),
            Err(e) => {
                warn!(error = %e, "ping failed");
                gauge!("transfer_destination_up").set(0.0);
                counter!("transfer_ping_errors_total").increment(1);
            }
        }

        if let Some(client) = binlog_client.lock().await.as_ref() {
            match client.get_delay().await {
                Ok(delay) => gauge!("transfer_replication_delay_seconds").set(delay as f64),
                Err(e) => warn!(error = %e, "failed to read replication delay"),
            }
        }
    }
}
