use termo_core::LinkStatus;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::edge::EdgeData;
use crate::store::SeriesStore;

/// Writes admitted records to the store until cancelled or until every
/// sender is gone. Data already queued when cancellation fires is still
/// stored.
pub async fn run_collector<S: SeriesStore>(
    mut edge_rx: mpsc::Receiver<EdgeData>,
    store: S,
    cancel: CancellationToken,
) {
    info!("Data collector started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let mut drained = 0usize;
                while let Ok(data) = edge_rx.try_recv() {
                    collect(&store, data).await;
                    drained += 1;
                }
                info!(drained, "Data collector shutting down");
                break;
            }
            data = edge_rx.recv() => match data {
                Some(data) => collect(&store, data).await,
                None => {
                    info!("Edge channel closed, data collector stopping");
                    break;
                }
            },
        }
    }
}

async fn collect<S: SeriesStore>(store: &S, data: EdgeData) {
    match data {
        EdgeData::Records { device_id, records } => {
            let first = records.first().map(|r| r.key());
            let count = records.len();

            match store.ingest(device_id, records).await {
                Ok(outcome) => {
                    debug!(%device_id, ?first, count, "Stored records");
                    if outcome.duplicates > 0 {
                        info!(
                            %device_id,
                            inserted = outcome.inserted,
                            duplicates = outcome.duplicates,
                            "Skipped records already stored"
                        );
                    }
                }
                Err(e) => error!(error = ?e, %device_id, count, "Failed to store records"),
            }
        }
        EdgeData::Status {
            device_id,
            transition,
        } => match transition.to {
            LinkStatus::Lost | LinkStatus::Degraded => {
                warn!(%device_id, from = %transition.from, to = %transition.to, "Device link impaired");
            }
            LinkStatus::Connected | LinkStatus::Disconnected => {
                info!(%device_id, from = %transition.from, to = %transition.to, "Device link status");
            }
        },
    }
}
