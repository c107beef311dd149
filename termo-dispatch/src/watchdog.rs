use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::state::HostState;

/// Periodically marks devices that went silent as lost.
pub async fn run_watchdog(state: HostState, sweep_interval: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(sweep_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Liveness watchdog shutting down");
                break;
            }
            _ = interval.tick() => {
                for (device_id, transition) in state.sweep(Instant::now()).await {
                    warn!(%device_id, from = %transition.from, "No valid message within the liveness timeout");
                }
            }
        }
    }
}
