pub mod handler;
pub mod mock;
pub mod tcp;
pub mod udp;

use async_trait::async_trait;
use termo_core::{DeviceId, SeriesRecord};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::session::Transition;

/// Data produced by device sessions.
#[derive(Debug, Clone)]
pub enum EdgeData {
    /// Records admitted from one message, in sequence order.
    Records {
        device_id: DeviceId,
        records: Vec<SeriesRecord>,
    },
    /// A device's link status changed.
    Status {
        device_id: DeviceId,
        transition: Transition,
    },
}

/// Trait for receiving data from edge devices.
///
/// Implementations of this trait spawn background tasks that send data
/// to an mpsc channel. The receiver is returned from the `start` method.
#[async_trait]
pub trait EdgeReceiver: Send + Sync + 'static {
    /// Error type for this edge receiver implementation.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Start receiving data from edge devices.
    ///
    /// Returns a channel receiver that will receive data from edge devices.
    /// The background tasks will run until the cancellation token is cancelled.
    async fn start(
        &self,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<EdgeData>, Self::Error>;
}
