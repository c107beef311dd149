pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use serde::Serialize;
use termo_core::{DeviceId, SeriesKey, SeriesRecord};

/// Result of inserting one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestOutcome {
    pub inserted: usize,
    /// Records skipped because their key was already stored.
    pub duplicates: usize,
}

/// Append-only per-device time series.
///
/// Records are ordered by [`SeriesKey`] regardless of arrival order, and at
/// most one record is kept per key.
#[async_trait]
pub trait SeriesStore: Send + Sync + 'static {
    /// Error type specific to this store implementation
    type Error: std::error::Error + Send + Sync + 'static;

    /// Inserts a batch. Readers see either none or all of it.
    async fn ingest(
        &self,
        device_id: DeviceId,
        records: Vec<SeriesRecord>,
    ) -> Result<IngestOutcome, Self::Error>;

    /// The `n` records with the highest keys, in ascending key order.
    async fn latest(&self, device_id: DeviceId, n: usize) -> Result<Vec<SeriesRecord>, Self::Error>;

    /// Records with `from <= key <= to`, in ascending key order.
    async fn export_range(
        &self,
        device_id: DeviceId,
        from: SeriesKey,
        to: SeriesKey,
    ) -> Result<Vec<SeriesRecord>, Self::Error>;

    /// Devices with at least one stored record.
    async fn devices(&self) -> Result<Vec<DeviceId>, Self::Error>;
}
