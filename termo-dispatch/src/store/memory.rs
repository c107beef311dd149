use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use termo_core::{DeviceId, SeriesKey, SeriesRecord};

use super::{IngestOutcome, SeriesStore};

type Series = BTreeMap<SeriesKey, SeriesRecord>;

/// In-memory store. Also serves as the reference implementation of
/// [`SeriesStore`] in tests.
#[derive(Clone, Default)]
pub struct MemoryStore {
    series: Arc<RwLock<HashMap<DeviceId, Series>>>,
}

/// Error type for MemoryStore
#[derive(Debug)]
pub enum MemoryStoreError {
    LockPoisoned(String),
}

impl std::error::Error for MemoryStoreError {}

impl fmt::Display for MemoryStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryStoreError::LockPoisoned(msg) => write!(f, "Lock poisoned: {}", msg),
        }
    }
}

impl<T> From<PoisonError<T>> for MemoryStoreError {
    fn from(err: PoisonError<T>) -> Self {
        MemoryStoreError::LockPoisoned(err.to_string())
    }
}

#[async_trait]
impl SeriesStore for MemoryStore {
    type Error = MemoryStoreError;

    async fn ingest(
        &self,
        device_id: DeviceId,
        records: Vec<SeriesRecord>,
    ) -> Result<IngestOutcome, Self::Error> {
        let mut map = self.series.write()?;
        let series = map.entry(device_id).or_default();

        let mut outcome = IngestOutcome::default();
        for record in records {
            match series.entry(record.key()) {
                Entry::Occupied(_) => outcome.duplicates += 1,
                Entry::Vacant(slot) => {
                    slot.insert(record);
                    outcome.inserted += 1;
                }
            }
        }

        Ok(outcome)
    }

    async fn latest(&self, device_id: DeviceId, n: usize) -> Result<Vec<SeriesRecord>, Self::Error> {
        let map = self.series.read()?;

        let Some(series) = map.get(&device_id) else {
            return Ok(Vec::new());
        };

        let mut records: Vec<_> = series.values().rev().take(n).cloned().collect();
        records.reverse();
        Ok(records)
    }

    async fn export_range(
        &self,
        device_id: DeviceId,
        from: SeriesKey,
        to: SeriesKey,
    ) -> Result<Vec<SeriesRecord>, Self::Error> {
        if from > to {
            return Ok(Vec::new());
        }

        let map = self.series.read()?;

        Ok(map
            .get(&device_id)
            .map(|series| series.range(from..=to).map(|(_, r)| r.clone()).collect())
            .unwrap_or_default())
    }

    async fn devices(&self) -> Result<Vec<DeviceId>, Self::Error> {
        let map = self.series.read()?;

        let mut devices: Vec<_> = map
            .iter()
            .filter(|(_, series)| !series.is_empty())
            .map(|(id, _)| *id)
            .collect();
        devices.sort();
        Ok(devices)
    }
}
