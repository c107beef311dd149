use tempfile::NamedTempFile;
use termo_core::{Centicelsius, DeviceId, Sample, SeriesKey, SeriesRecord, StatusFlags};
use termo_dispatch::store::memory::{MemoryStore, MemoryStoreError};
use termo_dispatch::store::sqlite::{SqliteStore, SqliteStoreError};
use termo_dispatch::store::{IngestOutcome, SeriesStore};

fn record(epoch: u32, sequence: u32) -> SeriesRecord {
    SeriesRecord {
        sample: Sample {
            sequence,
            tick_ms: sequence.wrapping_mul(1000),
            temperature: Centicelsius(-500 + sequence as i16),
            flags: if sequence % 5 == 0 {
                StatusFlags::OUT_OF_RANGE
            } else {
                StatusFlags::empty()
            },
        },
        epoch,
        arrival_time: jiff::Timestamp::from_millisecond(1_700_000_000_000 + sequence as i64)
            .unwrap(),
        gap_before: sequence == 5,
        duplicate: false,
    }
}

fn keys(records: &[SeriesRecord]) -> Vec<(u32, u32)> {
    records.iter().map(|r| (r.epoch, r.sample.sequence)).collect()
}

async fn out_of_order_arrivals_are_stored_in_key_order<S: SeriesStore>(store: &S) -> Result<(), S::Error> {
    let device = DeviceId(1);

    store.ingest(device, vec![record(0, 1), record(0, 2), record(0, 5)]).await?;
    // a late retransmission filling the hole
    store.ingest(device, vec![record(0, 3), record(0, 4)]).await?;
    store.ingest(device, vec![record(1, 0)]).await?;

    let all = store.export_range(device, SeriesKey::MIN, SeriesKey::MAX).await?;
    assert_eq!(keys(&all), vec![(0, 1), (0, 2), (0, 3), (0, 4), (0, 5), (1, 0)]);
    assert!(all.windows(2).all(|w| w[0].key() < w[1].key()));

    Ok(())
}

async fn duplicates_are_skipped<S: SeriesStore>(store: &S) -> Result<(), S::Error> {
    let device = DeviceId(2);

    let outcome = store.ingest(device, vec![record(0, 0), record(0, 1)]).await?;
    assert_eq!(outcome, IngestOutcome { inserted: 2, duplicates: 0 });

    let mut retransmitted = record(0, 1);
    retransmitted.duplicate = true;
    let outcome = store.ingest(device, vec![retransmitted, record(0, 2)]).await?;
    assert_eq!(outcome, IngestOutcome { inserted: 1, duplicates: 1 });

    let all = store.latest(device, 10).await?;
    assert_eq!(keys(&all), vec![(0, 0), (0, 1), (0, 2)]);
    // the first copy wins
    assert!(!all[1].duplicate);

    Ok(())
}

async fn queries_respect_bounds<S: SeriesStore>(store: &S) -> Result<(), S::Error> {
    let device = DeviceId(3);
    let records = (0..8).map(|s| record(0, s)).chain((0..3).map(|s| record(1, s)));
    store.ingest(device, records.collect()).await?;

    let tail = store.latest(device, 4).await?;
    assert_eq!(keys(&tail), vec![(0, 7), (1, 0), (1, 1), (1, 2)]);

    let range = store
        .export_range(device, SeriesKey::new(0, 6), SeriesKey::new(1, 1))
        .await?;
    assert_eq!(keys(&range), vec![(0, 6), (0, 7), (1, 0), (1, 1)]);

    let inverted = store
        .export_range(device, SeriesKey::new(1, 0), SeriesKey::new(0, 0))
        .await?;
    assert!(inverted.is_empty());

    assert!(store.latest(DeviceId(99), 5).await?.is_empty());
    assert!(store.latest(device, 0).await?.is_empty());

    Ok(())
}

async fn records_round_trip<S: SeriesStore>(store: &S) -> Result<(), S::Error> {
    let device = DeviceId(4);
    let originals: Vec<_> = (3..7).map(|s| record(2, s)).collect();
    store.ingest(device, originals.clone()).await?;

    let stored = store.latest(device, 10).await?;
    assert_eq!(stored, originals);

    Ok(())
}

/// memory store tests
#[tokio::test]
async fn memory_out_of_order_arrivals() -> Result<(), MemoryStoreError> {
    out_of_order_arrivals_are_stored_in_key_order(&MemoryStore::default()).await
}

#[tokio::test]
async fn memory_duplicates() -> Result<(), MemoryStoreError> {
    duplicates_are_skipped(&MemoryStore::default()).await
}

#[tokio::test]
async fn memory_query_bounds() -> Result<(), MemoryStoreError> {
    let store = MemoryStore::default();
    queries_respect_bounds(&store).await?;
    records_round_trip(&store).await?;
    assert_eq!(store.devices().await?, vec![DeviceId(3), DeviceId(4)]);
    Ok(())
}

/// sqlite store tests
#[tokio::test]
async fn sqlite_out_of_order_arrivals() -> Result<(), SqliteStoreError> {
    out_of_order_arrivals_are_stored_in_key_order(&SqliteStore::new_in_memory().await?).await
}

#[tokio::test]
async fn sqlite_duplicates() -> Result<(), SqliteStoreError> {
    duplicates_are_skipped(&SqliteStore::new_in_memory().await?).await
}

#[tokio::test]
async fn sqlite_query_bounds() -> Result<(), SqliteStoreError> {
    let store = SqliteStore::new_in_memory().await?;
    queries_respect_bounds(&store).await?;
    records_round_trip(&store).await?;
    assert_eq!(store.devices().await?, vec![DeviceId(3), DeviceId(4)]);
    Ok(())
}

#[tokio::test]
async fn sqlite_series_survive_reopen() -> Result<(), SqliteStoreError> {
    let temp_file = NamedTempFile::new().unwrap();
    let db_path = temp_file.path();

    {
        let store = SqliteStore::new(db_path).await?;
        store.ingest(DeviceId(5), vec![record(0, 0), record(0, 1)]).await?;
    }

    let store = SqliteStore::new(db_path).await?;
    let outcome = store.ingest(DeviceId(5), vec![record(0, 1), record(0, 2)]).await?;
    assert_eq!(outcome, IngestOutcome { inserted: 1, duplicates: 1 });
    assert_eq!(keys(&store.latest(DeviceId(5), 10).await?), vec![(0, 0), (0, 1), (0, 2)]);

    Ok(())
}
