use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool, migrate::Migrator};
use termo_core::{Centicelsius, DeviceId, Sample, SeriesKey, SeriesRecord, StatusFlags};

use super::{IngestOutcome, SeriesStore};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const COLUMNS: &str =
    "epoch, sequence, tick_ms, temperature, flags, arrival_ms, gap_before, duplicate";

#[derive(Debug, thiserror::Error)]
pub enum SqliteStoreError {
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(i64),
}

/// SQLite-backed store, one row per record keyed by
/// `(device_id, epoch, sequence)`.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens or creates the database at `path`.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self, SqliteStoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;

        MIGRATOR.run(&pool).await?;

        Ok(Self { pool })
    }

    pub async fn new_in_memory() -> Result<Self, SqliteStoreError> {
        // every connection would get its own empty database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        MIGRATOR.run(&pool).await?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl SeriesStore for SqliteStore {
    type Error = SqliteStoreError;

    async fn ingest(
        &self,
        device_id: DeviceId,
        records: Vec<SeriesRecord>,
    ) -> Result<IngestOutcome, Self::Error> {
        let mut tx = self.pool.begin().await?;
        let mut outcome = IngestOutcome::default();

        for record in records {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO series (device_id, epoch, sequence, tick_ms, temperature, flags, arrival_ms, gap_before, duplicate)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(device_id.0 as i64)
            .bind(record.epoch as i64)
            .bind(record.sample.sequence as i64)
            .bind(record.sample.tick_ms as i64)
            .bind(record.sample.temperature.0 as i64)
            .bind(record.sample.flags.0 as i64)
            .bind(record.arrival_time.as_millisecond())
            .bind(record.gap_before)
            .bind(record.duplicate)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                outcome.duplicates += 1;
            } else {
                outcome.inserted += 1;
            }
        }

        tx.commit().await?;
        Ok(outcome)
    }

    async fn latest(&self, device_id: DeviceId, n: usize) -> Result<Vec<SeriesRecord>, Self::Error> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM series WHERE device_id = ? ORDER BY epoch DESC, sequence DESC LIMIT ?"
        ))
        .bind(device_id.0 as i64)
        .bind(i64::try_from(n).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        let mut records = rows
            .iter()
            .map(map_row_to_record)
            .collect::<Result<Vec<_>, _>>()?;
        records.reverse();
        Ok(records)
    }

    async fn export_range(
        &self,
        device_id: DeviceId,
        from: SeriesKey,
        to: SeriesKey,
    ) -> Result<Vec<SeriesRecord>, Self::Error> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {COLUMNS} FROM series
            WHERE device_id = ? AND (epoch, sequence) >= (?, ?) AND (epoch, sequence) <= (?, ?)
            ORDER BY epoch ASC, sequence ASC
            "#
        ))
        .bind(device_id.0 as i64)
        .bind(from.epoch as i64)
        .bind(from.sequence as i64)
        .bind(to.epoch as i64)
        .bind(to.sequence as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(map_row_to_record).collect()
    }

    async fn devices(&self) -> Result<Vec<DeviceId>, Self::Error> {
        let rows = sqlx::query("SELECT DISTINCT device_id FROM series ORDER BY device_id")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|r| Ok(DeviceId(r.try_get::<i64, _>("device_id")? as u32)))
            .collect()
    }
}

fn map_row_to_record(r: &SqliteRow) -> Result<SeriesRecord, SqliteStoreError> {
    let arrival_ms: i64 = r.try_get("arrival_ms")?;
    let arrival_time = jiff::Timestamp::from_millisecond(arrival_ms)
        .map_err(|_| SqliteStoreError::InvalidTimestamp(arrival_ms))?;

    Ok(SeriesRecord {
        sample: Sample {
            sequence: r.try_get::<i64, _>("sequence")? as u32,
            tick_ms: r.try_get::<i64, _>("tick_ms")? as u32,
            temperature: Centicelsius(r.try_get::<i64, _>("temperature")? as i16),
            flags: StatusFlags(r.try_get::<i64, _>("flags")? as u8),
        },
        epoch: r.try_get::<i64, _>("epoch")? as u32,
        arrival_time,
        gap_before: r.try_get("gap_before")?,
        duplicate: r.try_get("duplicate")?,
    })
}
