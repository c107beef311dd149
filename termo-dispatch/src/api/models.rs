use serde::{Deserialize, Serialize};
use termo_core::{SeriesRecord, StatusFlags};

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub uptime_secs: u64,
    pub connected_devices: u32,
}

#[derive(Debug, Deserialize)]
pub struct LatestQueryParams {
    #[serde(default)]
    pub n: Option<usize>,
}

/// Inclusive range of one epoch, or the whole history when `epoch` is absent.
#[derive(Debug, Default, Deserialize)]
pub struct ExportQueryParams {
    #[serde(default)]
    pub epoch: Option<u32>,
    #[serde(default)]
    pub from: Option<u32>,
    #[serde(default)]
    pub to: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RecordResponse {
    pub epoch: u32,
    pub sequence: u32,
    pub tick_ms: u32,
    pub celsius: f64,
    pub flags: u8,
    pub sensor_fault: bool,
    pub out_of_range: bool,
    pub saturated: bool,
    pub arrival_time: String,
    pub gap_before: bool,
    pub duplicate: bool,
}

impl From<SeriesRecord> for RecordResponse {
    fn from(record: SeriesRecord) -> Self {
        let flags = record.sample.flags;

        Self {
            epoch: record.epoch,
            sequence: record.sample.sequence,
            tick_ms: record.sample.tick_ms,
            celsius: record.sample.temperature.as_celsius(),
            flags: flags.0,
            sensor_fault: flags.contains(StatusFlags::SENSOR_FAULT),
            out_of_range: flags.contains(StatusFlags::OUT_OF_RANGE),
            saturated: flags.contains(StatusFlags::SATURATED),
            arrival_time: record.arrival_time.to_string(),
            gap_before: record.gap_before,
            duplicate: record.duplicate,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SeriesResponse {
    pub device_id: u32,
    pub records: Vec<RecordResponse>,
}
