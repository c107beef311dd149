use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use termo_core::protocol::{ControlCommand, MAX_SAMPLES_PER_FRAME};
use termo_core::{DeviceId, SeriesKey};
use tracing::info;

use super::AppState;
use super::models::{
    ApiResponse, ExportQueryParams, HealthResponse, LatestQueryParams, RecordResponse,
    SeriesResponse,
};
use crate::session::SessionSnapshot;
use crate::store::SeriesStore;

const DEFAULT_LATEST: usize = 100;
const MAX_LATEST: usize = 10_000;

#[derive(Debug, Serialize)]
pub struct DevicesResponse {
    /// Devices that performed a handshake since the host started.
    pub sessions: Vec<SessionSnapshot>,
    /// Devices with stored records, including ones from earlier runs.
    pub stored: Vec<DeviceId>,
}

fn parse_device_id(id: &str) -> Result<DeviceId, String> {
    id.parse::<u32>()
        .map(DeviceId)
        .map_err(|_| "Invalid device ID format. Expected an unsigned integer.".to_string())
}

fn error_response(status: StatusCode, message: String) -> Response {
    let api_response = ApiResponse::<()> {
        success: false,
        data: None,
        message: Some(message),
    };
    (status, Json(api_response)).into_response()
}

fn success_response<T: Serialize>(status: StatusCode, data: T, message: Option<String>) -> Response {
    let api_response = ApiResponse {
        success: true,
        data: Some(data),
        message,
    };
    (status, Json(api_response)).into_response()
}

fn series_response(device_id: DeviceId, records: Vec<termo_core::SeriesRecord>) -> SeriesResponse {
    SeriesResponse {
        device_id: device_id.0,
        records: records.into_iter().map(RecordResponse::from).collect(),
    }
}

fn export_bounds(params: &ExportQueryParams) -> Result<(SeriesKey, SeriesKey), String> {
    match params.epoch {
        Some(epoch) => {
            let from = params.from.unwrap_or(0);
            let to = params.to.unwrap_or(u32::MAX);
            if from > to {
                return Err("`from` must not be greater than `to`".to_string());
            }
            Ok((SeriesKey::new(epoch, from), SeriesKey::new(epoch, to)))
        }
        None if params.from.is_some() || params.to.is_some() => {
            Err("`from` and `to` require an `epoch`".to_string())
        }
        None => Ok((SeriesKey::MIN, SeriesKey::MAX)),
    }
}

fn validate_command(command: &ControlCommand) -> Result<(), String> {
    match *command {
        ControlCommand::SetInterval { millis: 0 } => Err("Interval must be positive".to_string()),
        ControlCommand::SetBatchSize { samples }
            if samples == 0 || samples as usize > MAX_SAMPLES_PER_FRAME =>
        {
            Err(format!(
                "Batch size must be between 1 and {}",
                MAX_SAMPLES_PER_FRAME
            ))
        }
        _ => Ok(()),
    }
}

pub async fn health<S>(State(state): State<AppState<S>>) -> Response
where
    S: SeriesStore + Clone,
{
    let health = HealthResponse {
        uptime_secs: state.host.uptime_secs().await,
        connected_devices: state.host.connected_count().await,
    };
    success_response(StatusCode::OK, health, None)
}

pub async fn list_devices<S>(State(state): State<AppState<S>>) -> Response
where
    S: SeriesStore + Clone,
{
    let sessions = state.host.snapshots().await;

    match state.store.devices().await {
        Ok(stored) => success_response(StatusCode::OK, DevicesResponse { sessions, stored }, None),
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to list devices: {}", e),
        ),
    }
}

pub async fn get_device<S>(Path(id): Path<String>, State(state): State<AppState<S>>) -> Response
where
    S: SeriesStore + Clone,
{
    let device_id = match parse_device_id(&id) {
        Ok(device_id) => device_id,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
    };

    match state.host.snapshot(device_id).await {
        Some(snapshot) => success_response(StatusCode::OK, snapshot, None),
        None => error_response(
            StatusCode::NOT_FOUND,
            format!("Device {} has no session", device_id),
        ),
    }
}

pub async fn latest<S>(
    Path(id): Path<String>,
    Query(params): Query<LatestQueryParams>,
    State(state): State<AppState<S>>,
) -> Response
where
    S: SeriesStore + Clone,
{
    let device_id = match parse_device_id(&id) {
        Ok(device_id) => device_id,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
    };
    let n = params.n.unwrap_or(DEFAULT_LATEST).min(MAX_LATEST);

    match state.store.latest(device_id, n).await {
        Ok(records) => success_response(StatusCode::OK, series_response(device_id, records), None),
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to read records: {}", e),
        ),
    }
}

pub async fn export<S>(
    Path(id): Path<String>,
    Query(params): Query<ExportQueryParams>,
    State(state): State<AppState<S>>,
) -> Response
where
    S: SeriesStore + Clone,
{
    let device_id = match parse_device_id(&id) {
        Ok(device_id) => device_id,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
    };
    let (from, to) = match export_bounds(&params) {
        Ok(bounds) => bounds,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
    };

    match state.store.export_range(device_id, from, to).await {
        Ok(records) => success_response(StatusCode::OK, series_response(device_id, records), None),
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to export records: {}", e),
        ),
    }
}

/// Queues a command on the device's live connection.
pub async fn control<S>(
    Path(id): Path<String>,
    State(state): State<AppState<S>>,
    Json(command): Json<ControlCommand>,
) -> Response
where
    S: SeriesStore + Clone,
{
    let device_id = match parse_device_id(&id) {
        Ok(device_id) => device_id,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
    };
    if let Err(e) = validate_command(&command) {
        return error_response(StatusCode::BAD_REQUEST, e);
    }

    if state.host.send_control(device_id, command).await {
        info!(%device_id, ?command, "Control command queued");
        success_response(
            StatusCode::ACCEPTED,
            command,
            Some("Command queued".to_string()),
        )
    } else {
        error_response(
            StatusCode::NOT_FOUND,
            format!("Device {} has no live connection", device_id),
        )
    }
}
