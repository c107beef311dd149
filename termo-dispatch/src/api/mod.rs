pub mod devices;
pub mod models;

use axum::{
    Router,
    routing::{get, post},
};

use crate::state::HostState;
use crate::store::SeriesStore;

/// Shared state of the HTTP handlers.
pub struct AppState<S> {
    pub host: HostState,
    pub store: S,
}

impl<S: Clone> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            host: self.host.clone(),
            store: self.store.clone(),
        }
    }
}

pub fn router<S>(state: AppState<S>) -> Router
where
    S: SeriesStore + Clone,
{
    Router::new()
        .route("/health", get(devices::health::<S>))
        .route("/devices", get(devices::list_devices::<S>))
        .route("/devices/{id}", get(devices::get_device::<S>))
        .route("/devices/{id}/latest", get(devices::latest::<S>))
        .route("/devices/{id}/export", get(devices::export::<S>))
        .route("/devices/{id}/control", post(devices::control::<S>))
        .with_state(state)
}
