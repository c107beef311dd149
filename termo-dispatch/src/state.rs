use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use termo_core::protocol::{ControlCommand, Hello, Message};
use termo_core::{DeviceId, LinkStatus};
use tokio::sync::{Mutex, mpsc};

use crate::session::{Admission, Arrival, Session, SessionConfig, SessionSnapshot, Transition};

/// Shared state for tracking device sessions and their control channels.
pub struct HostState {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    config: SessionConfig,
    sessions: HashMap<DeviceId, Session>,
    controls: HashMap<DeviceId, mpsc::Sender<ControlCommand>>,
    startup_time: Instant,
}

impl HostState {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                config,
                sessions: HashMap::new(),
                controls: HashMap::new(),
                startup_time: Instant::now(),
            })),
        }
    }

    /// Applies a hello frame, creating the session on first contact.
    pub async fn handshake(&self, hello: &Hello, sequence: u32, arrival: Arrival) -> Admission {
        let mut inner = self.inner.lock().await;
        let config = inner.config;

        inner
            .sessions
            .entry(hello.device_id)
            .or_insert_with(|| Session::new(hello.device_id, config))
            .handshake(hello, sequence, arrival)
    }

    /// Feeds a message to the session of `device_id`. Returns `None` if the
    /// device never completed a handshake.
    pub async fn admit(
        &self,
        device_id: DeviceId,
        message: &Message,
        arrival: Arrival,
    ) -> Option<Admission> {
        let mut inner = self.inner.lock().await;
        let session = inner.sessions.get_mut(&device_id)?;
        Some(session.admit(message, arrival))
    }

    /// Runs the liveness check on every session and returns the devices that
    /// changed status.
    pub async fn sweep(&self, now: tokio::time::Instant) -> Vec<(DeviceId, Transition)> {
        let mut inner = self.inner.lock().await;
        inner
            .sessions
            .values_mut()
            .filter_map(|session| {
                session
                    .check_liveness(now)
                    .map(|transition| (session.device_id(), transition))
            })
            .collect()
    }

    pub async fn link_failed(&self, device_id: DeviceId) -> Option<Transition> {
        let mut inner = self.inner.lock().await;
        inner.sessions.get_mut(&device_id)?.link_failed()
    }

    /// Registers the channel on which control commands reach `device_id`,
    /// replacing the one of an older connection.
    pub async fn attach_control(&self, device_id: DeviceId, tx: mpsc::Sender<ControlCommand>) {
        let mut inner = self.inner.lock().await;
        inner.controls.insert(device_id, tx);
    }

    /// Removes the control channel of `device_id` if it is still `tx`.
    pub async fn detach_control(&self, device_id: DeviceId, tx: &mpsc::Sender<ControlCommand>) {
        let mut inner = self.inner.lock().await;
        if inner
            .controls
            .get(&device_id)
            .is_some_and(|current| current.same_channel(tx))
        {
            inner.controls.remove(&device_id);
        }
    }

    /// Queues a command for the device. Returns `false` if it has no live
    /// connection.
    pub async fn send_control(&self, device_id: DeviceId, command: ControlCommand) -> bool {
        let tx = {
            let inner = self.inner.lock().await;
            inner.controls.get(&device_id).cloned()
        };

        match tx {
            Some(tx) => tx.send(command).await.is_ok(),
            None => false,
        }
    }

    pub async fn snapshot(&self, device_id: DeviceId) -> Option<SessionSnapshot> {
        let inner = self.inner.lock().await;
        inner.sessions.get(&device_id).map(Session::snapshot)
    }

    pub async fn snapshots(&self) -> Vec<SessionSnapshot> {
        let inner = self.inner.lock().await;
        let mut snapshots: Vec<_> = inner.sessions.values().map(Session::snapshot).collect();
        snapshots.sort_by_key(|s| s.device_id);
        snapshots
    }

    pub async fn status(&self, device_id: DeviceId) -> Option<LinkStatus> {
        let inner = self.inner.lock().await;
        inner.sessions.get(&device_id).map(Session::status)
    }

    /// Get the number of devices whose link is up.
    pub async fn connected_count(&self) -> u32 {
        let inner = self.inner.lock().await;
        inner
            .sessions
            .values()
            .filter(|s| matches!(s.status(), LinkStatus::Connected | LinkStatus::Degraded))
            .count() as u32
    }

    pub async fn uptime_secs(&self) -> u64 {
        let inner = self.inner.lock().await;
        inner.startup_time.elapsed().as_secs()
    }
}

impl Default for HostState {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

impl Clone for HostState {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}
