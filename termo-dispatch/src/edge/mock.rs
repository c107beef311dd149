use std::collections::VecDeque;

use async_trait::async_trait;
use rand::Rng;
use termo_core::DeviceId;
use termo_core::protocol::{FrameKind, SYNC_SIZE};
use termo_edge::config::{ReconnectConfig, SamplingConfig};
use termo_edge::sampler::DEFAULT_RANGE;
use termo_edge::{Adc, Engine, Sampler, SensorError, Thermistor, Uplink};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span};

use super::handler::handle_link;
use super::{EdgeData, EdgeReceiver};
use crate::link::{ChannelLink, Link};
use crate::state::HostState;

/// Mock edge receiver that simulates a fleet of sensor nodes.
///
/// Each simulated node runs the device [`Engine`] over a [`ChannelLink`]
/// connected to a regular handler, so batching, heartbeats, control
/// commands and everything from decoding onwards behave as they would for
/// real devices. Sample and heartbeat frames are dropped at random with
/// probability `drop_rate` to exercise gap detection.
pub struct MockEdgeReceiver {
    device_count: u32,
    sample_interval_ms: u32,
    drop_rate: f64,
    state: HostState,
}

impl MockEdgeReceiver {
    pub fn new(device_count: u32, sample_interval_ms: u32, drop_rate: f64, state: HostState) -> Self {
        Self {
            device_count,
            sample_interval_ms: sample_interval_ms.max(1),
            drop_rate: drop_rate.clamp(0.0, 1.0),
            state,
        }
    }
}

#[async_trait]
impl EdgeReceiver for MockEdgeReceiver {
    type Error = std::convert::Infallible;

    async fn start(
        &self,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<EdgeData>, Self::Error> {
        let (tx, rx) = mpsc::channel(100);

        info!(
            device_count = self.device_count,
            sample_interval_ms = self.sample_interval_ms,
            drop_rate = self.drop_rate,
            "Starting mock edge receiver"
        );

        for n in 0..self.device_count {
            let device_id = DeviceId(n + 1);
            let (device_end, host_end) = ChannelLink::pair();

            let tx = tx.clone();
            let handler_cancel = cancel.clone();
            let state = self.state.clone();
            tokio::spawn(async move {
                let peer = format!("mock-{device_id}");
                if let Err(e) = handle_link(host_end, peer, tx, handler_cancel, state).await {
                    error!(error = %e, "Mock device handler ended with error");
                }
            });

            let engine = self.engine(device_id, device_end);
            let engine_cancel = cancel.clone();
            tokio::spawn(
                async move {
                    if let Err(e) = engine.run(engine_cancel).await {
                        error!(error = %e, "Simulated device stopped");
                    }
                }
                .instrument(info_span!("mock_device", %device_id)),
            );
        }

        Ok(rx)
    }
}

impl MockEdgeReceiver {
    fn engine(&self, device_id: DeviceId, link: ChannelLink) -> Engine<SimulatedUplink, SimulatedAdc> {
        let uplink = SimulatedUplink {
            link,
            drop_rate: self.drop_rate,
            inbound: VecDeque::new(),
        };
        let sampler = Sampler::new(SimulatedAdc::new(), Thermistor::default(), DEFAULT_RANGE);
        let sampling = SamplingConfig {
            interval_ms: self.sample_interval_ms,
            ..SamplingConfig::default()
        };
        let reconnect = ReconnectConfig {
            base_ms: 100,
            max_ms: 5_000,
            ..ReconnectConfig::default()
        };

        Engine::new(uplink, sampler, device_id, rand::random(), sampling, reconnect)
    }
}

/// Device end of a [`ChannelLink`] that loses frames on purpose. Hellos are
/// always delivered so the handler can identify the device.
struct SimulatedUplink {
    link: ChannelLink,
    drop_rate: f64,
    inbound: VecDeque<u8>,
}

impl Uplink for SimulatedUplink {
    async fn connect(&mut self) -> Result<(), termo_edge::TransportError> {
        if self.link.closer().is_cancelled() {
            return Err(termo_edge::TransportError::Closed);
        }
        Ok(())
    }

    async fn send(&mut self, frame: &[u8]) -> Result<(), termo_edge::TransportError> {
        let hello = frame.get(SYNC_SIZE + 1) == Some(&(FrameKind::Hello as u8));
        let dropped = !hello && rand::rng().random_bool(self.drop_rate);
        if dropped {
            debug!(len = frame.len(), "Dropping simulated frame");
            return Ok(());
        }

        self.link
            .write(frame)
            .await
            .map_err(|_| termo_edge::TransportError::Closed)
    }

    fn poll_control(&mut self, buf: &mut [u8]) -> Result<usize, termo_edge::TransportError> {
        while let Some(chunk) = self
            .link
            .try_read()
            .map_err(|_| termo_edge::TransportError::Closed)?
        {
            self.inbound.extend(chunk);
        }

        let n = self.inbound.len().min(buf.len());
        for (slot, byte) in buf.iter_mut().zip(self.inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

/// ADC counts following a slow random walk around room temperature.
struct SimulatedAdc {
    raw: f64,
}

impl SimulatedAdc {
    fn new() -> Self {
        Self {
            raw: rand::rng().random_range(1900.0..2200.0),
        }
    }
}

impl Adc for SimulatedAdc {
    async fn read_raw(&mut self) -> Result<u32, SensorError> {
        let step: f64 = rand::rng().random_range(-4.0..4.0);
        self.raw = (self.raw + step).clamp(1200.0, 2900.0);
        Ok(self.raw as u32)
    }
}
