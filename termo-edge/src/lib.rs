pub mod config;
pub mod engine;
pub mod framer;
pub mod sampler;
pub mod sensor;
pub mod thermistor;
pub mod uplink;

pub use config::Config;
pub use engine::Engine;
pub use framer::Framer;
pub use sampler::{Reading, Sampler};
pub use sensor::{Adc, SensorError, SysfsAdc, raw_to_voltage};
pub use thermistor::Thermistor;
pub use uplink::{TcpUplink, TransportError, UdpUplink, Uplink};

use termo_core::protocol::ProtocolError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
