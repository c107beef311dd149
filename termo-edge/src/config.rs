use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::sensor::DEFAULT_ADC_PATH;
use crate::thermistor::Thermistor;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub device: DeviceConfig,
    #[serde(default)]
    pub sensor: SensorConfig,
    pub uplink: UplinkConfig,
    #[serde(default)]
    pub sampling: SamplingConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

#[derive(Debug, Deserialize)]
pub struct DeviceConfig {
    /// Identity announced in the hello frame
    pub id: u32,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// Sysfs attribute holding the raw ADC count
    pub adc_path: PathBuf,
    /// Series resistor of the divider, in ohms
    pub series_resistor: f64,
    /// Full-scale ADC count
    pub adc_max: f64,
    pub steinhart_a: f64,
    pub steinhart_b: f64,
    pub steinhart_c: f64,
    /// Readings outside `min_celsius..=max_celsius` are flagged out of range
    pub min_celsius: f64,
    pub max_celsius: f64,
    /// Reference voltage, only used to log the pin voltage
    pub vref: f64,
}

impl SensorConfig {
    pub fn thermistor(&self) -> Thermistor {
        Thermistor {
            series_resistor: self.series_resistor,
            adc_max: self.adc_max,
            a: self.steinhart_a,
            b: self.steinhart_b,
            c: self.steinhart_c,
        }
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        let thermistor = Thermistor::default();

        Self {
            adc_path: PathBuf::from(DEFAULT_ADC_PATH),
            series_resistor: thermistor.series_resistor,
            adc_max: thermistor.adc_max,
            steinhart_a: thermistor.a,
            steinhart_b: thermistor.b,
            steinhart_c: thermistor.c,
            min_celsius: -40.0,
            max_celsius: 125.0,
            vref: 3.3,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum UplinkConfig {
    Tcp { addr: SocketAddr },
    Udp { addr: SocketAddr },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Milliseconds between two samples
    pub interval_ms: u32,
    /// Samples packed into one frame
    pub batch_size: usize,
    /// Idle intervals after which a heartbeat is sent
    pub heartbeat_every: u32,
}

impl SamplingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms as u64)
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            batch_size: 1,
            heartbeat_every: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub base_ms: u64,
    pub max_ms: u64,
    /// Frames after which a datagram uplink repeats its hello (0 disables)
    pub hello_every: u32,
    /// Silence after which a datagram uplink sends a hello before the next
    /// frame (0 disables). Keep it below the host's liveness timeout.
    pub hello_idle_ms: u64,
}

impl ReconnectConfig {
    pub fn base(&self) -> Duration {
        Duration::from_millis(self.base_ms)
    }

    pub fn max(&self) -> Duration {
        Duration::from_millis(self.max_ms.max(self.base_ms))
    }

    pub fn hello_idle(&self) -> Option<Duration> {
        (self.hello_idle_ms > 0).then(|| Duration::from_millis(self.hello_idle_ms))
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_ms: 1_000,
            max_ms: 60_000,
            hello_every: 30,
            hello_idle_ms: 5_000,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> color_eyre::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: DeviceConfig { id: 6 },
            sensor: SensorConfig::default(),
            uplink: UplinkConfig::Udp {
                addr: SocketAddr::from(([192, 168, 42, 10], 5000)),
            },
            sampling: SamplingConfig::default(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let config: Config = toml::from_str(
            r#"
            [device]
            id = 12

            [uplink]
            type = "tcp"
            addr = "127.0.0.1:9100"

            [sampling]
            batch_size = 8
            "#,
        )
        .unwrap();

        assert_eq!(config.device.id, 12);
        assert!(matches!(config.uplink, UplinkConfig::Tcp { .. }));
        assert_eq!(config.sampling.batch_size, 8);
        assert_eq!(config.sampling.interval_ms, 1000);
        assert_eq!(config.sensor.thermistor(), Thermistor::default());
        assert_eq!(config.reconnect.max(), Duration::from_secs(60));
        assert_eq!(config.reconnect.hello_idle(), Some(Duration::from_secs(5)));
    }
}
