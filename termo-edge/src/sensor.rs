use std::path::{Path, PathBuf};

use thiserror::Error;

/// IIO channel the thermistor divider is wired to on the reference board.
pub const DEFAULT_ADC_PATH: &str = "/sys/bus/iio/devices/iio:device0/in_voltage13_raw";

#[derive(Debug, Error)]
pub enum SensorError {
    #[error("failed to read ADC at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("ADC returned an unparsable value: {0:?}")]
    InvalidData(String),
    #[error("ADC returned no signal")]
    NoSignal,
    #[error("raw value {0} is outside the conversion domain")]
    OutOfDomain(u32),
}

/// Source of raw analog-to-digital counts.
pub trait Adc {
    fn read_raw(&mut self) -> impl Future<Output = Result<u32, SensorError>> + Send;
}

/// ADC exposed by the Linux industrial I/O subsystem as a sysfs attribute.
#[derive(Debug, Clone)]
pub struct SysfsAdc {
    path: PathBuf,
}

impl SysfsAdc {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for SysfsAdc {
    fn default() -> Self {
        Self::new(DEFAULT_ADC_PATH)
    }
}

impl Adc for SysfsAdc {
    async fn read_raw(&mut self) -> Result<u32, SensorError> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| SensorError::Io {
                path: self.path.clone(),
                source,
            })?;

        parse_raw(&content)
    }
}

fn parse_raw(content: &str) -> Result<u32, SensorError> {
    let value: i64 = content
        .trim()
        .parse()
        .map_err(|_| SensorError::InvalidData(content.trim().to_owned()))?;

    if value <= 0 {
        return Err(SensorError::NoSignal);
    }

    u32::try_from(value).map_err(|_| SensorError::InvalidData(content.trim().to_owned()))
}

/// Converts a raw count to the voltage seen at the ADC pin.
pub fn raw_to_voltage(raw: u32, vref: f64, adc_max: f64) -> f64 {
    raw as f64 * vref / adc_max
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sysfs_content() {
        assert_eq!(parse_raw("2048\n").unwrap(), 2048);
        assert!(matches!(parse_raw("0\n"), Err(SensorError::NoSignal)));
        assert!(matches!(parse_raw("-1"), Err(SensorError::NoSignal)));
        assert!(matches!(
            parse_raw("garbage"),
            Err(SensorError::InvalidData(_))
        ));
    }

    #[test]
    fn voltage_of_half_scale_14_bit() {
        let volts = raw_to_voltage(8192, 3.3, 16384.0);
        assert!((volts - 1.65).abs() < 1e-9);
    }

    #[tokio::test]
    async fn reads_value_from_file() {
        let path = std::env::temp_dir().join(format!("termo-adc-{}", std::process::id()));
        tokio::fs::write(&path, "3000\n").await.unwrap();

        let mut adc = SysfsAdc::new(&path);
        assert_eq!(adc.read_raw().await.unwrap(), 3000);

        tokio::fs::remove_file(&path).await.unwrap();
        assert!(matches!(adc.read_raw().await, Err(SensorError::Io { .. })));
    }
}
