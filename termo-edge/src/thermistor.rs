use ordered_float::NotNan;

use crate::sensor::SensorError;

const KELVIN_OFFSET: f64 = 273.15;

/// NTC thermistor in a voltage divider with a fixed series resistor,
/// converted with the Steinhart–Hart equation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thermistor {
    /// Series resistor in ohms.
    pub series_resistor: f64,
    /// Full-scale ADC count.
    pub adc_max: f64,
    pub a: f64,
    pub b: f64,
    pub c: f64,
}

impl Default for Thermistor {
    fn default() -> Self {
        Self {
            series_resistor: 10_000.0,
            adc_max: 4095.0,
            a: 1.009249522e-3,
            b: 2.378405444e-4,
            c: 2.019202697e-7,
        }
    }
}

impl Thermistor {
    /// Thermistor resistance in ohms for a raw ADC count.
    pub fn resistance(&self, raw: u32) -> Result<f64, SensorError> {
        if raw == 0 {
            return Err(SensorError::NoSignal);
        }

        let resistance = self.series_resistor * (self.adc_max / raw as f64 - 1.0);
        if resistance <= 0.0 || !resistance.is_finite() {
            return Err(SensorError::OutOfDomain(raw));
        }

        Ok(resistance)
    }

    pub fn celsius(&self, raw: u32) -> Result<NotNan<f64>, SensorError> {
        let log_r = self.resistance(raw)?.ln();
        let kelvin = 1.0 / (self.a + self.b * log_r + self.c * log_r.powi(3));

        let celsius = NotNan::new(kelvin - KELVIN_OFFSET).map_err(|_| SensorError::OutOfDomain(raw))?;
        if !celsius.is_finite() {
            return Err(SensorError::OutOfDomain(raw));
        }

        Ok(celsius)
    }
}
