use std::ops::RangeInclusive;

use termo_core::{Centicelsius, StatusFlags};
use tokio::time::Instant;
use tracing::warn;

use crate::sensor::Adc;
use crate::thermistor::Thermistor;

/// Plausible operating range of the probe, in °C.
pub const DEFAULT_RANGE: RangeInclusive<f64> = -40.0..=125.0;

/// A converted measurement that has not been given a sequence number yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reading {
    /// Milliseconds since the sampler started, wrapping.
    pub tick_ms: u32,
    pub temperature: Centicelsius,
    pub flags: StatusFlags,
}

impl Reading {
    pub fn fault(tick_ms: u32) -> Self {
        Self {
            tick_ms,
            temperature: Centicelsius::ABSOLUTE_ZERO,
            flags: StatusFlags::SENSOR_FAULT,
        }
    }
}

pub struct Sampler<A> {
    adc: A,
    thermistor: Thermistor,
    range: RangeInclusive<f64>,
    started: Instant,
}

impl<A: Adc> Sampler<A> {
    pub fn new(adc: A, thermistor: Thermistor, range: RangeInclusive<f64>) -> Self {
        Self {
            adc,
            thermistor,
            range,
            started: Instant::now(),
        }
    }

    pub fn tick_ms(&self) -> u32 {
        // truncation is the wrap
        self.started.elapsed().as_millis() as u32
    }

    /// Reads and converts one value. Failures are reported through the flags
    /// rather than as errors so that every interval yields a sample.
    pub async fn sample(&mut self) -> Reading {
        let tick_ms = self.tick_ms();

        let celsius = match self.adc.read_raw().await {
            Ok(raw) => match self.thermistor.celsius(raw) {
                Ok(celsius) => celsius,
                Err(e) => {
                    warn!(raw, error = %e, "Thermistor conversion failed");
                    return Reading::fault(tick_ms);
                }
            },
            Err(e) => {
                warn!(error = %e, "ADC read failed");
                return Reading::fault(tick_ms);
            }
        };

        let mut flags = StatusFlags::empty();
        if !self.range.contains(&celsius.into_inner()) {
            flags.insert(StatusFlags::OUT_OF_RANGE);
        }

        let (temperature, saturated) = Centicelsius::from_celsius(celsius.into_inner());
        if saturated {
            flags.insert(StatusFlags::SATURATED);
        }

        Reading {
            tick_ms,
            temperature,
            flags,
        }
    }
}
