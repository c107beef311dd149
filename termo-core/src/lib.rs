use std::fmt;

use serde::{Deserialize, Serialize};

pub mod protocol;

/// Identity of a sensor node, announced in its hello frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(pub u32);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Temperature in hundredths of a degree Celsius (25.43 °C -> 2543).
///
/// Fits in 2 bytes on the wire instead of 4 for an `f32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Centicelsius(pub i16);

impl Centicelsius {
    /// Value reported when the sensor cannot produce a reading.
    pub const ABSOLUTE_ZERO: Self = Self(-27315);

    /// Converts a Celsius value to fixed point, clamping to the i16 domain.
    ///
    /// Returns the converted value and whether it had to be clamped.
    pub fn from_celsius(value: f64) -> (Self, bool) {
        let scaled = (value * 100.0).round();

        if scaled > i16::MAX as f64 {
            (Self(i16::MAX), true)
        } else if scaled < i16::MIN as f64 {
            (Self(i16::MIN), true)
        } else {
            (Self(scaled as i16), false)
        }
    }

    pub fn as_celsius(self) -> f64 {
        self.0 as f64 / 100.0
    }
}

impl fmt::Display for Centicelsius {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} °C", self.as_celsius())
    }
}

/// Per-sample condition bits reported by the device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StatusFlags(pub u8);

impl StatusFlags {
    /// The ADC could not be read or the conversion produced no finite value.
    pub const SENSOR_FAULT: Self = Self(0b0000_0001);
    /// The temperature is outside the plausible range configured on the device.
    pub const OUT_OF_RANGE: Self = Self(0b0000_0010);
    /// The temperature did not fit the fixed-point domain and was clamped.
    pub const SATURATED: Self = Self(0b0000_0100);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }
}

impl std::ops::BitOr for StatusFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// One temperature reading with its ordering metadata. Immutable once created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    /// Position of this sample in the device's output stream.
    pub sequence: u32,
    /// Device monotonic tick in milliseconds since boot (wrapping).
    pub tick_ms: u32,
    /// Measured temperature.
    pub temperature: Centicelsius,
    /// Conditions observed while sampling.
    pub flags: StatusFlags,
}

/// Ordering key of a record inside a device series.
///
/// The epoch changes each time the host sees the device boot again, so
/// sequence numbers restarting from zero never collide with older data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeriesKey {
    pub epoch: u32,
    pub sequence: u32,
}

impl SeriesKey {
    pub const MIN: Self = Self {
        epoch: 0,
        sequence: 0,
    };
    pub const MAX: Self = Self {
        epoch: u32::MAX,
        sequence: u32::MAX,
    };

    pub fn new(epoch: u32, sequence: u32) -> Self {
        Self { epoch, sequence }
    }
}

/// A sample as reconstructed by the host. Never mutated after insertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesRecord {
    /// The sample as it was received.
    pub sample: Sample,
    /// Boot epoch of the device when the sample was received.
    pub epoch: u32,
    /// Host wall clock time at which the carrying message was decoded.
    pub arrival_time: jiff::Timestamp,
    /// One or more samples before this one were never received.
    pub gap_before: bool,
    /// The sequence number was already seen (retransmission).
    pub duplicate: bool,
}

impl SeriesRecord {
    pub fn key(&self) -> SeriesKey {
        SeriesKey::new(self.epoch, self.sample.sequence)
    }
}

/// Liveness classification of a device link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkStatus {
    /// No handshake has happened yet.
    #[default]
    Disconnected,
    /// Messages arrive in order.
    Connected,
    /// The last gap exceeded the configured threshold.
    Degraded,
    /// No valid message arrived within the liveness timeout.
    Lost,
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinkStatus::Disconnected => "disconnected",
            LinkStatus::Connected => "connected",
            LinkStatus::Degraded => "degraded",
            LinkStatus::Lost => "lost",
        };
        f.write_str(s)
    }
}
