use termo_core::protocol::{Hello, Message, MessageBody, ParseResult};
use termo_core::{DeviceId, Sample};

use crate::sampler::Reading;

/// Turns readings into frames and owns the device's sequence counter.
///
/// The counter only moves when samples are framed, so hello and heartbeat
/// frames always announce the sequence the next sample will carry.
#[derive(Debug, Default)]
pub struct Framer {
    next_sequence: u32,
}

impl Framer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(next_sequence: u32) -> Self {
        Self { next_sequence }
    }

    pub fn next_sequence(&self) -> u32 {
        self.next_sequence
    }

    /// Frames `readings` as one contiguous batch and advances the counter by
    /// its length. The counter is left untouched on error.
    pub fn encode(&mut self, readings: &[Reading]) -> ParseResult<Vec<u8>> {
        let samples = readings
            .iter()
            .enumerate()
            .map(|(i, reading)| Sample {
                sequence: self.next_sequence.wrapping_add(i as u32),
                tick_ms: reading.tick_ms,
                temperature: reading.temperature,
                flags: reading.flags,
            })
            .collect();

        let frame = Message::samples(samples)?.encode()?;
        self.next_sequence = self.next_sequence.wrapping_add(readings.len() as u32);

        Ok(frame)
    }

    pub fn hello(
        &self,
        device_id: DeviceId,
        boot_id: u32,
        sample_interval_ms: u32,
    ) -> ParseResult<Vec<u8>> {
        let hello = Hello {
            device_id,
            boot_id,
            sample_interval_ms,
        };

        Message::new(self.next_sequence, MessageBody::Hello(hello))?.encode()
    }

    pub fn heartbeat(&self) -> ParseResult<Vec<u8>> {
        Message::new(self.next_sequence, MessageBody::Heartbeat)?.encode()
    }
}
