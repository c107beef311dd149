use crate::{Centicelsius, Sample, StatusFlags};

use super::{FrameKind, MAX_PAYLOAD_SIZE, ParseResult, ProtocolError};

// sample record : tick_ms(4) + temperature(2) + flags(1)
pub const SAMPLE_SIZE: usize = 7;
pub const MAX_SAMPLES_PER_FRAME: usize = MAX_PAYLOAD_SIZE / SAMPLE_SIZE;

/// Appends the wire records of `samples` to `out`.
///
/// Sequence numbers are not part of the record; the frame header carries the
/// first one and the rest follow by position.
pub fn encode_samples(samples: &[Sample], out: &mut Vec<u8>) {
    for sample in samples {
        out.extend_from_slice(&sample.tick_ms.to_le_bytes());
        out.extend_from_slice(&sample.temperature.0.to_le_bytes());
        out.push(sample.flags.0);
    }
}

pub fn decode_samples(first_sequence: u32, payload: &[u8]) -> ParseResult<Vec<Sample>> {
    if payload.is_empty() || payload.len() % SAMPLE_SIZE != 0 {
        return Err(ProtocolError::MalformedPayload {
            kind: FrameKind::Samples,
            len: payload.len(),
        });
    }

    let samples = payload
        .chunks_exact(SAMPLE_SIZE)
        .enumerate()
        .map(|(i, record)| Sample {
            sequence: first_sequence.wrapping_add(i as u32),
            tick_ms: u32::from_le_bytes([record[0], record[1], record[2], record[3]]),
            temperature: Centicelsius(i16::from_le_bytes([record[4], record[5]])),
            flags: StatusFlags(record[6]),
        })
        .collect();

    Ok(samples)
}
