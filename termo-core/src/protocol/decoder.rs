use super::{
    CRC_SIZE, FRAME_HEADER_SIZE, FRAME_OVERHEAD, FrameHeader, MAX_FRAME_SIZE, Message,
    ParseResult, ProtocolError, SYNC_BYTES, SYNC_SIZE, checksum,
};

/// Reasons for which buffered bytes were thrown away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramingError {
    /// Bytes that precede the next sync marker.
    SyncLost,
    UnsupportedVersion,
    /// Declared payload length above the protocol limit.
    Oversize,
    UnknownKind,
    CrcMismatch,
    /// Checksum was valid but the payload does not match its kind.
    Malformed,
}

/// Counters kept by a [`Decoder`]. Framing errors are recovered locally and
/// only ever show up here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderStats {
    pub messages: u64,
    pub bytes_discarded: u64,
    pub sync_lost: u64,
    pub unsupported_version: u64,
    pub oversize: u64,
    pub unknown_kind: u64,
    pub crc_mismatch: u64,
    pub malformed: u64,
}

impl DecoderStats {
    pub fn framing_errors(&self) -> u64 {
        self.sync_lost
            + self.unsupported_version
            + self.oversize
            + self.unknown_kind
            + self.crc_mismatch
            + self.malformed
    }

    fn record(&mut self, error: FramingError, discarded: usize) {
        self.bytes_discarded += discarded as u64;

        let counter = match error {
            FramingError::SyncLost => &mut self.sync_lost,
            FramingError::UnsupportedVersion => &mut self.unsupported_version,
            FramingError::Oversize => &mut self.oversize,
            FramingError::UnknownKind => &mut self.unknown_kind,
            FramingError::CrcMismatch => &mut self.crc_mismatch,
            FramingError::Malformed => &mut self.malformed,
        };
        *counter += 1;
    }
}

enum Step {
    Emit(Message, usize),
    Discard(usize, FramingError),
    NeedMore,
}

/// Incremental frame decoder over an unreliable byte stream.
///
/// Bytes are buffered across [`Decoder::feed`] calls. Corrupt input is
/// skipped by discarding a single byte and scanning again for the sync
/// marker, so the decoder never stalls on garbage for longer than one
/// frame's worth of bytes.
#[derive(Debug, Default)]
pub struct Decoder {
    buf: Vec<u8>,
    stats: DecoderStats,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(MAX_FRAME_SIZE * 2),
            stats: DecoderStats::default(),
        }
    }

    /// Buffers `chunk` and returns a lazy iterator over the messages that
    /// became complete.
    ///
    /// Dropping the iterator before it is exhausted keeps the remaining bytes
    /// buffered; they are picked up by the next call.
    pub fn feed(&mut self, chunk: &[u8]) -> ParseResult<Messages<'_>> {
        self.buf
            .try_reserve(chunk.len())
            .map_err(|_| ProtocolError::ResourceExhaustion(chunk.len()))?;
        self.buf.extend_from_slice(chunk);

        Ok(Messages { decoder: self })
    }

    /// Pops the next complete message out of the buffered bytes.
    pub fn next_message(&mut self) -> Option<Message> {
        loop {
            match self.step() {
                Step::Emit(message, consumed) => {
                    self.buf.drain(..consumed);
                    self.stats.messages += 1;
                    return Some(message);
                }
                Step::Discard(count, error) => {
                    self.buf.drain(..count);
                    self.stats.record(error, count);
                }
                Step::NeedMore => return None,
            }
        }
    }

    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    /// Number of bytes waiting for the rest of their frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Drops any partial frame, e.g. after the link was re-established.
    pub fn reset(&mut self) {
        self.buf.clear();
    }

    fn step(&self) -> Step {
        let buf = &self.buf;

        let Some(start) = buf.windows(SYNC_SIZE).position(|w| w == SYNC_BYTES) else {
            // keep a trailing first half of the marker
            let keep = usize::from(buf.last() == Some(&SYNC_BYTES[0]));
            let drop = buf.len() - keep;
            return if drop > 0 {
                Step::Discard(drop, FramingError::SyncLost)
            } else {
                Step::NeedMore
            };
        };

        if start > 0 {
            return Step::Discard(start, FramingError::SyncLost);
        }

        if buf.len() < SYNC_SIZE + FRAME_HEADER_SIZE {
            return Step::NeedMore;
        }

        let header = match FrameHeader::from_bytes(&buf[SYNC_SIZE..SYNC_SIZE + FRAME_HEADER_SIZE]) {
            Ok(header) => header,
            Err(ProtocolError::UnsupportedVersion(_)) => {
                return Step::Discard(1, FramingError::UnsupportedVersion);
            }
            Err(ProtocolError::PayloadTooLarge { .. }) => {
                return Step::Discard(1, FramingError::Oversize);
            }
            Err(ProtocolError::InvalidFrameKind(_)) => return Self::unknown_kind(buf),
            Err(_) => return Step::Discard(1, FramingError::Malformed),
        };

        let frame_len = header.frame_len();
        if buf.len() < frame_len {
            return Step::NeedMore;
        }

        match Message::from_frame(&buf[..frame_len]) {
            Ok(message) => Step::Emit(message, frame_len),
            Err(ProtocolError::CrcMismatch { .. }) => Step::Discard(1, FramingError::CrcMismatch),
            Err(_) => Step::Discard(frame_len, FramingError::Malformed),
        }
    }

    /// A header with a kind we do not know. Version and length were checked
    /// before the kind, so the checksum decides whether this is a real frame
    /// to skip whole or noise that only looked like a header.
    fn unknown_kind(buf: &[u8]) -> Step {
        let payload_len = u16::from_le_bytes([buf[SYNC_SIZE + 2], buf[SYNC_SIZE + 3]]);
        let frame_len = FRAME_OVERHEAD + payload_len as usize;
        if buf.len() < frame_len {
            return Step::NeedMore;
        }

        let crc_at = frame_len - CRC_SIZE;
        let expected = u16::from_le_bytes([buf[crc_at], buf[crc_at + 1]]);
        if checksum(&buf[..crc_at]) == expected {
            Step::Discard(frame_len, FramingError::UnknownKind)
        } else {
            Step::Discard(1, FramingError::CrcMismatch)
        }
    }
}

/// Messages completed by the bytes fed so far.
pub struct Messages<'a> {
    decoder: &'a mut Decoder,
}

impl Iterator for Messages<'_> {
    type Item = Message;

    fn next(&mut self) -> Option<Message> {
        self.decoder.next_message()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{FrameKind, MessageBody, encode_frame};
    use crate::{Centicelsius, Sample, StatusFlags};

    fn sample(sequence: u32) -> Sample {
        Sample {
            sequence,
            tick_ms: 1000 + sequence,
            temperature: Centicelsius(2543),
            flags: StatusFlags::empty(),
        }
    }

    fn frame(sequence: u32) -> Vec<u8> {
        Message::samples(vec![sample(sequence)])
            .unwrap()
            .encode()
            .unwrap()
    }

    fn sequences(messages: impl Iterator<Item = Message>) -> Vec<u32> {
        messages.map(|m| m.sequence()).collect()
    }

    #[test]
    fn partial_frames_are_buffered_across_feeds() {
        let bytes = frame(1);
        let mut decoder = Decoder::new();

        assert_eq!(decoder.feed(&bytes[..5]).unwrap().count(), 0);
        assert_eq!(decoder.feed(&bytes[5..11]).unwrap().count(), 0);
        assert_eq!(decoder.buffered(), 11);

        let messages: Vec<_> = decoder.feed(&bytes[11..]).unwrap().collect();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].body, MessageBody::Samples(vec![sample(1)]));
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn dropping_the_iterator_keeps_remaining_messages() {
        let mut stream = frame(1);
        stream.extend(frame(2));
        stream.extend(frame(3));

        let mut decoder = Decoder::new();
        let first = decoder.feed(&stream).unwrap().next().unwrap();
        assert_eq!(first.sequence(), 1);

        assert_eq!(sequences(decoder.feed(&[]).unwrap()), vec![2, 3]);
    }

    #[test]
    fn leading_garbage_is_skipped() {
        let mut stream = vec![0x00, 0xFF, 0x13, 0x37, 0xE4];
        stream.extend(frame(9));

        let mut decoder = Decoder::new();
        assert_eq!(sequences(decoder.feed(&stream).unwrap()), vec![9]);

        let stats = decoder.stats();
        assert_eq!(stats.bytes_discarded, 5);
        assert_eq!(stats.sync_lost, 1);
    }

    #[test]
    fn garbage_without_marker_does_not_accumulate() {
        let mut decoder = Decoder::new();
        decoder.feed(&[0x11; 300]).unwrap().for_each(drop);
        assert_eq!(decoder.buffered(), 0);

        decoder.feed(&[0x11, SYNC_BYTES[0]]).unwrap().for_each(drop);
        assert_eq!(decoder.buffered(), 1);
    }

    #[test]
    fn crc_failure_resyncs_on_next_frame() {
        let mut corrupt = frame(1);
        let last = corrupt.len() - 1;
        corrupt[last] ^= 0xFF;

        let mut stream = corrupt.clone();
        stream.extend(frame(2));

        let mut decoder = Decoder::new();
        assert_eq!(sequences(decoder.feed(&stream).unwrap()), vec![2]);

        let stats = decoder.stats();
        assert_eq!(stats.crc_mismatch, 1);
        assert_eq!(stats.bytes_discarded, corrupt.len() as u64);
    }

    #[test]
    fn valid_crc_with_bad_payload_discards_whole_frame() {
        let mut stream = encode_frame(FrameKind::Samples, 5, &[0u8; 3]).unwrap();
        let bad_len = stream.len();
        stream.extend(frame(6));

        let mut decoder = Decoder::new();
        assert_eq!(sequences(decoder.feed(&stream).unwrap()), vec![6]);

        let stats = decoder.stats();
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.bytes_discarded, bad_len as u64);
    }

    fn with_kind(mut bytes: Vec<u8>, kind: u8) -> Vec<u8> {
        bytes[3] = kind;
        let crc_at = bytes.len() - CRC_SIZE;
        let crc = checksum(&bytes[..crc_at]);
        bytes[crc_at..].copy_from_slice(&crc.to_le_bytes());
        bytes
    }

    #[test]
    fn unknown_kind_with_valid_crc_discards_whole_frame() {
        let unknown = with_kind(frame(5), 0x7E);
        let mut stream = unknown.clone();
        stream.extend(frame(6));

        let mut decoder = Decoder::new();
        assert_eq!(sequences(decoder.feed(&stream).unwrap()), vec![6]);

        let stats = decoder.stats();
        assert_eq!(stats.unknown_kind, 1);
        assert_eq!(stats.crc_mismatch, 0);
        assert_eq!(stats.bytes_discarded, unknown.len() as u64);
    }

    #[test]
    fn unknown_kind_waits_for_the_whole_frame() {
        let unknown = with_kind(frame(5), 0x7E);

        let mut decoder = Decoder::new();
        assert_eq!(decoder.feed(&unknown[..12]).unwrap().count(), 0);
        assert_eq!(decoder.buffered(), 12);

        assert_eq!(decoder.feed(&unknown[12..]).unwrap().count(), 0);
        assert_eq!(decoder.buffered(), 0);
        assert_eq!(decoder.stats().unknown_kind, 1);
    }

    #[test]
    fn unknown_kind_with_bad_crc_is_rescanned() {
        let mut noise = with_kind(frame(5), 0x7E);
        let last = noise.len() - 1;
        noise[last] ^= 0xFF;
        let mut stream = noise.clone();
        stream.extend(frame(6));

        let mut decoder = Decoder::new();
        assert_eq!(sequences(decoder.feed(&stream).unwrap()), vec![6]);

        let stats = decoder.stats();
        assert_eq!(stats.unknown_kind, 0);
        assert_eq!(stats.crc_mismatch, 1);
        assert_eq!(stats.bytes_discarded, noise.len() as u64);
    }

    #[test]
    fn oversize_length_is_rejected_without_waiting() {
        let mut bogus = frame(1);
        bogus[4] = 0xFF;
        bogus[5] = 0x7F;
        bogus.truncate(10);
        bogus.extend(frame(2));

        let mut decoder = Decoder::new();
        assert_eq!(sequences(decoder.feed(&bogus).unwrap()), vec![2]);
        assert_eq!(decoder.stats().oversize, 1);
    }

    #[test]
    fn unsupported_version_is_skipped() {
        let mut old = frame(1);
        old[2] = 0x09;
        old.extend(frame(2));

        let mut decoder = Decoder::new();
        assert_eq!(sequences(decoder.feed(&old).unwrap()), vec![2]);
        assert_eq!(decoder.stats().unsupported_version, 1);
    }

    #[test]
    fn reset_drops_partial_frame() {
        let bytes = frame(1);
        let mut decoder = Decoder::new();
        decoder.feed(&bytes[..7]).unwrap().for_each(drop);

        decoder.reset();
        assert_eq!(decoder.buffered(), 0);
        assert_eq!(sequences(decoder.feed(&frame(2)).unwrap()), vec![2]);
    }
}
