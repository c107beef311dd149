use crate::{DeviceId, Sample};

use super::{
    ControlCommand, FRAME_HEADER_SIZE, FRAME_OVERHEAD, MAX_PAYLOAD_SIZE, MAX_SAMPLES_PER_FRAME,
    PROTOCOL_VERSION, ParseResult, ProtocolError, SYNC_MARKER, SYNC_SIZE, decode_samples,
    encode_samples,
};

// CRC-16/IBM-3740, also known as CRC-16/CCITT-FALSE
const CRC16: crc::Crc<u16> = crc::Crc::<u16>::new(&crc::CRC_16_IBM_3740);

/// Checksum carried at the end of every frame, computed over sync, header and payload.
pub fn checksum(bytes: &[u8]) -> u16 {
    CRC16.checksum(bytes)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Samples = 0x01,
    Heartbeat = 0x02,
    Hello = 0x03,
    Control = 0x04,
}

impl TryFrom<u8> for FrameKind {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(FrameKind::Samples),
            0x02 => Ok(FrameKind::Heartbeat),
            0x03 => Ok(FrameKind::Hello),
            0x04 => Ok(FrameKind::Control),
            _ => Err(ProtocolError::InvalidFrameKind(value)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: u8,
    pub kind: FrameKind,
    pub payload_len: u16,
    pub sequence: u32,
}

impl FrameHeader {
    pub fn new(kind: FrameKind, payload_len: u16, sequence: u32) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            kind,
            payload_len,
            sequence,
        }
    }

    /// Parses the header that follows the sync marker.
    pub fn from_bytes(bytes: &[u8]) -> ParseResult<Self> {
        if bytes.len() < FRAME_HEADER_SIZE {
            return Err(ProtocolError::InsufficientData {
                needed: FRAME_HEADER_SIZE,
                available: bytes.len(),
            });
        }

        if bytes[0] != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion(bytes[0]));
        }

        let payload_len = u16::from_le_bytes([bytes[2], bytes[3]]);
        if payload_len as usize > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload_len as usize,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        Ok(Self {
            version: bytes[0],
            kind: FrameKind::try_from(bytes[1])?,
            payload_len,
            sequence: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        })
    }

    pub fn to_bytes(&self) -> [u8; FRAME_HEADER_SIZE] {
        let mut bytes = [0u8; FRAME_HEADER_SIZE];

        bytes[0] = self.version;
        bytes[1] = self.kind as u8;
        bytes[2..4].copy_from_slice(&self.payload_len.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.sequence.to_le_bytes());

        bytes
    }

    /// Total size of the frame this header announces.
    pub fn frame_len(&self) -> usize {
        FRAME_OVERHEAD + self.payload_len as usize
    }
}

/// Builds a complete frame: sync, header, payload and checksum.
pub fn encode_frame(kind: FrameKind, sequence: u32, payload: &[u8]) -> ParseResult<Vec<u8>> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD_SIZE,
        });
    }

    let total_len = FRAME_OVERHEAD + payload.len();
    let mut bytes = Vec::new();
    bytes
        .try_reserve_exact(total_len)
        .map_err(|_| ProtocolError::ResourceExhaustion(total_len))?;

    let header = FrameHeader::new(kind, payload.len() as u16, sequence);
    bytes.extend_from_slice(&SYNC_MARKER.to_le_bytes());
    bytes.extend_from_slice(&header.to_bytes());
    bytes.extend_from_slice(payload);

    let crc = checksum(&bytes);
    bytes.extend_from_slice(&crc.to_le_bytes());

    Ok(bytes)
}

/// Handshake sent by a device each time its link is (re-)established.
///
/// The sequence number of the carrying frame is the next sequence the device
/// will use for a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hello {
    pub device_id: DeviceId,
    /// Random value chosen once per device boot.
    pub boot_id: u32,
    pub sample_interval_ms: u32,
}

impl Hello {
    pub const SIZE: usize = 12;

    pub fn from_bytes(bytes: &[u8]) -> ParseResult<Self> {
        if bytes.len() != Self::SIZE {
            return Err(ProtocolError::MalformedPayload {
                kind: FrameKind::Hello,
                len: bytes.len(),
            });
        }

        Ok(Self {
            device_id: DeviceId(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
            boot_id: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            sample_interval_ms: u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
        })
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];

        bytes[0..4].copy_from_slice(&self.device_id.0.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.boot_id.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.sample_interval_ms.to_le_bytes());

        bytes
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    Samples(Vec<Sample>),
    Heartbeat,
    Hello(Hello),
    Control(ControlCommand),
}

impl MessageBody {
    pub fn kind(&self) -> FrameKind {
        match self {
            MessageBody::Samples(_) => FrameKind::Samples,
            MessageBody::Heartbeat => FrameKind::Heartbeat,
            MessageBody::Hello(_) => FrameKind::Hello,
            MessageBody::Control(_) => FrameKind::Control,
        }
    }

    fn parse(kind: FrameKind, sequence: u32, payload: &[u8]) -> ParseResult<Self> {
        match kind {
            FrameKind::Samples => decode_samples(sequence, payload).map(MessageBody::Samples),
            FrameKind::Heartbeat if payload.is_empty() => Ok(MessageBody::Heartbeat),
            FrameKind::Heartbeat => Err(ProtocolError::MalformedPayload {
                kind,
                len: payload.len(),
            }),
            FrameKind::Hello => Hello::from_bytes(payload).map(MessageBody::Hello),
            FrameKind::Control => ControlCommand::from_bytes(payload).map(MessageBody::Control),
        }
    }

    fn payload(&self) -> ParseResult<Vec<u8>> {
        match self {
            MessageBody::Samples(samples) => {
                if samples.len() > MAX_SAMPLES_PER_FRAME {
                    return Err(ProtocolError::BatchTooLarge {
                        count: samples.len(),
                        max: MAX_SAMPLES_PER_FRAME,
                    });
                }

                let mut payload = Vec::with_capacity(samples.len() * super::SAMPLE_SIZE);
                encode_samples(samples, &mut payload);
                Ok(payload)
            }
            MessageBody::Heartbeat => Ok(Vec::new()),
            MessageBody::Hello(hello) => Ok(hello.to_bytes().to_vec()),
            MessageBody::Control(command) => command.to_bytes(),
        }
    }
}

/// A decoded, checksum-validated frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub header: FrameHeader,
    pub body: MessageBody,
}

impl Message {
    /// Builds a sample message. The batch must be non-empty and contiguous.
    pub fn samples(samples: Vec<Sample>) -> ParseResult<Self> {
        let first = samples.first().ok_or(ProtocolError::NonContiguousBatch)?;
        let contiguous = samples
            .iter()
            .enumerate()
            .all(|(i, s)| s.sequence == first.sequence.wrapping_add(i as u32));
        if !contiguous {
            return Err(ProtocolError::NonContiguousBatch);
        }

        Self::new(first.sequence, MessageBody::Samples(samples))
    }

    pub fn new(sequence: u32, body: MessageBody) -> ParseResult<Self> {
        let payload_len = body.payload()?.len();
        if payload_len > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload_len,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        Ok(Self {
            header: FrameHeader::new(body.kind(), payload_len as u16, sequence),
            body,
        })
    }

    pub fn sequence(&self) -> u32 {
        self.header.sequence
    }

    pub fn encode(&self) -> ParseResult<Vec<u8>> {
        let payload = self.body.payload()?;
        encode_frame(self.body.kind(), self.header.sequence, &payload)
    }

    /// Validates and parses one complete frame.
    pub fn from_frame(bytes: &[u8]) -> ParseResult<Self> {
        if bytes.len() < FRAME_OVERHEAD {
            return Err(ProtocolError::InsufficientData {
                needed: FRAME_OVERHEAD,
                available: bytes.len(),
            });
        }

        let sync = u16::from_le_bytes([bytes[0], bytes[1]]);
        if sync != SYNC_MARKER {
            return Err(ProtocolError::InvalidSync(sync));
        }

        let header = FrameHeader::from_bytes(&bytes[SYNC_SIZE..SYNC_SIZE + FRAME_HEADER_SIZE])?;
        let frame_len = header.frame_len();
        if bytes.len() < frame_len {
            return Err(ProtocolError::InsufficientData {
                needed: frame_len,
                available: bytes.len(),
            });
        }

        let crc_at = frame_len - super::CRC_SIZE;
        let expected = u16::from_le_bytes([bytes[crc_at], bytes[crc_at + 1]]);
        let actual = checksum(&bytes[..crc_at]);
        if expected != actual {
            return Err(ProtocolError::CrcMismatch { expected, actual });
        }

        let payload = &bytes[SYNC_SIZE + FRAME_HEADER_SIZE..crc_at];
        let body = MessageBody::parse(header.kind, header.sequence, payload)?;

        Ok(Self { header, body })
    }
}
