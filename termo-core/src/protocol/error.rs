use super::FrameKind;

pub type ParseResult<T> = core::result::Result<T, ProtocolError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid sync marker {0:#06X}")]
    InvalidSync(u16),
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),
    #[error("crc mismatch: frame carries {expected:#06X}, computed {actual:#06X}")]
    CrcMismatch { expected: u16, actual: u16 },
    #[error("insufficient data: needed {needed} bytes, {available} available")]
    InsufficientData { needed: usize, available: usize },
    #[error("invalid frame kind {0:#04X}")]
    InvalidFrameKind(u8),
    #[error("malformed {kind:?} payload of {len} bytes")]
    MalformedPayload { kind: FrameKind, len: usize },
    #[error("payload of {size} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { size: usize, max: usize },
    #[error("batch of {count} samples exceeds the {max} sample limit")]
    BatchTooLarge { count: usize, max: usize },
    #[error("sample batch is empty or not contiguous")]
    NonContiguousBatch,
    #[error("control payload: {0}")]
    Control(String),
    #[error("unable to reserve {0} bytes")]
    ResourceExhaustion(usize),
}
