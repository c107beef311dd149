mod control;
mod decoder;
mod error;
mod packet;
mod sample;

pub use control::ControlCommand;
pub use decoder::{Decoder, DecoderStats, FramingError, Messages};
pub use error::{ParseResult, ProtocolError};
pub use packet::{FrameHeader, FrameKind, Hello, Message, MessageBody, checksum, encode_frame};
pub use sample::{MAX_SAMPLES_PER_FRAME, SAMPLE_SIZE, decode_samples, encode_samples};

// frame structure : sync(2) + header(8) + payload + crc(2)

pub const SYNC_MARKER: u16 = 0xE45A;
pub const SYNC_BYTES: [u8; 2] = SYNC_MARKER.to_le_bytes();
pub const PROTOCOL_VERSION: u8 = 0x01;
pub const MAX_FRAME_SIZE: usize = 128;
pub const SYNC_SIZE: usize = 2;
pub const FRAME_HEADER_SIZE: usize = 8;
pub const CRC_SIZE: usize = 2;
pub const FRAME_OVERHEAD: usize = SYNC_SIZE + FRAME_HEADER_SIZE + CRC_SIZE;
pub const MAX_PAYLOAD_SIZE: usize = MAX_FRAME_SIZE - FRAME_OVERHEAD;
