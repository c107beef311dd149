use serde::{Deserialize, Serialize};

use super::{FrameKind, ParseResult, ProtocolError};

/// Configuration sent from the host to a device. Carries no sample data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlCommand {
    /// Change the sampling cadence.
    SetInterval { millis: u32 },
    /// Change how many samples are packed into one frame.
    SetBatchSize { samples: u8 },
    /// Resume sampling.
    Start,
    /// Pause sampling; the device keeps sending heartbeats.
    Stop,
}

impl ControlCommand {
    pub fn to_bytes(&self) -> ParseResult<Vec<u8>> {
        postcard::to_allocvec(self).map_err(|e| ProtocolError::Control(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> ParseResult<Self> {
        let (command, rest) = postcard::take_from_bytes::<Self>(bytes)
            .map_err(|e| ProtocolError::Control(e.to_string()))?;

        if !rest.is_empty() {
            return Err(ProtocolError::MalformedPayload {
                kind: FrameKind::Control,
                len: bytes.len(),
            });
        }

        Ok(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut bytes = ControlCommand::Stop.to_bytes().unwrap();
        bytes.push(0);

        assert!(matches!(
            ControlCommand::from_bytes(&bytes),
            Err(ProtocolError::MalformedPayload { .. })
        ));
    }

    #[test]
    fn commands_are_compact() {
        let bytes = ControlCommand::SetInterval { millis: 1000 }.to_bytes().unwrap();
        // variant tag + varint(1000)
        assert_eq!(bytes.len(), 3);
        assert_eq!(
            ControlCommand::from_bytes(&bytes).unwrap(),
            ControlCommand::SetInterval { millis: 1000 }
        );
    }
}
