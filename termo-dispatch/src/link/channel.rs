use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio_util::sync::CancellationToken;

use super::{Link, LinkEvent, TransportError};

const CHANNEL_DEPTH: usize = 64;

/// In-memory link between a simulated device and its handler. Used by the
/// mock receiver and in tests.
pub struct ChannelLink {
    tx: mpsc::Sender<Vec<u8>>,
    rx: mpsc::Receiver<Vec<u8>>,
    closed: CancellationToken,
}

impl ChannelLink {
    /// Two connected ends. Closing either one closes both.
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::channel(CHANNEL_DEPTH);
        let (b_tx, b_rx) = mpsc::channel(CHANNEL_DEPTH);
        let closed = CancellationToken::new();

        (
            Self {
                tx: a_tx,
                rx: b_rx,
                closed: closed.clone(),
            },
            Self {
                tx: b_tx,
                rx: a_rx,
                closed,
            },
        )
    }

    /// Takes a chunk that already arrived without waiting. `Ok(None)` means
    /// nothing is queued yet.
    pub fn try_read(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        match self.rx.try_recv() {
            Ok(chunk) => Ok(Some(chunk)),
            Err(TryRecvError::Empty) if !self.closed.is_cancelled() => Ok(None),
            Err(_) => Err(TransportError::Closed),
        }
    }
}

#[async_trait]
impl Link for ChannelLink {
    async fn read(&mut self) -> Result<LinkEvent, TransportError> {
        // data already queued is delivered before the close is observed
        tokio::select! {
            biased;
            chunk = self.rx.recv() => Ok(chunk.map_or(LinkEvent::EndOfStream, LinkEvent::Data)),
            _ = self.closed.cancelled() => Ok(LinkEvent::EndOfStream),
        }
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }

        self.tx
            .send(bytes.to_vec())
            .await
            .map_err(|_| TransportError::Closed)
    }

    fn closer(&self) -> CancellationToken {
        self.closed.clone()
    }
}
