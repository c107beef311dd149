pub mod channel;
pub mod datagram;
pub mod stream;

pub use channel::ChannelLink;
pub use datagram::DatagramLink;
pub use stream::StreamLink;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("link is closed")]
    Closed,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// What a read on a [`Link`] produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Bytes in arrival order. Chunk boundaries carry no meaning.
    Data(Vec<u8>),
    /// The peer closed the link, or it was closed locally.
    EndOfStream,
}

/// Ordered, possibly lossy byte link to a single device.
///
/// A read that has nothing to return yet simply stays pending; only a broken
/// link is an error.
#[async_trait]
pub trait Link: Send {
    /// Waits for the next chunk. Cancel safe.
    async fn read(&mut self) -> Result<LinkEvent, TransportError>;

    async fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Handle that closes the link from another task. Pending and future
    /// reads return [`LinkEvent::EndOfStream`].
    fn closer(&self) -> CancellationToken;

    fn close(&mut self) {
        self.closer().cancel();
    }
}
