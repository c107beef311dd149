pub mod tcp;
pub mod udp;

pub use tcp::TcpUplink;
pub use udp::UdpUplink;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("uplink is not connected")]
    NotConnected,
    #[error("host closed the connection")]
    Closed,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Connection from a device to its host.
pub trait Uplink {
    /// Opens the connection. Called again after every failure.
    fn connect(&mut self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Sends one complete frame.
    fn send(&mut self, frame: &[u8]) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Copies bytes already received from the host into `buf` without
    /// waiting. Returns 0 when nothing is pending.
    fn poll_control(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// A host can forget a connectionless uplink without any send failing,
    /// so the device has to repeat its hello on its own.
    fn is_connectionless(&self) -> bool {
        false
    }
}
