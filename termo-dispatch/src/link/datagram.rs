use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{Link, LinkEvent, TransportError};

const DATAGRAM_QUEUE: usize = 64;

/// One peer of a shared UDP socket, seen as a byte stream.
///
/// Datagrams are pushed in by the receive loop through the sender returned
/// by [`DatagramLink::new`]; replies go straight out of the shared socket.
/// The stream ends once the peer stays silent for `idle_timeout`.
pub struct DatagramLink {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    rx: mpsc::Receiver<Vec<u8>>,
    idle_timeout: Duration,
    closed: CancellationToken,
}

impl DatagramLink {
    pub fn new(
        socket: Arc<UdpSocket>,
        peer: SocketAddr,
        idle_timeout: Duration,
    ) -> (mpsc::Sender<Vec<u8>>, Self) {
        let (tx, rx) = mpsc::channel(DATAGRAM_QUEUE);

        let link = Self {
            socket,
            peer,
            rx,
            idle_timeout,
            closed: CancellationToken::new(),
        };

        (tx, link)
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

#[async_trait]
impl Link for DatagramLink {
    async fn read(&mut self) -> Result<LinkEvent, TransportError> {
        tokio::select! {
            biased;
            received = tokio::time::timeout(self.idle_timeout, self.rx.recv()) => {
                Ok(match received {
                    Ok(Some(datagram)) => LinkEvent::Data(datagram),
                    Ok(None) | Err(_) => LinkEvent::EndOfStream,
                })
            }
            _ = self.closed.cancelled() => Ok(LinkEvent::EndOfStream),
        }
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }

        self.socket.send_to(bytes, self.peer).await?;
        Ok(())
    }

    fn closer(&self) -> CancellationToken {
        self.closed.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn loopback() -> (Arc<UdpSocket>, UdpSocket) {
        let host = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let device = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        (Arc::new(host), device)
    }

    #[tokio::test]
    async fn replies_reach_the_peer() {
        let (host, device) = loopback().await;
        let peer = device.local_addr().unwrap();
        let (tx, mut link) = DatagramLink::new(host, peer, Duration::from_secs(5));

        tx.send(vec![1, 2, 3]).await.unwrap();
        assert_eq!(link.read().await.unwrap(), LinkEvent::Data(vec![1, 2, 3]));

        link.write(&[9, 8]).await.unwrap();
        let mut buf = [0u8; 16];
        let (n, _) = device.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &[9, 8]);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_peer_ends_the_stream() {
        let (host, device) = loopback().await;
        let (_tx, mut link) =
            DatagramLink::new(host, device.local_addr().unwrap(), Duration::from_secs(10));

        assert_eq!(link.read().await.unwrap(), LinkEvent::EndOfStream);
    }

    #[tokio::test]
    async fn closed_link_refuses_writes() {
        let (host, device) = loopback().await;
        let (_tx, mut link) =
            DatagramLink::new(host, device.local_addr().unwrap(), Duration::from_secs(10));

        link.close();
        assert_eq!(link.read().await.unwrap(), LinkEvent::EndOfStream);
        assert!(matches!(link.write(&[1]).await, Err(TransportError::Closed)));
    }
}
