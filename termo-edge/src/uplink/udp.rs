use std::io::ErrorKind;
use std::net::SocketAddr;

use tokio::net::UdpSocket;

use super::{TransportError, Uplink};

/// One datagram per frame.
///
/// Replies from the host are accepted from the connected address only.
pub struct UdpUplink {
    addr: SocketAddr,
    socket: Option<UdpSocket>,
}

impl UdpUplink {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr, socket: None }
    }
}

impl Uplink for UdpUplink {
    async fn connect(&mut self) -> Result<(), TransportError> {
        let bind: SocketAddr = if self.addr.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };

        let socket = UdpSocket::bind(bind).await?;
        socket.connect(self.addr).await?;
        self.socket = Some(socket);

        Ok(())
    }

    async fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        let socket = self.socket.as_ref().ok_or(TransportError::NotConnected)?;

        if let Err(e) = socket.send(frame).await {
            self.socket = None;
            return Err(e.into());
        }

        Ok(())
    }

    fn poll_control(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let socket = self.socket.as_ref().ok_or(TransportError::NotConnected)?;

        match socket.try_recv(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(0),
            // ICMP port unreachable from an earlier send; the host is not up yet
            Err(e) if e.kind() == ErrorKind::ConnectionRefused => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn is_connectionless(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn each_frame_is_one_datagram() {
        let host = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut uplink = UdpUplink::new(host.local_addr().unwrap());
        uplink.connect().await.unwrap();

        uplink.send(&[1, 2, 3]).await.unwrap();
        uplink.send(&[4]).await.unwrap();

        let mut buf = [0u8; 64];
        let (n, from) = host.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &[1, 2, 3]);
        let (n, _) = host.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &[4]);

        host.send_to(&[7], from).await.unwrap();
        let mut got = 0;
        for _ in 0..50 {
            got = uplink.poll_control(&mut buf).unwrap();
            if got > 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(&buf[..got], &[7]);
    }
}
