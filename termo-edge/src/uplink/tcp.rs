use std::io::ErrorKind;
use std::net::SocketAddr;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::debug;

use super::{TransportError, Uplink};

pub struct TcpUplink {
    addr: SocketAddr,
    stream: Option<TcpStream>,
}

impl TcpUplink {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr, stream: None }
    }
}

impl Uplink for TcpUplink {
    async fn connect(&mut self) -> Result<(), TransportError> {
        self.stream = None;

        let stream = TcpStream::connect(self.addr).await?;
        stream.set_nodelay(true)?;
        debug!(addr = %self.addr, "TCP uplink connected");

        self.stream = Some(stream);
        Ok(())
    }

    async fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;

        if let Err(e) = stream.write_all(frame).await {
            self.stream = None;
            return Err(e.into());
        }

        Ok(())
    }

    fn poll_control(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let stream = self.stream.as_ref().ok_or(TransportError::NotConnected)?;

        match stream.try_read(buf) {
            Ok(0) => {
                self.stream = None;
                Err(TransportError::Closed)
            }
            Ok(n) => Ok(n),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(0),
            Err(e) => {
                self.stream = None;
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    use super::*;

    #[tokio::test]
    async fn frames_reach_the_host_and_control_bytes_come_back() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut uplink = TcpUplink::new(addr);
        assert!(matches!(
            uplink.send(b"x").await,
            Err(TransportError::NotConnected)
        ));

        uplink.connect().await.unwrap();
        let (mut host, _) = listener.accept().await.unwrap();

        uplink.send(&[1, 2, 3]).await.unwrap();
        let mut received = [0u8; 3];
        host.read_exact(&mut received).await.unwrap();
        assert_eq!(received, [1, 2, 3]);

        let mut buf = [0u8; 16];
        assert_eq!(uplink.poll_control(&mut buf).unwrap(), 0);

        host.write_all(&[9, 8]).await.unwrap();
        host.flush().await.unwrap();

        let mut got = 0;
        for _ in 0..50 {
            got = uplink.poll_control(&mut buf).unwrap();
            if got > 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(&buf[..got], &[9, 8]);

        drop(host);
        let mut closed = false;
        for _ in 0..50 {
            if matches!(uplink.poll_control(&mut buf), Err(TransportError::Closed)) {
                closed = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(closed);
    }
}
