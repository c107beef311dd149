use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use super::{Link, LinkEvent, TransportError};

const READ_CHUNK: usize = 256;

/// Link over any byte stream: a TCP connection, a serial device file, or an
/// in-memory duplex in tests.
pub struct StreamLink<S> {
    stream: S,
    buf: [u8; READ_CHUNK],
    closed: CancellationToken,
}

impl<S> StreamLink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buf: [0u8; READ_CHUNK],
            closed: CancellationToken::new(),
        }
    }
}

#[async_trait]
impl<S> Link for StreamLink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn read(&mut self) -> Result<LinkEvent, TransportError> {
        if self.closed.is_cancelled() {
            return Ok(LinkEvent::EndOfStream);
        }

        let read = tokio::select! {
            _ = self.closed.cancelled() => return Ok(LinkEvent::EndOfStream),
            read = self.stream.read(&mut self.buf) => read,
        };

        match read? {
            0 => Ok(LinkEvent::EndOfStream),
            n => Ok(LinkEvent::Data(self.buf[..n].to_vec())),
        }
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }

        self.stream.write_all(bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }

    fn closer(&self) -> CancellationToken {
        self.closed.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;

    #[tokio::test]
    async fn reads_chunks_until_peer_closes() {
        let (near, mut far) = tokio::io::duplex(64);
        let mut link = StreamLink::new(near);

        far.write_all(&[1, 2, 3]).await.unwrap();
        assert_eq!(link.read().await.unwrap(), LinkEvent::Data(vec![1, 2, 3]));

        link.write(&[7]).await.unwrap();
        let mut back = [0u8; 1];
        far.read_exact(&mut back).await.unwrap();
        assert_eq!(back, [7]);

        drop(far);
        assert_eq!(link.read().await.unwrap(), LinkEvent::EndOfStream);
    }

    #[tokio::test]
    async fn closer_unblocks_a_pending_read() {
        let (near, _far) = tokio::io::duplex(64);
        let mut link = StreamLink::new(near);
        let closer = link.closer();

        let reader = tokio::spawn(async move { link.read().await.unwrap() });
        closer.cancel();

        assert_eq!(reader.await.unwrap(), LinkEvent::EndOfStream);
    }

    struct Broken;

    impl AsyncRead for Broken {
        fn poll_read(
            self: std::pin::Pin<&mut Self>,
            _: &mut std::task::Context<'_>,
            _: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<io::Result<()>> {
            std::task::Poll::Ready(Err(io::ErrorKind::ConnectionReset.into()))
        }
    }

    impl AsyncWrite for Broken {
        fn poll_write(
            self: std::pin::Pin<&mut Self>,
            _: &mut std::task::Context<'_>,
            _: &[u8],
        ) -> std::task::Poll<io::Result<usize>> {
            std::task::Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()))
        }

        fn poll_flush(
            self: std::pin::Pin<&mut Self>,
            _: &mut std::task::Context<'_>,
        ) -> std::task::Poll<io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }

        fn poll_shutdown(
            self: std::pin::Pin<&mut Self>,
            _: &mut std::task::Context<'_>,
        ) -> std::task::Poll<io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn disconnect_is_an_error_not_end_of_stream() {
        let mut link = StreamLink::new(Broken);

        assert!(matches!(link.read().await, Err(TransportError::Io(_))));
        assert!(link.write(&[1]).await.is_err());
    }
}
