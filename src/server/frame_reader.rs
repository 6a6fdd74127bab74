//! Pull-based frame reader over a byte stream.
//!
//! SOCKS5 fields arrive in arbitrary fragments: a client may send the whole
//! handshake in one segment or one byte at a time. [`FrameReader`] buffers
//! whatever has arrived and hands out exactly the requested number of bytes,
//! keeping any surplus for the next read. Once the handshake is over the
//! reader itself is the client stream: its [`AsyncRead`] impl drains the
//! surplus before touching the inner stream, so no payload byte that arrived
//! early is lost.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};

const INITIAL_CAPACITY: usize = 512;

/// Buffered reader that yields exact-length frames.
#[derive(Debug)]
pub struct FrameReader<S> {
    inner: S,
    buffer: BytesMut,
}

impl<S> FrameReader<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            buffer: BytesMut::with_capacity(INITIAL_CAPACITY),
        }
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    /// Number of bytes received but not yet consumed.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Split into the inner stream and any unconsumed bytes.
    pub fn into_inner(self) -> (S, Bytes) {
        (self.inner, self.buffer.freeze())
    }
}

impl<S: AsyncRead + Unpin> FrameReader<S> {
    /// Wait until `n` bytes are available and return exactly those bytes.
    ///
    /// Returns `UnexpectedEof` if the stream ends first. Bytes already
    /// buffered stay buffered in that case.
    pub async fn read_frame(&mut self, n: usize) -> io::Result<Bytes> {
        while self.buffer.len() < n {
            self.buffer.reserve(n - self.buffer.len());
            let read = self.inner.read_buf(&mut self.buffer).await?;
            if read == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!(
                        "stream closed with {} of {} bytes received",
                        self.buffer.len(),
                        n
                    ),
                ));
            }
        }
        Ok(self.buffer.split_to(n).freeze())
    }

    pub async fn read_u8(&mut self) -> io::Result<u8> {
        let frame = self.read_frame(1).await?;
        Ok(frame[0])
    }

    pub async fn read_u16(&mut self) -> io::Result<u16> {
        let mut frame = self.read_frame(2).await?;
        Ok(frame.get_u16())
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for FrameReader<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if !this.buffer.is_empty() {
            let n = this.buffer.len().min(buf.remaining());
            buf.put_slice(&this.buffer[..n]);
            this.buffer.advance(n);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for FrameReader<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncWriteExt};

    #[tokio::test]
    async fn test_surplus_is_retained() {
        let (mut client, server) = duplex(64);
        client.write_all(&[1, 2, 3, 4, 5]).await.unwrap();

        let mut reader = FrameReader::new(server);
        assert_eq!(&reader.read_frame(2).await.unwrap()[..], &[1, 2]);
        assert_eq!(reader.buffered(), 3);
        assert_eq!(reader.read_u8().await.unwrap(), 3);
        assert_eq!(reader.read_u16().await.unwrap(), 0x0405);
        assert_eq!(reader.buffered(), 0);
    }

    #[tokio::test]
    async fn test_fragmented_input_is_reassembled() {
        let (mut client, server) = duplex(64);
        let writer = tokio::spawn(async move {
            for b in [0xAAu8, 0xBB, 0xCC, 0xDD] {
                client.write_all(&[b]).await.unwrap();
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
            client
        });

        let mut reader = FrameReader::new(server);
        let frame = reader.read_frame(4).await.unwrap();
        assert_eq!(&frame[..], &[0xAA, 0xBB, 0xCC, 0xDD]);
        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn test_eof_mid_frame() {
        let (mut client, server) = duplex(64);
        client.write_all(&[9, 9]).await.unwrap();
        drop(client);

        let mut reader = FrameReader::new(server);
        let err = reader.read_frame(3).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_async_read_drains_surplus_first() {
        let (mut client, server) = duplex(64);
        client.write_all(&[5, 1, 0, b'h', b'i']).await.unwrap();

        let mut reader = FrameReader::new(server);
        reader.read_frame(3).await.unwrap();

        let mut head = [0u8; 2];
        reader.read_exact(&mut head).await.unwrap();
        assert_eq!(&head, b"hi");

        client.write_all(b"!").await.unwrap();
        assert_eq!(reader.read_u8().await.unwrap(), b'!');
    }

    #[tokio::test]
    async fn test_into_inner_returns_unconsumed() {
        let (mut client, server) = duplex(64);
        client.write_all(&[1, 2, 3]).await.unwrap();

        let mut reader = FrameReader::new(server);
        reader.read_u8().await.unwrap();
        let (_stream, rest) = reader.into_inner();
        assert_eq!(&rest[..], &[2, 3]);
    }
}
