//! The byte stream under a connection and the deadline-bounded I/O performed on it.
use std::{
    io,
    pin::Pin,
    task::{Context, Poll},
};

use bytes::{Buf, BytesMut};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf},
    net::TcpStream,
    time::{timeout_at, Instant},
};
use tokio_rustls::client::TlsStream;
use tokio_util::codec::Decoder as _;

use crate::{
    codec::{Decoder, RawFrame},
    Result, WebSocketError,
};

/// Initial capacity of the read buffer.
const READ_BUFFER_CAPACITY: usize = 4096;

/// A plain TCP stream or one wrapped in TLS.
pub(crate) enum MaybeTlsStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for MaybeTlsStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            Self::Tls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MaybeTlsStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            Self::Tls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_flush(cx),
            Self::Tls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            Self::Tls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Deadline-bounded reads and writes over an open stream.
///
/// Bytes that were read but not consumed yet (the tail of the handshake response, a frame
/// that arrived during a readiness probe, a partially received frame after a timeout) stay in
/// the read buffer and are used by the next read.
pub(crate) struct Transport<S = MaybeTlsStream> {
    stream: S,
    read_buf: BytesMut,
    /// Set once the peer closed its side; further reads fail with `ConnectionBroken`.
    eof: bool,
}

impl<S> Transport<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub(crate) fn new(stream: S) -> Self {
        Self {
            stream,
            read_buf: BytesMut::with_capacity(READ_BUFFER_CAPACITY),
            eof: false,
        }
    }

    /// Writes all of `data`, failing with `Timeout` once `deadline` has passed.
    pub(crate) async fn write_all(&mut self, mut data: &[u8], deadline: Instant) -> Result<()> {
        while !data.is_empty() {
            let n = match timeout_at(deadline, self.stream.write(data)).await {
                Err(_) => return Err(WebSocketError::Timeout("send timeout")),
                Ok(Err(err)) => {
                    return Err(WebSocketError::DataTransfer(format!("send failed: {err}")))
                }
                Ok(Ok(0)) => return Err(WebSocketError::ConnectionBroken),
                Ok(Ok(n)) => n,
            };
            data = &data[n..];
        }

        match timeout_at(deadline, self.stream.flush()).await {
            Err(_) => Err(WebSocketError::Timeout("send timeout")),
            Ok(Err(err)) => Err(WebSocketError::DataTransfer(format!("send failed: {err}"))),
            Ok(Ok(())) => Ok(()),
        }
    }

    /// Reads whatever is available into the buffer, returning the number of new bytes.
    ///
    /// A zero-length read means the peer closed the stream and is reported as
    /// `ConnectionBroken`, as every caller expects more bytes.
    async fn fill(&mut self, deadline: Instant) -> Result<usize> {
        if self.eof {
            return Err(WebSocketError::ConnectionBroken);
        }

        match timeout_at(deadline, self.stream.read_buf(&mut self.read_buf)).await {
            Err(_) => Err(WebSocketError::Timeout("receive timeout")),
            Ok(Err(err)) => Err(WebSocketError::DataTransfer(format!("recv failed: {err}"))),
            Ok(Ok(0)) => {
                self.eof = true;
                Err(WebSocketError::ConnectionBroken)
            }
            Ok(Ok(n)) => Ok(n),
        }
    }

    /// Decodes the next frame, reading until it is complete or `deadline` passes.
    pub(crate) async fn read_frame(
        &mut self,
        decoder: &mut Decoder,
        deadline: Instant,
    ) -> Result<RawFrame> {
        loop {
            if let Some(frame) = decoder.decode(&mut self.read_buf)? {
                return Ok(frame);
            }
            self.fill(deadline).await?;
        }
    }

    /// Reads up to and including `delimiter`, returning the consumed bytes.
    ///
    /// Returns `Ok(None)` when `limit` bytes have been buffered without finding the
    /// delimiter, leaving the buffer untouched.
    pub(crate) async fn read_until(
        &mut self,
        delimiter: &[u8],
        limit: usize,
        deadline: Instant,
    ) -> Result<Option<BytesMut>> {
        let mut searched = 0;
        loop {
            let window = &self.read_buf[..self.read_buf.len().min(limit)];
            let found = window[searched..]
                .windows(delimiter.len())
                .position(|w| w == delimiter);
            if let Some(pos) = found {
                let end = searched + pos + delimiter.len();
                return Ok(Some(self.read_buf.split_to(end)));
            }

            if self.read_buf.len() >= limit {
                return Ok(None);
            }

            // resume the search where a delimiter could still start
            searched = self.read_buf.len().saturating_sub(delimiter.len() - 1);
            self.fill(deadline).await?;
        }
    }

    /// Returns `true` as soon as there are bytes to read, without consuming them.
    ///
    /// End of stream also counts as ready, so that the following read reports the broken
    /// connection instead of the caller waiting forever.
    pub(crate) async fn is_readable(&mut self, deadline: Instant) -> Result<bool> {
        if self.read_buf.has_remaining() || self.eof {
            return Ok(true);
        }

        match self.fill(deadline).await {
            Ok(_) => Ok(true),
            Err(WebSocketError::ConnectionBroken) => Ok(true),
            Err(WebSocketError::Timeout(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    #[cfg(test)]
    pub(crate) fn buffered(&self) -> &[u8] {
        &self.read_buf
    }
}
