//! Framed packet I/O over async byte streams.
//!
//! Frames have no length prefix: the opcode byte determines the size of the
//! rest of the frame. Every read and write is bounded by `IO_TIMEOUT`.

use log::{log_enabled, trace, Level};
use shared::{ClientPacket, ProtocolError, ServerPacket};
use std::fmt::Write as _;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter, ReadBuf};
use tokio::time::timeout;

pub const IO_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("connection closed")]
    Closed,
    #[error("timed out after {0:?}")]
    TimedOut(Duration),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl CodecError {
    /// Transport failures end a session like a normal disconnect.
    pub fn is_transport(&self) -> bool {
        !matches!(self, CodecError::Protocol(_))
    }
}

/// A packet type that can be framed in one direction.
pub trait Frame: Sized {
    fn frame_size(opcode: u8) -> Result<usize, ProtocolError>;
    fn decode_frame(frame: &[u8]) -> Result<Self, ProtocolError>;
    fn encode(&self) -> Vec<u8>;
}

impl Frame for ClientPacket {
    fn frame_size(opcode: u8) -> Result<usize, ProtocolError> {
        ClientPacket::frame_size(opcode)
    }

    fn decode_frame(frame: &[u8]) -> Result<Self, ProtocolError> {
        ClientPacket::decode_frame(frame)
    }

    fn encode(&self) -> Vec<u8> {
        ClientPacket::encode(self)
    }
}

impl Frame for ServerPacket {
    fn frame_size(opcode: u8) -> Result<usize, ProtocolError> {
        ServerPacket::frame_size(opcode)
    }

    fn decode_frame(frame: &[u8]) -> Result<Self, ProtocolError> {
        ServerPacket::decode_frame(frame)
    }

    fn encode(&self) -> Vec<u8> {
        ServerPacket::encode(self)
    }
}

async fn bounded<T, F>(limit: Duration, io: F) -> Result<T, CodecError>
where
    F: std::future::Future<Output = io::Result<T>>,
{
    match timeout(limit, io).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) if e.kind() == io::ErrorKind::UnexpectedEof => Err(CodecError::Closed),
        Ok(Err(e)) => Err(CodecError::Io(e)),
        Err(_) => Err(CodecError::TimedOut(limit)),
    }
}

pub struct PacketReader<R> {
    inner: R,
    timeout: Duration,
}

impl<R: AsyncRead + Unpin> PacketReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_timeout(inner, IO_TIMEOUT)
    }

    pub fn with_timeout(inner: R, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    /// Reads one frame, failing if any part of it takes longer than the
    /// timeout to arrive.
    pub async fn read_frame<P: Frame>(&mut self) -> Result<P, CodecError> {
        let opcode = bounded(self.timeout, self.inner.read_u8()).await?;
        self.read_body(opcode).await
    }

    /// Waits as long as needed for the next opcode, then reads the rest of
    /// the frame under the timeout.
    pub async fn next_frame<P: Frame>(&mut self) -> Result<P, CodecError> {
        let opcode = match self.inner.read_u8().await {
            Ok(opcode) => opcode,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Err(CodecError::Closed),
            Err(e) => return Err(CodecError::Io(e)),
        };
        self.read_body(opcode).await
    }

    async fn read_body<P: Frame>(&mut self, opcode: u8) -> Result<P, CodecError> {
        let size = P::frame_size(opcode)?;
        let mut frame = vec![0u8; size];
        frame[0] = opcode;
        if size > 1 {
            bounded(self.timeout, self.inner.read_exact(&mut frame[1..])).await?;
        }
        Ok(P::decode_frame(&frame)?)
    }
}

/// Buffered frame writer. Frames are not sent until [`PacketWriter::flush`].
pub struct PacketWriter<W> {
    inner: BufWriter<W>,
    timeout: Duration,
}

impl<W: AsyncWrite + Unpin> PacketWriter<W> {
    pub fn new(inner: W) -> Self {
        Self::with_timeout(inner, IO_TIMEOUT)
    }

    pub fn with_timeout(inner: W, timeout: Duration) -> Self {
        Self {
            inner: BufWriter::new(inner),
            timeout,
        }
    }

    pub async fn write_frame<P: Frame>(&mut self, packet: &P) -> Result<(), CodecError> {
        let bytes = packet.encode();
        bounded(self.timeout, self.inner.write_all(&bytes)).await
    }

    pub async fn flush(&mut self) -> Result<(), CodecError> {
        bounded(self.timeout, self.inner.flush()).await
    }

    /// Writes and flushes one frame.
    pub async fn send<P: Frame>(&mut self, packet: &P) -> Result<(), CodecError> {
        self.write_frame(packet).await?;
        self.flush().await
    }

    pub async fn shutdown(&mut self) -> Result<(), CodecError> {
        bounded(self.timeout, self.inner.shutdown()).await
    }
}

/// Pass-through stream that traces every byte read or written under the
/// `wire` log target.
pub struct LoggingStream<S> {
    inner: S,
    label: String,
}

impl<S> LoggingStream<S> {
    pub fn new(inner: S, label: impl Into<String>) -> Self {
        Self {
            inner,
            label: label.into(),
        }
    }
}

fn hex_dump(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, byte) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{:02X}", byte);
    }
    out
}

impl<S: AsyncRead + Unpin> AsyncRead for LoggingStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let result = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = result {
            let read = &buf.filled()[before..];
            if !read.is_empty() && log_enabled!(target: "wire", Level::Trace) {
                trace!(target: "wire", "{} <- {}", this.label, hex_dump(read));
            }
        }
        result
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for LoggingStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let result = Pin::new(&mut this.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(written)) = result {
            if written > 0 && log_enabled!(target: "wire", Level::Trace) {
                trace!(target: "wire", "{} -> {}", this.label, hex_dump(&buf[..written]));
            }
        }
        result
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
