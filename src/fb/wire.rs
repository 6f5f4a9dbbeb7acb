//! Byte transport under a session.
//!
//! A session starts on a [`PlainWire`] and may switch to a [`ZlibWire`] once
//! the server accepts `pflag_compress`. The switch happens in place through
//! [`Channel`], so the rest of the session never sees which one is active.

use std::io;

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::io::{ReadHalf, WriteHalf};

/// Anything the session can talk over: TCP in production, duplex pipes in tests.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

pub type BoxedStream = Box<dyn AsyncStream>;

const READ_CHUNK: usize = 8192;

/// Ordered byte transport.
#[allow(async_fn_in_trait)]
pub trait Wire {
    async fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()>;
    /// Queue bytes; nothing reaches the peer before [`Wire::flush`].
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()>;
    async fn flush(&mut self) -> io::Result<()>;
    async fn shutdown(&mut self) -> io::Result<()>;
}

// ============================================================================
// Plain
// ============================================================================

pub struct PlainWire {
    reader: BufReader<ReadHalf<BoxedStream>>,
    writer: BufWriter<WriteHalf<BoxedStream>>,
}

impl PlainWire {
    pub fn new(stream: BoxedStream) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: BufReader::new(read_half),
            writer: BufWriter::new(write_half),
        }
    }

    /// Read whatever is available, up to `buf.len()` bytes.
    async fn read_some(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.reader.read(buf).await?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed by server",
            ));
        }
        Ok(n)
    }
}

impl Wire for PlainWire {
    async fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.reader.read_exact(buf).await.map(|_| ())
    }

    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.writer.write_all(data).await
    }

    async fn flush(&mut self) -> io::Result<()> {
        self.writer.flush().await
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        self.writer.shutdown().await
    }
}

// ============================================================================
// Zlib
// ============================================================================

/// zlib stream in both directions. Each flush ends with a sync flush so the
/// peer can decode everything sent so far.
pub struct ZlibWire {
    inner: PlainWire,
    compress: Compress,
    decompress: Decompress,
    /// Plain bytes queued since the last flush
    pending: Vec<u8>,
    /// Decompressed bytes not yet handed out
    inflated: Vec<u8>,
    raw: Vec<u8>,
}

impl ZlibWire {
    pub fn new(inner: PlainWire) -> Self {
        Self {
            inner,
            compress: Compress::new(Compression::default(), true),
            decompress: Decompress::new(true),
            pending: Vec::new(),
            inflated: Vec::new(),
            raw: vec![0; READ_CHUNK],
        }
    }

    fn deflate_pending(&mut self) -> io::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.pending.len() / 2 + 64);
        let mut consumed = 0;
        loop {
            if out.capacity() - out.len() < 64 {
                out.reserve(out.capacity().max(256));
            }
            let before = self.compress.total_in();
            self.compress
                .compress_vec(&self.pending[consumed..], &mut out, FlushCompress::Sync)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            consumed += (self.compress.total_in() - before) as usize;
            if consumed == self.pending.len() && out.len() < out.capacity() {
                break;
            }
        }
        self.pending.clear();
        Ok(out)
    }

    async fn inflate_more(&mut self) -> io::Result<()> {
        let n = self.inner.read_some(&mut self.raw).await?;
        let mut consumed = 0;
        while consumed < n {
            self.inflated.reserve(READ_CHUNK * 2);
            let before_in = self.decompress.total_in();
            let before_out = self.decompress.total_out();
            self.decompress
                .decompress_vec(&self.raw[consumed..n], &mut self.inflated, FlushDecompress::Sync)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            let used = (self.decompress.total_in() - before_in) as usize;
            consumed += used;
            if used == 0 && self.decompress.total_out() == before_out {
                break;
            }
        }
        Ok(())
    }
}

impl Wire for ZlibWire {
    async fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        while self.inflated.len() < buf.len() {
            self.inflate_more().await?;
        }
        buf.copy_from_slice(&self.inflated[..buf.len()]);
        self.inflated.drain(..buf.len());
        Ok(())
    }

    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.pending.extend_from_slice(data);
        Ok(())
    }

    async fn flush(&mut self) -> io::Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let compressed = self.deflate_pending()?;
        self.inner.write_all(&compressed).await?;
        self.inner.flush().await
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        self.inner.shutdown().await
    }
}

// ============================================================================
// Channel
// ============================================================================

/// The active transport of a session.
pub enum Channel {
    Plain(PlainWire),
    Zlib(Box<ZlibWire>),
    Closed,
}

impl Channel {
    pub fn new(stream: BoxedStream) -> Self {
        Channel::Plain(PlainWire::new(stream))
    }

    /// Wrap the current transport in zlib. No-op unless plain.
    pub fn enable_compression(&mut self) {
        if let Channel::Plain(_) = self {
            if let Channel::Plain(plain) = std::mem::replace(self, Channel::Closed) {
                *self = Channel::Zlib(Box::new(ZlibWire::new(plain)));
            }
        }
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self, Channel::Zlib(_))
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Channel::Closed)
    }

    /// Drop the transport. Later calls fail with `NotConnected`.
    pub fn close(&mut self) {
        *self = Channel::Closed;
    }
}

fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "channel is closed")
}

impl Wire for Channel {
    async fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        match self {
            Channel::Plain(w) => w.read_exact(buf).await,
            Channel::Zlib(w) => w.read_exact(buf).await,
            Channel::Closed => Err(not_connected()),
        }
    }

    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        match self {
            Channel::Plain(w) => w.write_all(data).await,
            Channel::Zlib(w) => w.write_all(data).await,
            Channel::Closed => Err(not_connected()),
        }
    }

    async fn flush(&mut self) -> io::Result<()> {
        match self {
            Channel::Plain(w) => w.flush().await,
            Channel::Zlib(w) => w.flush().await,
            Channel::Closed => Err(not_connected()),
        }
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        match self {
            Channel::Plain(w) => w.shutdown().await,
            Channel::Zlib(w) => w.shutdown().await,
            Channel::Closed => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (Channel, Channel) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        (Channel::new(Box::new(a)), Channel::new(Box::new(b)))
    }

    #[tokio::test]
    async fn test_plain_write_is_buffered_until_flush() {
        let (mut client, mut server) = pair();
        client.write_all(b"ping").await.unwrap();
        client.flush().await.unwrap();
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[tokio::test]
    async fn test_zlib_both_directions() {
        let (mut client, mut server) = pair();
        client.enable_compression();
        server.enable_compression();
        assert!(client.is_compressed());

        let payload: Vec<u8> = (0..20_000u32).map(|i| (i % 7) as u8).collect();
        client.write_all(&payload).await.unwrap();
        client.flush().await.unwrap();
        let mut got = vec![0u8; payload.len()];
        server.read_exact(&mut got).await.unwrap();
        assert_eq!(got, payload);

        server.write_all(b"pong").await.unwrap();
        server.flush().await.unwrap();
        let mut small = [0u8; 4];
        client.read_exact(&mut small).await.unwrap();
        assert_eq!(&small, b"pong");
    }

    #[tokio::test]
    async fn test_closed_channel_rejects_io() {
        let (mut client, _server) = pair();
        client.close();
        let err = client.write_all(b"x").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
        assert!(client.shutdown().await.is_ok());
    }
}
