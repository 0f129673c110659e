//! Byte-stream adapters the engines consume.
//!
//! The transport itself (Bluetooth discovery, socket connect) is out of
//! scope; an engine is handed an [`InputStream`] and an [`OutputStream`]
//! already wired to the device. Each side is owned by exactly one worker
//! for the engine's lifetime: the receiver owns the input, the sender owns
//! the output.
//!
//! Both sides count cumulative traffic; the counters stay readable from
//! outside the owning worker via [`StreamCounter`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Shared view of one direction's byte counter.
#[derive(Debug, Clone)]
pub struct StreamCounter {
    bytes: Arc<AtomicU64>,
    opened_at: Instant,
}

impl StreamCounter {
    fn new() -> Self {
        Self {
            bytes: Arc::new(AtomicU64::new(0)),
            opened_at: Instant::now(),
        }
    }

    /// Cumulative bytes moved through the stream.
    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    /// How long the stream has been open.
    pub fn session_duration(&self) -> Duration {
        self.opened_at.elapsed()
    }

    fn add(&self, n: u64) {
        self.bytes.fetch_add(n, Ordering::Relaxed);
    }
}

/// Readable half of a device link, yielding one byte at a time.
pub struct InputStream {
    inner: Box<dyn AsyncRead + Send + Unpin>,
    counter: StreamCounter,
}

impl InputStream {
    /// Wrap an async reader.
    pub fn new(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self {
            inner: Box::new(reader),
            counter: StreamCounter::new(),
        }
    }

    /// Read a single byte, waiting until one is available.
    pub async fn read_byte(&mut self) -> std::io::Result<u8> {
        let byte = self.inner.read_u8().await?;
        self.counter.add(1);
        Ok(byte)
    }

    /// Cumulative bytes received.
    pub fn bytes_received(&self) -> u64 {
        self.counter.bytes()
    }

    /// How long this stream has been open.
    pub fn session_duration(&self) -> Duration {
        self.counter.session_duration()
    }

    /// A cloneable handle to the receive counter.
    pub fn counter(&self) -> StreamCounter {
        self.counter.clone()
    }
}

impl std::fmt::Debug for InputStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputStream")
            .field("bytes_received", &self.bytes_received())
            .finish_non_exhaustive()
    }
}

/// Writable half of a device link.
pub struct OutputStream {
    inner: Box<dyn AsyncWrite + Send + Unpin>,
    counter: StreamCounter,
}

impl OutputStream {
    /// Wrap an async writer.
    pub fn new(writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            inner: Box::new(writer),
            counter: StreamCounter::new(),
        }
    }

    /// Write an entire slice and flush it.
    pub async fn write_all(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.inner.write_all(data).await?;
        self.inner.flush().await?;
        self.counter.add(data.len() as u64);
        Ok(())
    }

    /// Cumulative bytes sent.
    pub fn bytes_sent(&self) -> u64 {
        self.counter.bytes()
    }

    /// A cloneable handle to the send counter.
    pub fn counter(&self) -> StreamCounter {
        self.counter.clone()
    }
}

impl std::fmt::Debug for OutputStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputStream")
            .field("bytes_sent", &self.bytes_sent())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_input_counts_bytes() {
        let data: &[u8] = &[0xA5, 0x04, 0x25];
        let mut input = InputStream::new(data);
        let counter = input.counter();

        assert_eq!(input.read_byte().await.unwrap(), 0xA5);
        assert_eq!(input.read_byte().await.unwrap(), 0x04);
        assert_eq!(input.bytes_received(), 2);
        assert_eq!(counter.bytes(), 2);

        assert_eq!(input.read_byte().await.unwrap(), 0x25);
        assert!(input.read_byte().await.is_err()); // EOF
        assert_eq!(input.bytes_received(), 3);
    }

    #[tokio::test]
    async fn test_output_counts_bytes() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut output = OutputStream::new(client);

        output.write_all(&[0x5A, 0x05, 0x25, 0x00]).await.unwrap();
        assert_eq!(output.bytes_sent(), 4);

        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [0x5A, 0x05, 0x25, 0x00]);
    }
}
