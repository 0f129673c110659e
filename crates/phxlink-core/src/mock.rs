//! In-memory transports for testing without analyzer hardware.
//!
//! [`mock_link`] builds a duplex pipe and hands back the host-side
//! [`InputStream`]/[`OutputStream`] pair plus the device end, on which a
//! test scripts the analyzer's half of the conversation.
//!
//! # Example
//!
//! ```
//! use phxlink_core::mock::mock_link;
//!
//! #[tokio::main]
//! async fn main() {
//!     let (mut input, mut output, mut device) = mock_link(256);
//!
//!     output.write_all(b"ping").await.unwrap();
//!     let mut buf = [0u8; 4];
//!     device.read_exact(&mut buf).await.unwrap();
//!     assert_eq!(&buf, b"ping");
//!
//!     device.write_all(&[0x42]).await.unwrap();
//!     assert_eq!(input.read_byte().await.unwrap(), 0x42);
//! }
//! ```

use tokio::io::{self, DuplexStream, ReadHalf, WriteHalf};

use crate::stream::{InputStream, OutputStream};

/// The device end of a mock link.
pub struct DeviceEnd {
    reader: ReadHalf<DuplexStream>,
    writer: WriteHalf<DuplexStream>,
}

impl DeviceEnd {
    /// Read exactly `buf.len()` bytes the host wrote.
    pub async fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        use tokio::io::AsyncReadExt;
        self.reader.read_exact(buf).await.map(|_| ())
    }

    /// Read a single byte the host wrote.
    pub async fn read_byte(&mut self) -> io::Result<u8> {
        use tokio::io::AsyncReadExt;
        self.reader.read_u8().await
    }

    /// Write device bytes for the host to receive.
    pub async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        use tokio::io::AsyncWriteExt;
        self.writer.write_all(data).await?;
        self.writer.flush().await
    }

    /// Split into raw read/write halves for tasks that need to own them
    /// separately.
    pub fn split(self) -> (ReadHalf<DuplexStream>, WriteHalf<DuplexStream>) {
        (self.reader, self.writer)
    }
}

/// Build an in-memory link: host input, host output, device end.
pub fn mock_link(capacity: usize) -> (InputStream, OutputStream, DeviceEnd) {
    // Each direction has its own internal buffer of `capacity` bytes.
    let (host_side, device_side) = io::duplex(capacity);
    let (host_read, host_write) = io::split(host_side);
    let (device_read, device_write) = io::split(device_side);

    (
        InputStream::new(host_read),
        OutputStream::new(host_write),
        DeviceEnd {
            reader: device_read,
            writer: device_write,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_both_directions() {
        let (mut input, mut output, mut device) = mock_link(64);

        output.write_all(b"ZUzu CHEK\r\n").await.unwrap();
        let mut buf = [0u8; 11];
        device.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ZUzu CHEK\r\n");

        device.write_all(b"ok").await.unwrap();
        assert_eq!(input.read_byte().await.unwrap(), b'o');
        assert_eq!(input.read_byte().await.unwrap(), b'k');
        assert_eq!(output.bytes_sent(), 11);
        assert_eq!(input.bytes_received(), 2);
    }
}
