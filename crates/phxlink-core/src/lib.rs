//! Protocol engines for phx-series portable FID gas analyzers.
//!
//! This crate drives two generations of flame-ionization analyzers over a
//! full-duplex byte stream (in practice a Bluetooth serial link):
//!
//! - **phx21** — the older generation, a little-endian binary protocol
//!   with a single-byte rotating checksum.
//! - **phx42** — the newer generation, a CR-LF framed ASCII protocol with
//!   `KEY=VALUE` parameters and a `ZUzu` host tag.
//!
//! # Features
//!
//! - **Command correlation**: request/response matching with timeouts over
//!   a lossy, half-reliable link
//! - **Periodic status**: decoded readings delivered as `DataPolled`
//!   events
//! - **Data-plane logic**: range switching, junk filtering, ignition
//!   detection with hysteresis, pump safety cutoff, PPM averaging
//! - **Heartbeat** (phx42): keeps the device from dropping the link
//! - **Orderly shutdown**: workers drain and exit on request
//!
//! The transport itself is out of scope: callers hand each engine an
//! [`InputStream`] and an [`OutputStream`] already wired to the device.
//!
//! # Quick Start
//!
//! ```no_run
//! use phxlink_core::{InputStream, OutputStream, Phx42};
//!
//! # async fn example(reader: tokio::net::tcp::OwnedReadHalf,
//! #                  writer: tokio::net::tcp::OwnedWriteHalf)
//! #                  -> phxlink_core::Result<()> {
//! let engine = Phx42::start(InputStream::new(reader), OutputStream::new(writer)).await?;
//!
//! let mut events = engine.subscribe();
//! engine.start_polling_data(1000).await?;
//! while let Ok(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//!
//! engine.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod events;
pub mod mock;
pub mod phx21;
pub mod phx42;
pub mod retry;
pub mod stream;
pub mod traits;

mod transport;

// Re-export types from phxlink-types for convenience
pub use phxlink_types::{DeviceKind, ParseError, Phx21Status, RangeMode};

// Core exports
pub use error::{Error, Result};
pub use events::{CommandErrorKind, DeviceEvent, EventDispatcher, EventReceiver, EventSender};
pub use phx21::{Phx21, Phx21Config};
pub use phx42::{Phx42, Phx42Config};
pub use retry::{with_retry, RetryConfig};
pub use stream::{InputStream, OutputStream, StreamCounter};
pub use traits::Analyzer;
