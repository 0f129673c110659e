//! Trait abstraction over the operations both engines share.
//!
//! The two protocol engines are deliberately siblings, not variants of one
//! machine; this trait is only the seam for callers that manage either kind
//! of analyzer generically (a device list, a polling supervisor).

use async_trait::async_trait;

use phxlink_types::DeviceKind;

use crate::error::Result;
use crate::events::EventReceiver;

/// Common lifecycle operations of a phx-series analyzer engine.
///
/// # Example
///
/// ```ignore
/// use phxlink_core::Analyzer;
///
/// async fn begin<A: Analyzer>(analyzer: &A) -> phxlink_core::Result<()> {
///     let mut events = analyzer.subscribe();
///     analyzer.start_polling_data(1000).await?;
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Which protocol generation this engine speaks.
    fn kind(&self) -> DeviceKind;

    /// Subscribe to engine events.
    fn subscribe(&self) -> EventReceiver;

    /// Begin emitting periodic `DataPolled` events at the given interval.
    async fn start_polling_data(&self, interval_ms: u64) -> Result<()>;

    /// Stop emitting periodic `DataPolled` events.
    async fn stop_polling_data(&self) -> Result<()>;

    /// Start (`true`) or stop (`false`) the ignition sequence.
    async fn ignite(&self, on: bool) -> Result<()>;

    /// Read the device firmware version.
    async fn get_firmware_version(&self) -> Result<String>;

    /// Stop the engine's workers and release the streams.
    async fn shutdown(&self) -> Result<()>;
}
