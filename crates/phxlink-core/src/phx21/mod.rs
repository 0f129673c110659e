//! Engine for the older-generation phx21 analyzer.
//!
//! The phx21 speaks a little-endian, byte-oriented request/response
//! protocol with a single-byte rotating checksum. This module frames and
//! checksums outbound commands, deframes responses, correlates replies
//! with requests, and layers the device's data-plane logic (range
//! switching, ignition hysteresis, junk filtering, PPM averaging) over
//! periodic status polls.

pub mod commands;
pub mod control;
pub mod engine;
pub mod frame;

pub use commands::{
    AutoIgnitionSequence, DeadheadParams, H2PressureCompensation, IntegrationControl,
    PumpAClosedLoop, PumpAux1Control, SamplingParameters,
};
pub use control::{AveragingConfig, ControlAction, DataPlane, Processed};
pub use engine::{Phx21, Phx21Config};
pub use frame::{checksum, checksum_legacy, Deframer, Frame};
