//! Engine for the newer-generation phx42 analyzer.
//!
//! The phx42 speaks an ASCII line protocol: host tag `ZUzu`,
//! four-character message types, `KEY=VALUE` parameters, CR-LF framing.
//! The firmware owns averaging and periodic reporting; this module keeps
//! the link alive with a heartbeat, correlates replies through a bounded
//! inbound buffer, and turns periodic reports into `DataPolled` events.

pub mod engine;
pub mod errors;
pub mod message;

pub use engine::{Phx42, Phx42Config, RawMessageObserver};
pub use message::{msg, LineBuffer, LineError, Message};
