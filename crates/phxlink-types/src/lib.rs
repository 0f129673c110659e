//! Core data types for phx-series FID analyzer communication.
//!
//! This crate holds the platform-agnostic pieces shared by everything that
//! talks to a phx21 or phx42 flame-ionization analyzer: the decoded status
//! structures, the well-known property names emitted to observers, and the
//! parse errors raised while decoding wire data.
//!
//! Transport and engine logic live in `phxlink-core`; nothing in this crate
//! performs I/O.

pub mod error;
pub mod property;
pub mod types;

pub use error::{ParseError, ParseResult};
pub use types::{
    round1, round_ppm, tenths_kelvin_to_f, DeviceKind, Phx21Status, RangeMode, FLAG_PUMP_A,
    FLAG_SOL_A, FLAG_SOL_B, PHX21_STATUS_EXTENDED_LEN,
};
