//! Core types for phx-series analyzer data.

use std::collections::HashMap;

use bytes::Buf;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::ParseError;
use crate::property;

/// Status flag bit: sample pump A is running.
pub const FLAG_PUMP_A: u8 = 0x01;
/// Status flag bit: solenoid A is open.
pub const FLAG_SOL_A: u8 = 0x04;
/// Status flag bit: solenoid B is open.
pub const FLAG_SOL_B: u8 = 0x08;

/// Total byte length of the extended status payload (phx21).
pub const PHX21_STATUS_EXTENDED_LEN: usize = 24;

/// Kind of phx-series analyzer.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new device kinds
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum DeviceKind {
    /// Older-generation analyzer speaking the binary framed protocol.
    Phx21,
    /// Newer-generation analyzer speaking the ASCII line protocol.
    Phx42,
}

impl DeviceKind {
    /// Detect the device kind from a device name.
    ///
    /// Analyzes the name (case-insensitive) based on common naming patterns.
    ///
    /// # Examples
    ///
    /// ```
    /// use phxlink_types::DeviceKind;
    ///
    /// assert_eq!(DeviceKind::from_name("phx42-0123"), Some(DeviceKind::Phx42));
    /// assert_eq!(DeviceKind::from_name("PHX21 4567"), Some(DeviceKind::Phx21));
    /// assert_eq!(DeviceKind::from_name("Unknown Device"), None);
    /// ```
    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.to_lowercase();
        if lower.contains("phx42") {
            Some(DeviceKind::Phx42)
        } else if lower.contains("phx21") || lower.contains("phx2") {
            Some(DeviceKind::Phx21)
        } else {
            None
        }
    }
}

/// FID amplifier sensitivity band.
///
/// Higher bands trade resolution for dynamic range. Only `Lo` and `Max`
/// are driven automatically; the middle bands exist in firmware but the
/// host never selects them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum RangeMode {
    /// Narrowest band, highest resolution.
    Lo = 0,
    /// Lower-middle band.
    Mid = 1,
    /// Upper-middle band.
    Hi = 2,
    /// Widest band, lowest resolution.
    Max = 3,
}

impl RangeMode {
    /// Decode a range byte as reported in the extended status.
    pub fn from_u8(value: u8) -> Result<Self, ParseError> {
        match value {
            0 => Ok(RangeMode::Lo),
            1 => Ok(RangeMode::Mid),
            2 => Ok(RangeMode::Hi),
            3 => Ok(RangeMode::Max),
            other => Err(ParseError::invalid_value(format!(
                "range mode out of bounds: {}",
                other
            ))),
        }
    }
}

/// Round to one decimal place.
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Round a PPM figure the way the analyzer displays it: whole numbers above
/// 100 ppm, one decimal below.
pub fn round_ppm(value: f64) -> f64 {
    if value > 100.0 {
        value.round()
    } else {
        round1(value)
    }
}

/// Convert tenths of Kelvin (as carried on the wire) to degrees Fahrenheit,
/// rounded to one decimal.
pub fn tenths_kelvin_to_f(tenths: u16) -> f64 {
    round1((f64::from(tenths) / 10.0 - 273.15) * 1.8 + 32.0)
}

/// Decoded extended status from a phx21 analyzer.
///
/// Parsed from the packed little-endian extended status payload; the
/// averaging and ignition fields are filled in by the engine's control
/// pass, not by the wire decoder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phx21Status {
    /// Wall-clock time the status was decoded.
    pub timestamp: OffsetDateTime,
    /// Battery voltage in volts.
    pub battery_voltage: f64,
    /// FID current in picoamps.
    pub picoamps: f64,
    /// Raw PPM reading from the wire (never negative).
    pub ppm: f64,
    /// Sample air pressure in PSI.
    pub air_pressure: f64,
    /// Hydrogen tank pressure in PSI.
    pub tank_pressure: f64,
    /// Flame thermocouple temperature in °F.
    pub thermocouple_f: f64,
    /// Combustion chamber outer wall temperature in °F.
    pub chamber_outer_temp_f: f64,
    /// Total system current draw in amps.
    pub system_current: f64,
    /// Sample pump drive level in percent.
    pub pump_power: f64,
    /// Active FID amplifier range.
    pub fid_range: RangeMode,
    /// Sample pump A running.
    pub is_pump_a_on: bool,
    /// Solenoid A open.
    pub is_solenoid_a_on: bool,
    /// Solenoid B open.
    pub is_solenoid_b_on: bool,
    /// Steady combustion detected (set by the control pass, with hysteresis).
    pub is_ignited: bool,
    /// Long sliding-window average PPM (set by the control pass).
    pub long_average_ppm: f64,
    /// Short sliding-window average PPM (set by the control pass).
    pub short_average_ppm: f64,
    /// Whether the averaged figure was reported instead of the raw one.
    pub use_average: bool,
}

impl Phx21Status {
    /// Parse the extended status payload.
    ///
    /// Byte layout (little-endian, 24 bytes):
    ///
    /// | offset | size | field                                 |
    /// |--------|------|---------------------------------------|
    /// | 0      | 1    | flags (`FLAG_PUMP_A`/`SOL_A`/`SOL_B`) |
    /// | 1      | 1    | FID range (0–3)                       |
    /// | 2      | 2    | battery, millivolts                   |
    /// | 4      | 4    | FID current, tenths of pA (signed)    |
    /// | 8      | 4    | PPM, tenths                           |
    /// | 12     | 2    | air pressure, hundredths of PSI       |
    /// | 14     | 2    | tank pressure, tenths of PSI          |
    /// | 16     | 2    | thermocouple, tenths of Kelvin        |
    /// | 18     | 2    | chamber outer temp, tenths of Kelvin  |
    /// | 20     | 2    | system current, milliamps             |
    /// | 22     | 1    | pump power, percent                   |
    /// | 23     | 1    | reserved                              |
    pub fn from_bytes(data: &[u8]) -> Result<Self, ParseError> {
        if data.len() < PHX21_STATUS_EXTENDED_LEN {
            return Err(ParseError::InsufficientBytes {
                expected: PHX21_STATUS_EXTENDED_LEN,
                actual: data.len(),
            });
        }

        let mut buf = data;
        let flags = buf.get_u8();
        let fid_range = RangeMode::from_u8(buf.get_u8())?;
        let battery_mv = buf.get_u16_le();
        let picoamps_tenths = buf.get_i32_le();
        let ppm_tenths = buf.get_u32_le();
        let air_pressure_cpsi = buf.get_u16_le();
        let tank_pressure_dpsi = buf.get_u16_le();
        let thermocouple_tk = buf.get_u16_le();
        let chamber_tk = buf.get_u16_le();
        let system_ma = buf.get_u16_le();
        let pump_power = buf.get_u8();

        let ppm = round_ppm((f64::from(ppm_tenths) * 0.1).max(0.0));

        Ok(Phx21Status {
            timestamp: OffsetDateTime::now_utc(),
            battery_voltage: f64::from(battery_mv) / 1000.0,
            picoamps: f64::from(picoamps_tenths) / 10.0,
            ppm,
            air_pressure: f64::from(air_pressure_cpsi) / 100.0,
            tank_pressure: f64::from(tank_pressure_dpsi) / 10.0,
            thermocouple_f: tenths_kelvin_to_f(thermocouple_tk),
            chamber_outer_temp_f: tenths_kelvin_to_f(chamber_tk),
            system_current: f64::from(system_ma) / 1000.0,
            pump_power: f64::from(pump_power),
            fid_range,
            is_pump_a_on: flags & FLAG_PUMP_A != 0,
            is_solenoid_a_on: flags & FLAG_SOL_A != 0,
            is_solenoid_b_on: flags & FLAG_SOL_B != 0,
            is_ignited: false,
            long_average_ppm: 0.0,
            short_average_ppm: 0.0,
            use_average: false,
        })
    }

    /// Project the status into the string-keyed property map emitted to
    /// observers.
    ///
    /// `reported_ppm` is the figure the data plane chose to report (raw or
    /// averaged); `None` renders as `"N/A"` for a flame-out.
    pub fn to_property_map(&self, reported_ppm: Option<f64>) -> HashMap<String, String> {
        let mut map = HashMap::new();
        map.insert(
            property::PPM.to_string(),
            match reported_ppm {
                Some(ppm) => ppm.to_string(),
                None => "N/A".to_string(),
            },
        );
        map.insert(property::PICO_AMPS.to_string(), self.picoamps.to_string());
        map.insert(property::HP_H2.to_string(), self.tank_pressure.to_string());
        map.insert(
            property::SAMPLE_PRESSURE.to_string(),
            self.air_pressure.to_string(),
        );
        map.insert(
            property::INTERNAL_TEMP.to_string(),
            self.chamber_outer_temp_f.to_string(),
        );
        map.insert(
            property::SOLENOID.to_string(),
            self.is_solenoid_a_on.to_string(),
        );
        map.insert(
            property::VOLTS.to_string(),
            self.battery_voltage.to_string(),
        );
        map.insert(
            property::CURRENT.to_string(),
            self.system_current.to_string(),
        );
        map.insert(
            property::IS_IGNITED.to_string(),
            self.is_ignited.to_string(),
        );
        map.insert(property::TIMESTAMP.to_string(), self.timestamp.to_string());
        map
    }
}
