//! Well-known property names for polled-data events.
//!
//! Both analyzer engines report status to observers as a string-keyed map.
//! These constants are the full key vocabulary; each engine populates the
//! subset its hardware reports.

/// Parts-per-million reading, or `"N/A"` when the flame is out.
pub const PPM: &str = "PPM";
/// FID detector current in picoamps.
pub const PICO_AMPS: &str = "PicoAmps";
/// Detector current zero offset.
pub const PA_OFFSET: &str = "PaOffset";
/// High-pressure hydrogen supply pressure.
pub const HP_H2: &str = "HPH2";
/// Low-pressure hydrogen pressure.
pub const LP_H2: &str = "LPH2";
/// Sample line pressure.
pub const SAMPLE_PRESSURE: &str = "SamplePressure";
/// Sample pump drive level.
pub const SAMPLE_PPL: &str = "SamplePPL";
/// Combustion chamber pressure.
pub const COMBUSTION_PRESSURE: &str = "CombustionPressure";
/// Combustion pump drive level.
pub const COMBUSTION_PPL: &str = "CombustionPPL";
/// Vacuum reading.
pub const VACUUM: &str = "Vacuum";
/// Internal enclosure temperature.
pub const INTERNAL_TEMP: &str = "InternalTemp";
/// Ambient temperature.
pub const EXTERNAL_TEMP: &str = "ExternalTemp";
/// Case temperature.
pub const CASE_TEMP: &str = "CaseTemp";
/// Needle valve position.
pub const NEEDLE_VALVE: &str = "NeedleValve";
/// Heater drive level.
pub const HEATER: &str = "Heater";
/// Glow plug drive level.
pub const GLOW_PLUG: &str = "GlowPlug";
/// Solenoid state.
pub const SOLENOID: &str = "Solenoid";
/// Battery status word.
pub const BATTERY_STATUS: &str = "BatteryStatus";
/// Battery charge percentage.
pub const BATTERY_CHARGE: &str = "BatteryCharge";
/// System current draw.
pub const CURRENT: &str = "Current";
/// Whether steady combustion is detected.
pub const IS_IGNITED: &str = "IsIgnited";
/// Pump 1 pressure target.
pub const P1_TARGET: &str = "P1Target";
/// Pump 2 pressure target.
pub const P2_TARGET: &str = "P2Target";
/// Hydrogen pressure target.
pub const H2_TARGET: &str = "H2Target";
/// Altimeter reading.
pub const ALTIMETER: &str = "Altimeter";
/// Battery voltage.
pub const VOLTS: &str = "Volts";
/// Wall-clock time the status was captured.
pub const TIMESTAMP: &str = "Timestamp";
