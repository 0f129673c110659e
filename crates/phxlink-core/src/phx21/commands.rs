//! Command ids and packed payload encoders for the phx21 binary protocol.
//!
//! Payloads are packed little-endian with no padding; each encoder writes
//! fields in wire order by hand so the layout never depends on compiler
//! struct packing. Offsets are pinned by the tests at the bottom.

use bytes::BufMut;

use super::frame::Frame;

/// Configure the FID sampling range.
pub const SET_SAMPLING_PARAMETERS: u8 = 0x04;
/// Read device configuration, including firmware version.
pub const CONFIGURATION_READ: u8 = 0x0A;
/// Configure detector integration and hardware averaging.
pub const INTEGRATION_CONTROL: u8 = 0x0C;
/// Drive the auxiliary pump directly.
pub const PUMP_AUX_1_CONTROL: u8 = 0x1B;
/// Enable or disable closed-loop control of pump A.
pub const SET_PUMPA_CLOSED_LOOP: u8 = 0x1D;
/// Configure deadhead (zero-flow overpressure) protection.
pub const SET_DEADHEAD_PARAMS: u8 = 0x1E;
/// Start or stop the automatic ignition sequence.
pub const AUTO_IGNITION_SEQUENCE: u8 = 0x20;
/// Set the calibration H2-pressure compensation slopes.
pub const SET_CAL_H2PRES_COMPENSATION: u8 = 0x24;
/// Request the extended status report.
pub const READ_DATA_EXTENDED: u8 = 0x25;
/// Announce an orderly host disconnect.
pub const GOODBYE: u8 = 0x26;

/// Sampling parameters payload.
///
/// | offset | size | field        |
/// |--------|------|--------------|
/// | 0      | 1    | range mode   |
#[derive(Debug, Clone, Copy)]
pub struct SamplingParameters {
    pub range: u8,
}

impl SamplingParameters {
    pub fn encode(&self) -> Frame {
        Frame::command(SET_SAMPLING_PARAMETERS, &[self.range])
    }
}

/// Integration control payload.
///
/// | offset | size | field               |
/// |--------|------|---------------------|
/// | 0      | 1    | mode                |
/// | 1      | 1    | charge multiplier   |
/// | 2      | 1    | range               |
/// | 3      | 4    | integration time µs |
/// | 7      | 2    | samples to average  |
/// | 9      | 1    | report mode         |
#[derive(Debug, Clone, Copy)]
pub struct IntegrationControl {
    pub mode: u8,
    pub charge_multiplier: u8,
    pub range: u8,
    pub integration_time_us: u32,
    pub samples_to_avg: u16,
    pub report_mode: u8,
}

impl IntegrationControl {
    /// The fixed setup issued during initialization, with the given
    /// hardware averaging depth.
    pub fn setup(samples_to_avg: u16) -> Self {
        Self {
            mode: 0,
            charge_multiplier: 1,
            range: 7,
            integration_time_us: 50_000,
            samples_to_avg,
            report_mode: 0,
        }
    }

    pub fn encode(&self) -> Frame {
        let mut payload = Vec::with_capacity(10);
        payload.put_u8(self.mode);
        payload.put_u8(self.charge_multiplier);
        payload.put_u8(self.range);
        payload.put_u32_le(self.integration_time_us);
        payload.put_u16_le(self.samples_to_avg);
        payload.put_u8(self.report_mode);
        Frame::command(INTEGRATION_CONTROL, &payload)
    }
}

/// Deadhead protection payload.
///
/// | offset | size | field                  |
/// |--------|------|------------------------|
/// | 0      | 1    | enable                 |
/// | 1      | 2    | pressure limit, hPSI   |
/// | 3      | 2    | timeout, ms            |
#[derive(Debug, Clone, Copy)]
pub struct DeadheadParams {
    pub enable: bool,
    pub pressure_limit: u16,
    pub timeout: u16,
}

impl DeadheadParams {
    pub fn encode(&self) -> Frame {
        let mut payload = Vec::with_capacity(5);
        payload.put_u8(self.enable as u8);
        payload.put_u16_le(self.pressure_limit);
        payload.put_u16_le(self.timeout);
        Frame::command(SET_DEADHEAD_PARAMS, &payload)
    }
}

/// Calibration H2-pressure compensation payload.
///
/// Slopes are carried in parts per thousand of a fraction×10⁶.
///
/// | offset | size | field                 |
/// |--------|------|-----------------------|
/// | 0      | 4    | positive slope (i32)  |
/// | 4      | 4    | negative slope (i32)  |
#[derive(Debug, Clone, Copy)]
pub struct H2PressureCompensation {
    pub pos_per_thousand: i32,
    pub neg_per_thousand: i32,
}

impl H2PressureCompensation {
    pub fn encode(&self) -> Frame {
        let mut payload = Vec::with_capacity(8);
        payload.put_i32_le(self.pos_per_thousand);
        payload.put_i32_le(self.neg_per_thousand);
        Frame::command(SET_CAL_H2PRES_COMPENSATION, &payload)
    }
}

/// Auto-ignition sequence payload.
///
/// | offset | size | field                    |
/// |--------|------|--------------------------|
/// | 0      | 1    | start/stop               |
/// | 1      | 1    | use glow plug B          |
/// | 2      | 2    | target, hPSI             |
/// | 4      | 2    | tolerance, hPSI          |
/// | 6      | 2    | min temp rise, tK        |
/// | 8      | 2    | max pressure wait, ms    |
/// | 10     | 2    | max ignite wait, ms      |
/// | 12     | 2    | solenoid B delay, ms     |
/// | 14     | 2    | pre-purge pump, ms       |
/// | 16     | 2    | pre-purge solenoid A, ms |
#[derive(Debug, Clone, Copy)]
pub struct AutoIgnitionSequence {
    pub start: bool,
    pub use_glow_plug_b: bool,
    pub target_hpsi: u16,
    pub tolerance_hpsi: u16,
    pub min_temp_rise_tk: u16,
    pub max_pressure_wait_ms: u16,
    pub max_ignite_wait_ms: u16,
    pub sol_b_delay_ms: u16,
    pub pre_purge_pump_ms: u16,
    pub pre_purge_sol_a_ms: u16,
}

impl AutoIgnitionSequence {
    /// The fixed ignition recipe with the given start/stop flag.
    pub fn recipe(start: bool) -> Self {
        Self {
            start,
            use_glow_plug_b: false,
            target_hpsi: 175,
            tolerance_hpsi: 5,
            min_temp_rise_tk: 10,
            max_pressure_wait_ms: 10_000,
            max_ignite_wait_ms: 5_000,
            sol_b_delay_ms: 1_000,
            pre_purge_pump_ms: 5_000,
            pre_purge_sol_a_ms: 5_000,
        }
    }

    pub fn encode(&self) -> Frame {
        let mut payload = Vec::with_capacity(18);
        payload.put_u8(self.start as u8);
        payload.put_u8(self.use_glow_plug_b as u8);
        payload.put_u16_le(self.target_hpsi);
        payload.put_u16_le(self.tolerance_hpsi);
        payload.put_u16_le(self.min_temp_rise_tk);
        payload.put_u16_le(self.max_pressure_wait_ms);
        payload.put_u16_le(self.max_ignite_wait_ms);
        payload.put_u16_le(self.sol_b_delay_ms);
        payload.put_u16_le(self.pre_purge_pump_ms);
        payload.put_u16_le(self.pre_purge_sol_a_ms);
        Frame::command(AUTO_IGNITION_SEQUENCE, &payload)
    }
}

/// Pump A closed-loop control payload.
///
/// | offset | size | field          |
/// |--------|------|----------------|
/// | 0      | 1    | enable         |
/// | 1      | 2    | target, hPSI   |
#[derive(Debug, Clone, Copy)]
pub struct PumpAClosedLoop {
    pub enable: bool,
    pub target_hpsi: u16,
}

impl PumpAClosedLoop {
    pub fn encode(&self) -> Frame {
        let mut payload = Vec::with_capacity(3);
        payload.put_u8(self.enable as u8);
        payload.put_u16_le(self.target_hpsi);
        Frame::command(SET_PUMPA_CLOSED_LOOP, &payload)
    }
}

/// Auxiliary pump drive payload.
///
/// | offset | size | field         |
/// |--------|------|---------------|
/// | 0      | 1    | pump id       |
/// | 1      | 1    | power, %      |
/// | 2      | 1    | kick          |
#[derive(Debug, Clone, Copy)]
pub struct PumpAux1Control {
    pub pump_id: u8,
    pub power: u8,
    pub kick: u8,
}

impl PumpAux1Control {
    pub fn encode(&self) -> Frame {
        Frame::command(PUMP_AUX_1_CONTROL, &[self.pump_id, self.power, self.kick])
    }
}

/// Zero-payload extended status request.
pub fn read_data_extended() -> Frame {
    Frame::command(READ_DATA_EXTENDED, &[])
}

/// Zero-payload configuration read.
pub fn configuration_read() -> Frame {
    Frame::command(CONFIGURATION_READ, &[])
}

/// Zero-payload goodbye announcement.
pub fn goodbye() -> Frame {
    Frame::command(GOODBYE, &[])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phx21::frame::checksum;

    #[test]
    fn test_read_data_extended_roundtrip() {
        let frame = read_data_extended();
        let bytes = frame.as_bytes();
        assert_eq!(bytes[0], 0x5A);
        assert_eq!(bytes[2], READ_DATA_EXTENDED);
        assert_eq!(bytes[3], checksum(&bytes[..3]));
        assert!(frame.payload().is_empty());

        // Loop it back as a response and deframe
        let mut wire = bytes.to_vec();
        wire[0] = 0xA5;
        let mut deframer = crate::phx21::frame::Deframer::for_responses();
        let mut out = None;
        for &b in &wire {
            out = deframer.push(b);
        }
        let decoded = out.unwrap();
        assert_eq!(decoded.cmd_id(), READ_DATA_EXTENDED);
        assert!(decoded.payload().is_empty());
    }

    #[test]
    fn test_integration_control_offsets() {
        let frame = IntegrationControl::setup(10).encode();
        let payload = frame.payload();
        assert_eq!(payload.len(), 10);
        assert_eq!(payload[0], 0); // mode
        assert_eq!(payload[1], 1); // charge multiplier
        assert_eq!(payload[2], 7); // range
        assert_eq!(
            u32::from_le_bytes(payload[3..7].try_into().unwrap()),
            50_000
        );
        assert_eq!(u16::from_le_bytes(payload[7..9].try_into().unwrap()), 10);
        assert_eq!(payload[9], 0); // report mode
    }

    #[test]
    fn test_ignition_recipe_offsets() {
        let frame = AutoIgnitionSequence::recipe(true).encode();
        let payload = frame.payload();
        assert_eq!(payload.len(), 18);
        assert_eq!(payload[0], 1); // start
        assert_eq!(payload[1], 0); // glow plug B unused
        assert_eq!(u16::from_le_bytes(payload[2..4].try_into().unwrap()), 175);
        assert_eq!(u16::from_le_bytes(payload[4..6].try_into().unwrap()), 5);
        assert_eq!(u16::from_le_bytes(payload[6..8].try_into().unwrap()), 10);
        assert_eq!(
            u16::from_le_bytes(payload[8..10].try_into().unwrap()),
            10_000
        );
        assert_eq!(
            u16::from_le_bytes(payload[10..12].try_into().unwrap()),
            5_000
        );
        assert_eq!(
            u16::from_le_bytes(payload[12..14].try_into().unwrap()),
            1_000
        );
        assert_eq!(
            u16::from_le_bytes(payload[14..16].try_into().unwrap()),
            5_000
        );
        assert_eq!(
            u16::from_le_bytes(payload[16..18].try_into().unwrap()),
            5_000
        );
    }

    #[test]
    fn test_deadhead_offsets() {
        let frame = DeadheadParams {
            enable: true,
            pressure_limit: 150,
            timeout: 100,
        }
        .encode();
        let payload = frame.payload();
        assert_eq!(payload.len(), 5);
        assert_eq!(payload[0], 1);
        assert_eq!(u16::from_le_bytes(payload[1..3].try_into().unwrap()), 150);
        assert_eq!(u16::from_le_bytes(payload[3..5].try_into().unwrap()), 100);
    }

    #[test]
    fn test_h2_compensation_signed() {
        let frame = H2PressureCompensation {
            pos_per_thousand: -3000,
            neg_per_thousand: 3000,
        }
        .encode();
        let payload = frame.payload();
        assert_eq!(
            i32::from_le_bytes(payload[0..4].try_into().unwrap()),
            -3000
        );
        assert_eq!(i32::from_le_bytes(payload[4..8].try_into().unwrap()), 3000);
    }

    #[test]
    fn test_pump_cutoff_payloads() {
        let closed = PumpAClosedLoop {
            enable: false,
            target_hpsi: 0,
        }
        .encode();
        assert_eq!(closed.payload(), &[0, 0, 0]);

        let aux = PumpAux1Control {
            pump_id: 0,
            power: 0,
            kick: 0,
        }
        .encode();
        assert_eq!(aux.payload(), &[0, 0, 0]);
    }
}
