//! Data-plane logic applied to each decoded phx21 status.
//!
//! A raw status from the wire passes through, in order: the junk filter,
//! zero-dithering, ignition hysteresis, the pump safety check, range
//! switching, sliding-window PPM averaging, and hardware-averaging
//! adaptation. The pass mutates the status in place and returns the
//! follow-up commands the engine must issue.

use std::collections::VecDeque;

use phxlink_types::{round1, Phx21Status, RangeMode};

use crate::error::{Error, Result};

/// Consecutive suspect samples after which one is accepted anyway.
const JUNK_ACCEPT_AFTER: u32 = 10;
/// Consecutive zero readings before 0.1 is substituted on a live display.
const ZERO_DITHER_AFTER: u32 = 5;
/// Consecutive disagreeing samples required to flip the ignition state.
const IGNITION_CONFIRMATIONS: u32 = 3;
/// Confirming samples required before a range switch. Kept as a constant
/// for tunability; at 1 the switch fires on the first sample.
const RANGE_CHANGE_CONFIRMATIONS: u32 = 1;
/// Detector current that forces the jump from LO to MAX range, in pA.
const RANGE_UP_PICOAMPS: f64 = 6500.0;
/// Detector current that allows the drop from MAX back to LO, in pA.
const RANGE_DOWN_PICOAMPS: f64 = 6000.0;
/// Pump drive above which combustion must be cut for safety, in percent.
const PUMP_CUTOFF_PERCENT: f64 = 85.0;
/// Detector current below which the slow hardware average is selected.
const HW_AVG_PICOAMPS: f64 = 100.0;
/// Fast hardware averaging depth.
pub const HW_AVG_FAST: u16 = 10;
/// Slow hardware averaging depth.
pub const HW_AVG_SLOW: u16 = 50;

/// Follow-up command the engine must issue after a control pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    /// Issue SET_SAMPLING_PARAMETERS for the new range and let it settle.
    SwitchRange(RangeMode),
    /// Re-issue INTEGRATION_CONTROL with the new averaging depth.
    SetHardwareAveraging(u16),
    /// Kill pump A and the auxiliary pump; combustion with a saturated
    /// pump risks the cell.
    PumpSafetyCutoff,
}

/// Outcome of one control pass.
#[derive(Debug, Clone)]
pub struct Processed {
    /// The status with ignition and averaging fields filled in.
    pub status: Phx21Status,
    /// The PPM figure to report; `None` renders as "N/A" (flame out).
    pub reported_ppm: Option<f64>,
    /// Commands the engine must issue as a consequence of this sample.
    pub actions: Vec<ControlAction>,
}

/// Averaging knobs for the sliding PPM window.
#[derive(Debug, Clone)]
pub struct AveragingConfig {
    /// Tolerance band around the long average, in percent.
    pub use_avg_percent: f64,
    /// Samples in the long average tail.
    pub long_average_count: usize,
    /// Samples in the short average tail.
    pub short_average_count: usize,
    /// Bound on the raw PPM history.
    pub window: usize,
}

impl Default for AveragingConfig {
    fn default() -> Self {
        Self {
            use_avg_percent: 10.0,
            long_average_count: 25,
            short_average_count: 5,
            window: 50,
        }
    }
}

/// Mutable control state carried between polls.
#[derive(Debug)]
pub struct DataPlane {
    averaging: AveragingConfig,
    junk_count: u32,
    prev_ignited: Option<bool>,
    ignition_change_count: u32,
    zero_streak: u32,
    range_change_count: u32,
    hw_samples_to_avg: u16,
    past_ppms: VecDeque<f64>,
}

impl DataPlane {
    pub fn new(averaging: AveragingConfig) -> Self {
        Self {
            averaging,
            junk_count: 0,
            prev_ignited: None,
            ignition_change_count: 0,
            zero_streak: 0,
            range_change_count: 0,
            hw_samples_to_avg: HW_AVG_FAST,
            past_ppms: VecDeque::new(),
        }
    }

    /// Consecutive suspect samples seen so far.
    pub fn junk_data_count(&self) -> u32 {
        self.junk_count
    }

    /// The hardware averaging depth last requested.
    pub fn hw_samples_to_avg(&self) -> u16 {
        self.hw_samples_to_avg
    }

    /// Run the full control pass over one decoded status.
    pub fn process(&mut self, mut status: Phx21Status) -> Result<Processed> {
        if let Some(reason) = junk_reason(&status) {
            self.junk_count += 1;
            if self.junk_count < JUNK_ACCEPT_AFTER {
                return Err(Error::suspect_data(reason, self.junk_count));
            }
            // Ten in a row: the "junk" is what the hardware is really saying.
        } else {
            self.junk_count = 0;
        }

        if status.ppm == 0.0 {
            self.zero_streak += 1;
            if self.zero_streak > ZERO_DITHER_AFTER {
                status.ppm = 0.1;
            }
        } else {
            self.zero_streak = 0;
        }

        status.is_ignited = self.ignition_with_hysteresis(&status);

        let mut actions = Vec::new();

        if status.is_ignited && status.pump_power >= PUMP_CUTOFF_PERCENT {
            actions.push(ControlAction::PumpSafetyCutoff);
        }

        if let Some(target) = self.range_switch_target(&status) {
            actions.push(ControlAction::SwitchRange(target));
        }

        let reported_ppm = self.average(&mut status);

        if status.picoamps <= HW_AVG_PICOAMPS && self.hw_samples_to_avg == HW_AVG_FAST {
            self.hw_samples_to_avg = HW_AVG_SLOW;
            actions.push(ControlAction::SetHardwareAveraging(HW_AVG_SLOW));
        } else if status.picoamps > HW_AVG_PICOAMPS && self.hw_samples_to_avg == HW_AVG_SLOW {
            self.hw_samples_to_avg = HW_AVG_FAST;
            actions.push(ControlAction::SetHardwareAveraging(HW_AVG_FAST));
        }

        Ok(Processed {
            reported_ppm: if status.is_ignited { reported_ppm } else { None },
            status,
            actions,
        })
    }

    /// Three-sample hysteresis on the ignited candidate; the very first
    /// sample commits directly.
    fn ignition_with_hysteresis(&mut self, status: &Phx21Status) -> bool {
        let candidate =
            status.thermocouple_f > 75.0 && status.is_solenoid_a_on && status.is_pump_a_on;

        let committed = match self.prev_ignited {
            None => candidate,
            Some(prev) if candidate == prev => {
                self.ignition_change_count = 0;
                prev
            }
            Some(prev) => {
                self.ignition_change_count += 1;
                if self.ignition_change_count >= IGNITION_CONFIRMATIONS {
                    self.ignition_change_count = 0;
                    candidate
                } else {
                    prev
                }
            }
        };
        self.prev_ignited = Some(committed);
        committed
    }

    fn range_switch_target(&mut self, status: &Phx21Status) -> Option<RangeMode> {
        let target = if status.fid_range == RangeMode::Lo && status.picoamps >= RANGE_UP_PICOAMPS {
            RangeMode::Max
        } else if status.fid_range == RangeMode::Max && status.picoamps <= RANGE_DOWN_PICOAMPS {
            RangeMode::Lo
        } else {
            self.range_change_count = 0;
            return None;
        };

        self.range_change_count += 1;
        if self.range_change_count >= RANGE_CHANGE_CONFIRMATIONS {
            self.range_change_count = 0;
            Some(target)
        } else {
            None
        }
    }

    /// Sliding-window averaging. The long and short branches round
    /// differently above 100 ppm; the mismatch is wire-compatible with the
    /// analyzer's companion software and is preserved as-is.
    fn average(&mut self, status: &mut Phx21Status) -> Option<f64> {
        self.past_ppms.push_back(status.ppm);
        while self.past_ppms.len() > self.averaging.window {
            self.past_ppms.pop_front();
        }

        let long_tail = tail(&self.past_ppms, self.averaging.long_average_count);
        let short_tail = tail(&self.past_ppms, self.averaging.short_average_count);

        let long_avg = round1(mean(&long_tail));
        let short_raw = mean(&short_tail);
        let short_avg = if short_raw >= 100.0 {
            short_raw.round()
        } else {
            round1(short_raw)
        };

        let band = long_avg * self.averaging.use_avg_percent / 100.0;
        let use_average = !short_tail.is_empty()
            && short_tail.iter().all(|s| (s - long_avg).abs() <= band);

        status.long_average_ppm = long_avg;
        status.short_average_ppm = short_avg;
        status.use_average = use_average;

        let reported = if use_average {
            if status.fid_range == RangeMode::Max {
                long_avg
            } else {
                short_avg
            }
        } else {
            status.ppm
        };
        Some(reported)
    }
}

fn junk_reason(status: &Phx21Status) -> Option<String> {
    if status.battery_voltage > 15.0 {
        Some(format!("battery {} V", status.battery_voltage))
    } else if status.picoamps < -10_000.0 {
        Some(format!("detector current {} pA", status.picoamps))
    } else if status.thermocouple_f < -400.0 {
        Some(format!("thermocouple {} °F", status.thermocouple_f))
    } else if status.pump_power > 100.0 {
        Some(format!("pump power {} %", status.pump_power))
    } else {
        None
    }
}

fn tail(window: &VecDeque<f64>, count: usize) -> Vec<f64> {
    let skip = window.len().saturating_sub(count);
    window.iter().skip(skip).copied().collect()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}
