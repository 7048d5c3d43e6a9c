//! Typed views over the register map.

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};

use crate::registers::NUMBER_OF_PRESETS;
use crate::scaling::{values_to_milliunits, values_to_temperature, Scaling};

/// Which protection tripped, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protection {
    Ovp,
    Ocp,
    None,
}

impl Protection {
    pub fn from_raw(value: u16) -> Self {
        match value {
            1 => Self::Ovp,
            2 => Self::Ocp,
            _ => Self::None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ovp => "OVP",
            Self::Ocp => "OCP",
            Self::None => "None",
        }
    }
}

/// Regulation mode of the output stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    ConstantVoltage,
    ConstantCurrent,
    Unknown,
}

impl OutputMode {
    pub fn from_raw(value: u16) -> Self {
        match value {
            0 => Self::ConstantVoltage,
            1 => Self::ConstantCurrent,
            _ => Self::Unknown,
        }
    }
}

/// A stored `(V, I, OVP, OCP)` quadruple.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Preset {
    pub voltage: f64,
    pub current: f64,
    pub over_voltage_protection: f64,
    pub over_current_protection: f64,
}

impl Preset {
    pub(crate) fn from_values(values: [u16; 4], scaling: &Scaling) -> Self {
        Self {
            voltage: scaling.value_to_voltage(values[0]),
            current: scaling.value_to_current(values[1]),
            over_voltage_protection: scaling.value_to_voltage(values[2]),
            over_current_protection: scaling.value_to_current(values[3]),
        }
    }

    pub(crate) fn to_values(self, scaling: &Scaling) -> [u16; 4] {
        [
            scaling.voltage_to_value(self.voltage),
            scaling.current_to_value(self.current),
            scaling.voltage_to_value(self.over_voltage_protection),
            scaling.current_to_value(self.over_current_protection),
        ]
    }
}

/// The eight calibration cells. Raw values only; the dongle never
/// interprets them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Calibration {
    pub v_out_zero: u16,
    pub v_out_scale: u16,
    pub v_back_zero: u16,
    pub v_back_scale: u16,
    pub i_out_zero: u16,
    pub i_out_scale: u16,
    pub i_back_zero: u16,
    pub i_back_scale: u16,
}

impl Calibration {
    pub(crate) fn from_values(values: [u16; 8]) -> Self {
        Self {
            v_out_zero: values[0],
            v_out_scale: values[1],
            v_back_zero: values[2],
            v_back_scale: values[3],
            i_out_zero: values[4],
            i_out_scale: values[5],
            i_back_zero: values[6],
            i_back_scale: values[7],
        }
    }

    pub(crate) fn to_values(self) -> [u16; 8] {
        [
            self.v_out_zero,
            self.v_out_scale,
            self.v_back_zero,
            self.v_back_scale,
            self.i_out_zero,
            self.i_out_scale,
            self.i_back_zero,
            self.i_back_scale,
        ]
    }
}

/// PSU front-panel clock. Fields hold calendar values as displayed
/// (four-digit year, one-based month).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Clock {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl Clock {
    pub(crate) fn from_values(values: [u16; 6]) -> Self {
        Self {
            year: values[0],
            month: values[1] as u8,
            day: values[2] as u8,
            hour: values[3] as u8,
            minute: values[4] as u8,
            second: values[5] as u8,
        }
    }

    pub(crate) fn to_values(self) -> [u16; 6] {
        [
            self.year,
            self.month.into(),
            self.day.into(),
            self.hour.into(),
            self.minute.into(),
            self.second.into(),
        ]
    }

    pub fn from_naive(dt: NaiveDateTime) -> Self {
        Self {
            year: dt.year().clamp(0, u16::MAX as i32) as u16,
            month: dt.month() as u8,
            day: dt.day() as u8,
            hour: dt.hour() as u8,
            minute: dt.minute() as u8,
            second: dt.second() as u8,
        }
    }

    pub fn to_naive(self) -> Option<NaiveDateTime> {
        NaiveDate::from_ymd_opt(self.year.into(), self.month.into(), self.day.into())?
            .and_hms_opt(self.hour.into(), self.minute.into(), self.second.into())
    }
}

/// Snapshot of every interesting register, produced by one windowed bulk
/// read.
#[derive(Debug, Clone, PartialEq)]
pub struct AllValues {
    pub system_temperature_celsius: f64,
    pub system_temperature_fahrenheit: f64,
    pub voltage_set: f64,
    pub current_set: f64,
    pub voltage_out: f64,
    pub current_out: f64,
    pub power_out: f64,
    pub voltage_in: f64,
    pub keypad_locked: bool,
    pub protection: Protection,
    pub output_mode: OutputMode,
    pub output_on: bool,
    pub current_range: u16,
    pub battery_mode: bool,
    pub voltage_battery: f64,
    pub probe_temperature_celsius: f64,
    pub probe_temperature_fahrenheit: f64,
    pub ah: f64,
    pub wh: f64,
    pub clock: Clock,
    pub calibration: Calibration,
    pub take_ok: bool,
    pub take_out: bool,
    pub power_on_boot: bool,
    pub buzzer: bool,
    pub logo: bool,
    pub language: u16,
    pub brightness: u8,
    /// Stored slots only: `presets[0]` is M1.
    pub presets: [Preset; NUMBER_OF_PRESETS as usize],
}

impl AllValues {
    pub(crate) fn from_registers(regs: &[u16], scaling: &Scaling) -> Self {
        use crate::registers::Register as R;
        let cell = |r: R| regs[r.offset() as usize];
        let pair = |r: R| {
            let i = r.offset() as usize;
            [regs[i], regs[i + 1]]
        };
        let mut presets = [Preset::default(); NUMBER_OF_PRESETS as usize];
        for (slot, preset) in presets.iter_mut().enumerate() {
            let base = crate::registers::preset_base(slot as u8) as usize;
            *preset = Preset::from_values(
                [regs[base], regs[base + 1], regs[base + 2], regs[base + 3]],
                scaling,
            );
        }
        Self {
            system_temperature_celsius: values_to_temperature(pair(R::SystemTemperatureCelsiusSign)),
            system_temperature_fahrenheit: values_to_temperature(pair(
                R::SystemTemperatureFahrenheitSign,
            )),
            voltage_set: scaling.value_to_voltage(cell(R::VoltageSet)),
            current_set: scaling.value_to_current(cell(R::CurrentSet)),
            voltage_out: scaling.value_to_voltage(cell(R::VoltageOut)),
            current_out: scaling.value_to_current(cell(R::CurrentOut)),
            power_out: scaling.values_to_power(pair(R::PowerOutHigh)),
            voltage_in: scaling.value_to_voltage_in(cell(R::VoltageIn)),
            keypad_locked: cell(R::Keypad) != 0,
            protection: Protection::from_raw(cell(R::Protection)),
            output_mode: OutputMode::from_raw(cell(R::OutputMode)),
            output_on: cell(R::Output) != 0,
            current_range: cell(R::CurrentRange),
            battery_mode: cell(R::BatteryMode) != 0,
            voltage_battery: scaling.value_to_voltage(cell(R::VoltageBattery)),
            probe_temperature_celsius: values_to_temperature(pair(R::ProbeTemperatureCelsiusSign)),
            probe_temperature_fahrenheit: values_to_temperature(pair(
                R::ProbeTemperatureFahrenheitSign,
            )),
            ah: values_to_milliunits(pair(R::AhHigh)),
            wh: values_to_milliunits(pair(R::WhHigh)),
            clock: Clock::from_values([
                cell(R::Year),
                cell(R::Month),
                cell(R::Day),
                cell(R::Hour),
                cell(R::Minute),
                cell(R::Second),
            ]),
            calibration: Calibration::from_values([
                cell(R::VOutZero),
                cell(R::VOutScale),
                cell(R::VBackZero),
                cell(R::VBackScale),
                cell(R::IOutZero),
                cell(R::IOutScale),
                cell(R::IBackZero),
                cell(R::IBackScale),
            ]),
            take_ok: cell(R::TakeOk) != 0,
            take_out: cell(R::TakeOut) != 0,
            power_on_boot: cell(R::PowerOnBoot) != 0,
            buzzer: cell(R::Buzzer) != 0,
            logo: cell(R::Logo) != 0,
            language: cell(R::Language),
            brightness: cell(R::Brightness) as u8,
            presets,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_roundtrips_through_cells() {
        let clock = Clock {
            year: 2024,
            month: 2,
            day: 29,
            hour: 11,
            minute: 22,
            second: 0,
        };
        assert_eq!(Clock::from_values(clock.to_values()), clock);
        let naive = clock.to_naive().unwrap();
        assert_eq!(Clock::from_naive(naive), clock);
    }

    #[test]
    fn protection_raw_values() {
        assert_eq!(Protection::from_raw(0), Protection::None);
        assert_eq!(Protection::from_raw(1), Protection::Ovp);
        assert_eq!(Protection::from_raw(2), Protection::Ocp);
        assert_eq!(Protection::from_raw(0xff), Protection::None);
    }

    #[test]
    fn output_mode_raw_values() {
        assert_eq!(OutputMode::from_raw(0), OutputMode::ConstantVoltage);
        assert_eq!(OutputMode::from_raw(1), OutputMode::ConstantCurrent);
        assert_eq!(OutputMode::from_raw(2), OutputMode::Unknown);
    }
}
