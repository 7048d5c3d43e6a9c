//! Model identification and register scaling.
//!
//! The PSU reports a 16-bit id; the id range picks the model, and the
//! model picks the multiplier for each physical quantity
//! (`physical = raw / multiplier`). The RD6012P changes its current
//! resolution with the selected range, so its current multiplier comes
//! from the bus rather than from a table.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Model {
    Rd6006,
    Rd6006P,
    Rd6012,
    Rd6012P,
    Rd6018,
    Rd6024,
    Rd6030,
}

impl Model {
    pub fn from_id(id: u16) -> Option<Self> {
        match id {
            60180..=60189 => Some(Self::Rd6018),
            60120..=60124 => Some(Self::Rd6012),
            60125..=60129 => Some(Self::Rd6012P),
            60060..=60064 => Some(Self::Rd6006),
            60065 => Some(Self::Rd6006P),
            60301 => Some(Self::Rd6030),
            id if id >= 60241 => Some(Self::Rd6024),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rd6006 => "RD6006",
            Self::Rd6006P => "RD6006P",
            Self::Rd6012 => "RD6012",
            Self::Rd6012P => "RD6012P",
            Self::Rd6018 => "RD6018",
            Self::Rd6024 => "RD6024",
            Self::Rd6030 => "RD6030",
        }
    }

    /// Whether the current multiplier depends on the selected range.
    pub fn has_switched_current_range(&self) -> bool {
        matches!(self, Self::Rd6012P)
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Multipliers mapping raw register values to physical units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scaling {
    pub voltage: f64,
    pub current: f64,
    pub power: f64,
    pub voltage_in: f64,
}

impl Default for Scaling {
    fn default() -> Self {
        Self {
            voltage: 100.0,
            current: 100.0,
            power: 100.0,
            voltage_in: 100.0,
        }
    }
}

impl Scaling {
    /// Multipliers for `model`. `current_range` is the value of the range
    /// register and only consulted on range-switched models: range 0 is
    /// the fine (6 A) range with 0.1 mA resolution.
    pub fn for_model(model: Model, current_range: u16) -> Self {
        let mut scaling = Self::default();
        match model {
            Model::Rd6018 | Model::Rd6012 | Model::Rd6024 | Model::Rd6030 => {}
            Model::Rd6006 => {
                scaling.current = 1000.0;
            }
            Model::Rd6006P => {
                scaling.voltage = 1000.0;
                scaling.current = 10000.0;
                scaling.power = 1000.0;
            }
            Model::Rd6012P => {
                scaling.voltage = 1000.0;
                scaling.power = 1000.0;
                scaling.current = if current_range == 0 { 10000.0 } else { 1000.0 };
            }
        }
        scaling
    }

    pub fn value_to_voltage(&self, value: u16) -> f64 {
        f64::from(value) / self.voltage
    }

    pub fn value_to_voltage_in(&self, value: u16) -> f64 {
        f64::from(value) / self.voltage_in
    }

    pub fn value_to_current(&self, value: u16) -> f64 {
        f64::from(value) / self.current
    }

    pub fn values_to_power(&self, values: [u16; 2]) -> f64 {
        let raw = (u32::from(values[0]) << 16) + u32::from(values[1]);
        f64::from(raw) / self.power
    }

    pub fn voltage_to_value(&self, voltage: f64) -> u16 {
        (voltage * self.voltage).round() as u16
    }

    pub fn current_to_value(&self, current: f64) -> u16 {
        (current * self.current).round() as u16
    }
}

/// Temperatures are a sign cell (0 positive, anything else negative)
/// followed by a magnitude cell.
pub fn values_to_temperature(values: [u16; 2]) -> f64 {
    let sign = if values[0] == 0 { 1.0 } else { -1.0 };
    sign * f64::from(values[1])
}

/// Ah and Wh are 32-bit milliunit counters split across two cells.
pub fn values_to_milliunits(values: [u16; 2]) -> f64 {
    let raw = (u32::from(values[0]) << 16) + u32::from(values[1]);
    f64::from(raw) / 1000.0
}
