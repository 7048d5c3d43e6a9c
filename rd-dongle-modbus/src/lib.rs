//! Modbus RTU serial master for Riden RD-series power supplies.
//!
//! The bus is half duplex with a single slave (address 1), so everything
//! funnels through one transaction task that owns the serial stream: a
//! request goes out, at most one reply is outstanding, and the caller gets
//! the raw reply PDU back on a oneshot channel. Typed helpers layer the
//! register map and per-model scaling on top of that seam; the Modbus TCP
//! bridge uses the same seam with the PDU passed through opaquely.
//!
//! Register map and scaling follow the RD series register documentation.
//! The serial port runs 8N1 at the configured baud rate.

mod error;
mod frame;
mod master;
mod registers;
mod scaling;
pub mod sim;
mod types;

pub use error::{ModbusError, Result};
pub use frame::{crc16, RtuCodec, RtuFrame};
pub use master::{DeviceProfile, ModbusMaster, SLAVE_ADDRESS, TRANSACTION_TIMEOUT};
pub use registers::{Register, NUMBER_OF_PRESETS, REGISTER_SPACE};
pub use scaling::{Model, Scaling};
pub use types::{AllValues, Calibration, Clock, OutputMode, Preset, Protection};
