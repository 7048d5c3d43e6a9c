//! Shared primitives of the RD dongle gateway.
//!
//! The protocol servers (raw SCPI, VXI-11, Modbus TCP bridge, HTTP) are
//! separate crates; what they have in common lives here: the exclusivity
//! gate over the SCPI engine, the client-roster trait the HTTP surface
//! drives disconnections through, the service-advertisement seam, the
//! reboot controller and the one-shot PSU clock sync.

mod advertise;
mod arbitration;
mod clock;
mod info;
mod reboot;
mod roster;

pub use advertise::{LogAdvertiser, ServiceAdvertiser};
pub use arbitration::{EngineGate, GateState};
pub use clock::{sync_psu_clock, ClockSyncError};
pub use info::DongleInfo;
pub use reboot::{RebootController, RebootReason};
pub use roster::ClientRoster;
