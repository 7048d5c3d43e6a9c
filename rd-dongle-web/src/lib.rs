//! HTTP control surface of the RD dongle.
//!
//! Read-only status pages plus the handful of POST-driven actions an
//! operator needs: disconnect a client, change the persisted
//! configuration, reboot the dongle, upload firmware. Long bodies stream
//! out in roughly kilobyte chunks.

mod firmware;
mod handlers;
mod html;
mod lxi;
mod server;
mod state;

pub use firmware::{FirmwareSink, StagingFirmwareSink};
pub use handlers::configure;
pub use server::ControlServer;
pub use state::WebState;
