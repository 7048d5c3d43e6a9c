//! SCPI front end of the RD dongle.
//!
//! [`ScpiEngine`] owns the command tree, the error queue and the
//! IEEE-488.2 status model, and turns newline-terminated command lines
//! into response strings by calling into the serial master. It is
//! transport agnostic: the raw TCP server feeds it directly, VXI-11
//! pushes writes and polls for the parked response while it holds the
//! [`EngineGate`](rd_dongle_core::EngineGate).

mod engine;
mod error;
mod params;
mod status;
mod transport;
mod tree;

pub use engine::{Identity, ScpiEngine, SharedEngine};
pub use error::{ErrorQueue, ERROR_QUEUE_DEPTH};
pub use transport::{RawScpiServer, SCPI_INPUT_BUFFER_LENGTH};
