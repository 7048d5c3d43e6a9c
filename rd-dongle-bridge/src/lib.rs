//! Modbus TCP to RTU passthrough bridge.
//!
//! Each MBAP frame received on the TCP side is forwarded opaquely (no
//! function-code interpretation) to the serial master as one raw
//! transaction against the client-supplied unit id; the RTU reply is
//! repackaged under the original `transaction_id` and sent back. When the
//! serial side refuses or stays silent the bridge synthesizes a
//! gateway-target-failed exception so TCP clients get a deterministic
//! answer instead of a hang.

mod mbap;
mod server;

pub use mbap::{MbapCodec, MbapError, MbapFrame};
pub use server::{ModbusBridge, MAX_TCP_CLIENTS};
