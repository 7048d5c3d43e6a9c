//! ONC-RPC and VXI-11 protocol constants.

/// Portmap/rpcbind program number.
pub const PORTMAP: u32 = 0x186A0;
/// VXI-11 Core channel program number.
pub const VXI_11_CORE: u32 = 0x607AF;

pub const MSG_CALL: u32 = 0;
pub const MSG_REPLY: u32 = 1;
pub const MSG_ACCEPTED: u32 = 0;

/// Accept-state of a reply.
pub mod status {
    pub const SUCCESS: u32 = 0;
    pub const PROG_UNAVAIL: u32 = 1;
    pub const PROG_MISMATCH: u32 = 2;
    pub const PROC_UNAVAIL: u32 = 3;
    pub const GARBAGE_ARGS: u32 = 4;
}

/// Procedure numbers this device answers.
pub mod proc {
    pub const GET_PORT: u32 = 3;
    pub const CREATE_LINK: u32 = 10;
    pub const DEV_WRITE: u32 = 11;
    pub const DEV_READ: u32 = 12;
    pub const DESTROY_LINK: u32 = 23;
}

/// VXI-11 error codes carried in response bodies.
pub mod error {
    pub const NO_ERROR: u32 = 0;
    pub const OUT_OF_RESOURCES: u32 = 9;
}

/// DEV_READ end reason: no more data.
pub const REASON_END: u32 = 4;

/// High bit of the TCP record mark: final fragment.
pub const FRAG_LAST: u32 = 0x8000_0000;
