//! VXI-11 instrument control for the RD dongle.
//!
//! Two servers cooperate here: the portmap responder on port 111 answers
//! GETPORT with wherever the VXI-11 Core server currently listens, and
//! the Core server itself speaks ONC-RPC over a cyclic TCP port range,
//! bridging DEV_WRITE/DEV_READ onto the SCPI engine while it holds the
//! engine gate. All multi-byte RPC fields are big-endian on the wire.

mod port;
mod portmap;
pub mod rpc;
mod server;
mod xdr;

pub use port::CyclicPort;
pub use portmap::PortmapServer;
pub use server::{VxiPortHandle, VxiServer, VXI_READ_SIZE};
pub use xdr::{decode_call, reply_header, RpcCall, RPC_CALL_HEADER_LEN};
