//! Minimal portmap/rpcbind responder.
//!
//! Listens on UDP and TCP and answers exactly one question: on which port
//! does the VXI-11 Core server currently listen. Anything other than a
//! PORTMAP GETPORT call gets the canonical unavailable status.

use std::net::{IpAddr, SocketAddr};

use bytes::BufMut;
use tokio::net::{TcpListener, UdpSocket};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::rpc;
use crate::server::VxiPortHandle;
use crate::xdr::{decode_call, read_record, reply_header, write_record};

/// Bind requests are 56 bytes; leave headroom.
const BIND_READ_SIZE: usize = 256;

pub struct PortmapServer {
    udp_addr: SocketAddr,
    tcp_addr: SocketAddr,
}

impl PortmapServer {
    /// Bind UDP and TCP listeners on `port` and serve until cancelled.
    pub async fn start(
        bind: IpAddr,
        port: u16,
        vxi_port: VxiPortHandle,
        cancel: CancellationToken,
    ) -> std::io::Result<Self> {
        let udp = UdpSocket::bind((bind, port)).await?;
        let tcp = TcpListener::bind((bind, port)).await?;
        let udp_addr = udp.local_addr()?;
        let tcp_addr = tcp.local_addr()?;
        info!(port, "portmap listening on udp and tcp");

        let udp_cancel = cancel.clone();
        let udp_ports = vxi_port.clone();
        tokio::spawn(async move {
            let mut buf = [0u8; BIND_READ_SIZE];
            loop {
                let (len, peer) = tokio::select! {
                    _ = udp_cancel.cancelled() => break,
                    received = udp.recv_from(&mut buf) => match received {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!(error = %e, "udp receive failed");
                            continue;
                        }
                    },
                };
                if let Some(reply) = answer(&buf[..len], &udp_ports) {
                    if let Err(e) = udp.send_to(&reply, peer).await {
                        warn!(peer = %peer, error = %e, "udp reply failed");
                    }
                }
            }
        });

        tokio::spawn(async move {
            loop {
                let (mut stream, peer) = tokio::select! {
                    _ = cancel.cancelled() => break,
                    accepted = tcp.accept() => match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!(error = %e, "tcp accept failed");
                            continue;
                        }
                    },
                };
                // One question per connection, like every rpcbind client
                // actually behaves.
                let record = match read_record(&mut stream, BIND_READ_SIZE).await {
                    Ok(Some(record)) => record,
                    Ok(None) => continue,
                    Err(e) => {
                        debug!(peer = %peer, error = %e, "bad bind record");
                        continue;
                    }
                };
                if let Some(reply) = answer(&record, &vxi_port) {
                    if let Err(e) = write_record(&mut stream, &reply).await {
                        debug!(peer = %peer, error = %e, "tcp reply failed");
                    }
                }
            }
        });

        Ok(Self { udp_addr, tcp_addr })
    }

    pub fn udp_addr(&self) -> SocketAddr {
        self.udp_addr
    }

    pub fn tcp_addr(&self) -> SocketAddr {
        self.tcp_addr
    }
}

/// Validate a bind call and build the 28-byte response. `None` drops the
/// request without an answer (malformed packet).
fn answer(datagram: &[u8], vxi_port: &VxiPortHandle) -> Option<Vec<u8>> {
    let (call, _payload) = decode_call(datagram)?;
    if call.msg_type != rpc::MSG_CALL {
        return None;
    }
    let (status, port) = if call.program != rpc::PORTMAP {
        debug!(program = call.program, "unknown program");
        (rpc::status::PROG_UNAVAIL, 0)
    } else if call.procedure != rpc::proc::GET_PORT {
        debug!(procedure = call.procedure, "unknown procedure");
        (rpc::status::PROC_UNAVAIL, 0)
    } else {
        match vxi_port.current() {
            0 => (rpc::status::GARBAGE_ARGS, 0),
            port => (rpc::status::SUCCESS, u32::from(port)),
        }
    };
    let mut reply = reply_header(call.xid, status);
    reply.put_u32(port);
    Some(reply.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;
    use bytes::BytesMut;

    fn getport_call(xid: u32, program: u32, procedure: u32) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u32(xid);
        buf.put_u32(rpc::MSG_CALL);
        buf.put_u32(2);
        buf.put_u32(program);
        buf.put_u32(2);
        buf.put_u32(procedure);
        buf.put_bytes(0, 16);
        // getport payload: program, version, protocol, port
        buf.put_u32(rpc::VXI_11_CORE);
        buf.put_u32(1);
        buf.put_u32(6);
        buf.put_u32(0);
        buf.to_vec()
    }

    #[test]
    fn answers_getport_with_the_current_port() {
        let handle = VxiPortHandle::default();
        handle.set(9010);
        let reply = answer(
            &getport_call(0xDEADBEEF, rpc::PORTMAP, rpc::proc::GET_PORT),
            &handle,
        )
        .unwrap();
        assert_eq!(reply.len(), 28);
        assert_eq!(&reply[..4], &0xDEADBEEFu32.to_be_bytes());
        assert_eq!(&reply[20..24], &[0, 0, 0, 0]); // SUCCESS
        assert_eq!(&reply[24..28], &9010u32.to_be_bytes());
    }

    #[test]
    fn unknown_program_and_procedure() {
        let handle = VxiPortHandle::default();
        handle.set(9010);
        let reply = answer(&getport_call(1, 0x999, rpc::proc::GET_PORT), &handle).unwrap();
        assert_eq!(&reply[20..24], &rpc::status::PROG_UNAVAIL.to_be_bytes());
        assert_eq!(&reply[24..28], &[0, 0, 0, 0]);

        let reply = answer(&getport_call(1, rpc::PORTMAP, 4), &handle).unwrap();
        assert_eq!(&reply[20..24], &rpc::status::PROC_UNAVAIL.to_be_bytes());
    }

    #[test]
    fn busy_server_reports_no_port() {
        let handle = VxiPortHandle::default();
        let reply = answer(
            &getport_call(1, rpc::PORTMAP, rpc::proc::GET_PORT),
            &handle,
        )
        .unwrap();
        assert_eq!(&reply[20..24], &rpc::status::GARBAGE_ARGS.to_be_bytes());
        assert_eq!(&reply[24..28], &[0, 0, 0, 0]);
    }

    #[test]
    fn truncated_datagrams_are_ignored() {
        let handle = VxiPortHandle::default();
        assert!(answer(&[0u8; 12], &handle).is_none());
    }
}
