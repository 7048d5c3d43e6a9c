use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Buf, BufMut};
use rd_dongle_core::{ClientRoster, EngineGate, ServiceAdvertiser};
use rd_dongle_scpi::SharedEngine;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::port::CyclicPort;
use crate::rpc;
use crate::xdr::{decode_call, put_opaque, read_record, reply_header, write_record};

/// Request buffer bound; also fixes the advertised maximum write size.
pub const VXI_READ_SIZE: usize = 256;

/// The port the Core server currently listens on, shared with portmap.
/// Zero while the listener is down or a link is being served.
#[derive(Debug, Clone, Default)]
pub struct VxiPortHandle(Arc<AtomicU32>);

impl VxiPortHandle {
    pub fn set(&self, port: u16) {
        self.0.store(u32::from(port), Ordering::Release);
    }

    pub fn clear(&self) {
        self.0.store(0, Ordering::Release);
    }

    pub fn current(&self) -> u16 {
        self.0.load(Ordering::Acquire) as u16
    }
}

type CurrentPeer = Arc<Mutex<Option<(SocketAddr, CancellationToken)>>>;

/// The VXI-11 Core server: one listener, one connection, one link.
#[derive(Clone)]
pub struct VxiServer {
    port_handle: VxiPortHandle,
    current_peer: CurrentPeer,
}

impl VxiServer {
    /// Start serving on the cyclic range `[port_start, port_end]`.
    ///
    /// A singleton range is advertised through `advertiser`; a rotating
    /// one is not, because the port changes with every link.
    pub async fn start(
        bind: IpAddr,
        port_start: u16,
        port_end: u16,
        engine: SharedEngine,
        gate: EngineGate,
        advertiser: Arc<dyn ServiceAdvertiser>,
        cancel: CancellationToken,
    ) -> Self {
        let port_handle = VxiPortHandle::default();
        let current_peer: CurrentPeer = Arc::new(Mutex::new(None));
        let server = Self {
            port_handle: port_handle.clone(),
            current_peer: Arc::clone(&current_peer),
        };
        tokio::spawn(run(
            bind,
            CyclicPort::new(port_start, port_end),
            engine,
            gate,
            advertiser,
            port_handle,
            current_peer,
            cancel,
        ));
        server
    }

    /// Port to hand to GETPORT callers; zero while unavailable.
    pub fn current_port(&self) -> u16 {
        self.port_handle.current()
    }

    pub fn port_handle(&self) -> VxiPortHandle {
        self.port_handle.clone()
    }

    /// VISA resource string of this transport.
    pub fn visa_resource(&self, advertised: IpAddr) -> String {
        format!("TCPIP::{advertised}::INSTR")
    }
}

#[async_trait]
impl ClientRoster for VxiServer {
    fn protocol(&self) -> &'static str {
        "VXI-11"
    }

    async fn connected_clients(&self) -> Vec<IpAddr> {
        self.current_peer
            .lock()
            .await
            .as_ref()
            .map(|(peer, _)| vec![peer.ip()])
            .unwrap_or_default()
    }

    async fn disconnect(&self, ip: IpAddr) {
        if let Some((peer, token)) = self.current_peer.lock().await.as_ref() {
            if peer.ip() == ip {
                info!(peer = %peer, "disconnecting vxi-11 client");
                token.cancel();
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run(
    bind: IpAddr,
    mut ports: CyclicPort,
    engine: SharedEngine,
    gate: EngineGate,
    advertiser: Arc<dyn ServiceAdvertiser>,
    port_handle: VxiPortHandle,
    current_peer: CurrentPeer,
    cancel: CancellationToken,
) {
    let singleton = ports.is_singleton();
    let mut advertised = false;
    let mut listener: Option<TcpListener> = None;
    loop {
        if listener.is_none() {
            match TcpListener::bind((bind, ports.current())).await {
                Ok(bound) => {
                    info!(port = ports.current(), "vxi-11 listening");
                    port_handle.set(ports.current());
                    if singleton && !advertised {
                        advertiser.advertise("vxi-11", ports.current(), &[("version", "1999.0")]);
                        advertised = true;
                    }
                    listener = Some(bound);
                }
                Err(e) => {
                    warn!(port = ports.current(), error = %e, "bind failed, trying next port");
                    ports.advance();
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(std::time::Duration::from_secs(1)) => continue,
                    }
                }
            }
        }

        let Some(bound) = listener.as_ref() else {
            continue;
        };
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = bound.accept() => accepted,
        };
        let (stream, peer) = match accepted {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "accept failed");
                continue;
            }
        };

        info!(peer = %peer, port = ports.current(), "vxi-11 connection established");
        // A link is exclusive; stop answering GETPORT while it lives.
        port_handle.clear();
        let conn_cancel = cancel.child_token();
        *current_peer.lock().await = Some((peer, conn_cancel.clone()));

        serve_connection(stream, peer, &engine, &gate, conn_cancel).await;

        // Peer disconnect without DESTROY_LINK is an implicit destroy.
        gate.release_external();
        current_peer.lock().await.take();
        info!(peer = %peer, "vxi-11 connection closed");

        if singleton {
            port_handle.set(ports.current());
        } else {
            // Rotate to the next port in the range for the next link.
            drop(listener.take());
            ports.advance();
        }
    }
}

async fn serve_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    engine: &SharedEngine,
    gate: &EngineGate,
    cancel: CancellationToken,
) {
    loop {
        let record = tokio::select! {
            _ = cancel.cancelled() => break,
            record = read_record(&mut stream, VXI_READ_SIZE) => record,
        };
        let record = match record {
            Ok(Some(record)) => record,
            Ok(None) => break,
            Err(e) => {
                debug!(peer = %peer, error = %e, "dropping connection");
                break;
            }
        };
        let Some((call, payload)) = decode_call(&record) else {
            debug!(peer = %peer, "truncated call, dropping connection");
            break;
        };
        if call.msg_type != rpc::MSG_CALL {
            continue;
        }

        if call.program != rpc::VXI_11_CORE {
            warn!(program = call.program, "unknown program");
            let reply = reply_header(call.xid, rpc::status::PROG_UNAVAIL);
            if write_record(&mut stream, &reply).await.is_err() {
                break;
            }
            continue;
        }

        let mut close_after_reply = false;
        let reply = match call.procedure {
            rpc::proc::CREATE_LINK => {
                let error = if gate.claim_external() {
                    engine.lock().await.reset_buffers();
                    debug!(peer = %peer, "link created");
                    rpc::error::NO_ERROR
                } else {
                    warn!(peer = %peer, "engine busy, refusing link");
                    rpc::error::OUT_OF_RESOURCES
                };
                let mut reply = reply_header(call.xid, rpc::status::SUCCESS);
                reply.put_u32(error);
                reply.put_u32(0); // link id
                reply.put_u32(0); // abort port
                reply.put_u32(if error == rpc::error::NO_ERROR {
                    (VXI_READ_SIZE - 4) as u32
                } else {
                    0
                });
                reply
            }
            rpc::proc::DEV_WRITE => {
                let (data, original_len) = write_payload(payload);
                debug!(peer = %peer, data = %data, "device write");
                engine.lock().await.write_external(&data).await;
                let mut reply = reply_header(call.xid, rpc::status::SUCCESS);
                reply.put_u32(rpc::error::NO_ERROR);
                reply.put_u32(original_len);
                reply
            }
            rpc::proc::DEV_READ => {
                let data = engine.lock().await.read_external().unwrap_or_default();
                debug!(peer = %peer, data = %data, "device read");
                let mut reply = reply_header(call.xid, rpc::status::SUCCESS);
                reply.put_u32(rpc::error::NO_ERROR);
                reply.put_u32(rpc::REASON_END);
                put_opaque(&mut reply, data.as_bytes());
                reply
            }
            rpc::proc::DESTROY_LINK => {
                debug!(peer = %peer, "link destroyed");
                close_after_reply = true;
                let mut reply = reply_header(call.xid, rpc::status::SUCCESS);
                reply.put_u32(rpc::error::NO_ERROR);
                reply
            }
            other => {
                warn!(procedure = other, "unknown procedure");
                reply_header(call.xid, rpc::status::PROC_UNAVAIL)
            }
        };

        if write_record(&mut stream, &reply).await.is_err() {
            break;
        }
        if close_after_reply {
            break;
        }
    }
}

/// Extract the DEV_WRITE data, right-trimmed of trailing whitespace the
/// way the parser wants it, along with the length the client sent (which
/// the reply must echo).
fn write_payload(payload: &[u8]) -> (String, u32) {
    // link id, io timeout, lock timeout, flags, then opaque data
    if payload.len() < 20 {
        return (String::new(), 0);
    }
    let mut fields = &payload[16..20];
    let original_len = fields.get_u32();
    let data = &payload[20..];
    let len = (original_len as usize).min(data.len());
    let mut end = len;
    while end > 0 && data[end - 1].is_ascii_whitespace() {
        end -= 1;
    }
    (
        String::from_utf8_lossy(&data[..end]).into_owned(),
        original_len,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_payload_trims_line_endings() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&[0u8; 16]);
        payload.extend_from_slice(&7u32.to_be_bytes());
        payload.extend_from_slice(b"*IDN?\r\n\0"); // padded opaque
        let (data, original_len) = write_payload(&payload);
        assert_eq!(data, "*IDN?");
        assert_eq!(original_len, 7);
    }

    #[test]
    fn short_write_payload_is_empty() {
        assert_eq!(write_payload(&[0u8; 8]), (String::new(), 0));
    }
}
