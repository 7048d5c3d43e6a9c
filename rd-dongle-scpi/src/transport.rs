//! Raw SCPI transport: single-client, line-oriented TCP on port 5025.
//!
//! At most one client at a time; later connects are closed on accept.
//! While the engine is externally owned (a VXI-11 link is live) new
//! connects are refused and the current client is dropped as soon as the
//! gate transition is observed.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use rd_dongle_core::{ClientRoster, EngineGate, GateState};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::SharedEngine;

/// Input line cap; a client pushing more than this without a newline is
/// dropped.
pub const SCPI_INPUT_BUFFER_LENGTH: usize = 256;

type CurrentClient = Arc<Mutex<Option<(SocketAddr, CancellationToken)>>>;

#[derive(Clone)]
pub struct RawScpiServer {
    local_addr: SocketAddr,
    current: CurrentClient,
}

impl RawScpiServer {
    pub async fn start(
        addr: SocketAddr,
        engine: SharedEngine,
        gate: EngineGate,
        cancel: CancellationToken,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "raw scpi server listening");
        let current: CurrentClient = Arc::new(Mutex::new(None));
        let server = Self {
            local_addr,
            current: Arc::clone(&current),
        };
        tokio::spawn(accept_loop(listener, engine, gate, current, cancel));
        Ok(server)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// VISA resource string of this transport.
    pub fn visa_resource(&self, advertised: IpAddr) -> String {
        format!("TCPIP::{}::{}::SOCKET", advertised, self.port())
    }
}

#[async_trait]
impl ClientRoster for RawScpiServer {
    fn protocol(&self) -> &'static str {
        "SCPI"
    }

    async fn connected_clients(&self) -> Vec<IpAddr> {
        self.current
            .lock()
            .await
            .as_ref()
            .map(|(peer, _)| vec![peer.ip()])
            .unwrap_or_default()
    }

    async fn disconnect(&self, ip: IpAddr) {
        if let Some((peer, token)) = self.current.lock().await.as_ref() {
            if peer.ip() == ip {
                info!(peer = %peer, "disconnecting raw scpi client");
                token.cancel();
            }
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    engine: SharedEngine,
    gate: EngineGate,
    current: CurrentClient,
    cancel: CancellationToken,
) {
    loop {
        let (stream, peer) = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    continue;
                }
            },
        };

        if gate.is_external_owned() {
            debug!(peer = %peer, "refusing client, engine under external control");
            drop(stream);
            continue;
        }

        let mut slot = current.lock().await;
        if slot.is_some() {
            debug!(peer = %peer, "refusing second client");
            drop(stream);
            continue;
        }
        let conn_cancel = cancel.child_token();
        *slot = Some((peer, conn_cancel.clone()));
        drop(slot);

        info!(peer = %peer, "raw scpi client connected");
        engine.lock().await.reset_buffers();

        let engine = Arc::clone(&engine);
        let gate = gate.clone();
        let current = Arc::clone(&current);
        tokio::spawn(async move {
            serve_client(stream, peer, engine, gate, conn_cancel).await;
            current.lock().await.take();
            info!(peer = %peer, "raw scpi client gone");
        });
    }
}

async fn serve_client(
    mut stream: TcpStream,
    peer: SocketAddr,
    engine: SharedEngine,
    gate: EngineGate,
    cancel: CancellationToken,
) {
    let mut gate_rx = gate.watch();
    let mut line: Vec<u8> = Vec::with_capacity(SCPI_INPUT_BUFFER_LENGTH);
    let mut buf = [0u8; 64];
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            evicted = async { gate_rx.wait_for(|state| *state == GateState::ExternalOwned).await.is_ok() } => {
                if evicted {
                    debug!(peer = %peer, "dropping client, engine claimed externally");
                }
                break;
            }
            read = stream.read(&mut buf) => {
                let n = match read {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                for &byte in &buf[..n] {
                    if line.len() >= SCPI_INPUT_BUFFER_LENGTH {
                        warn!(peer = %peer, "input buffer overflow, dropping client");
                        return;
                    }
                    line.push(byte);
                    if byte != b'\n' {
                        continue;
                    }
                    let text = String::from_utf8_lossy(&line).into_owned();
                    line.clear();
                    let response = engine.lock().await.execute_line(&text).await;
                    if let Some(response) = response {
                        if stream.write_all(response.as_bytes()).await.is_err() {
                            return;
                        }
                    }
                }
            }
        }
    }
}
