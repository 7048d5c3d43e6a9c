use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use rd_dongle_core::ClientRoster;
use rd_dongle_modbus::ModbusMaster;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::mbap::{MbapCodec, MbapFrame};

/// Concurrent TCP client cap; additional connections are closed on
/// accept.
pub const MAX_TCP_CLIENTS: usize = 4;

/// Gateway target device failed to respond.
const EXCEPTION_TARGET_FAILED: u8 = 0x0B;

type Connections = Arc<Mutex<HashMap<SocketAddr, CancellationToken>>>;

/// The Modbus TCP server. Cheap handle; the accept loop runs in its own
/// task until the supplied cancellation token fires.
#[derive(Clone)]
pub struct ModbusBridge {
    local_addr: SocketAddr,
    connections: Connections,
}

impl ModbusBridge {
    /// Bind `addr` and start serving.
    pub async fn start(
        addr: SocketAddr,
        master: ModbusMaster,
        cancel: CancellationToken,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "modbus tcp bridge listening");
        let connections: Connections = Arc::new(Mutex::new(HashMap::new()));
        let bridge = Self {
            local_addr,
            connections: Arc::clone(&connections),
        };
        tokio::spawn(accept_loop(listener, master, connections, cancel));
        Ok(bridge)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }
}

#[async_trait]
impl ClientRoster for ModbusBridge {
    fn protocol(&self) -> &'static str {
        "Modbus TCP"
    }

    async fn connected_clients(&self) -> Vec<IpAddr> {
        self.connections
            .lock()
            .await
            .keys()
            .map(|peer| peer.ip())
            .collect()
    }

    async fn disconnect(&self, ip: IpAddr) {
        let connections = self.connections.lock().await;
        for (peer, token) in connections.iter() {
            if peer.ip() == ip {
                info!(peer = %peer, "disconnecting modbus tcp client");
                token.cancel();
            }
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    master: ModbusMaster,
    connections: Connections,
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

        let mut guard = connections.lock().await;
        if guard.len() >= MAX_TCP_CLIENTS {
            warn!(peer = %peer, "client limit reached, refusing");
            drop(stream);
            continue;
        }
        let conn_cancel = cancel.child_token();
        guard.insert(peer, conn_cancel.clone());
        drop(guard);

        debug!(peer = %peer, "modbus tcp client connected");
        let master = master.clone();
        let connections = Arc::clone(&connections);
        tokio::spawn(async move {
            serve_client(stream, peer, master, conn_cancel).await;
            connections.lock().await.remove(&peer);
            debug!(peer = %peer, "modbus tcp client gone");
        });
    }
}

async fn serve_client(
    stream: TcpStream,
    peer: SocketAddr,
    master: ModbusMaster,
    cancel: CancellationToken,
) {
    let mut framed = Framed::new(stream, MbapCodec);
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = framed.next() => frame,
        };
        let request = match frame {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                // Malformed MBAP: drop the connection, no reply.
                warn!(peer = %peer, error = %e, "dropping client");
                break;
            }
            None => break,
        };
        if request.pdu.is_empty() {
            warn!(peer = %peer, "empty PDU, dropping client");
            break;
        }

        // While this awaits, the correlation tuple (transaction id, unit
        // id, peer) lives in this task; replies cannot cross clients.
        let response = match master
            .raw_transaction(request.unit_id, request.pdu.clone())
            .await
        {
            Ok(reply) => MbapFrame {
                transaction_id: request.transaction_id,
                unit_id: request.unit_id,
                pdu: reply,
            },
            Err(e) => {
                debug!(peer = %peer, error = %e, "serial side failed, synthesizing exception");
                MbapFrame {
                    transaction_id: request.transaction_id,
                    unit_id: request.unit_id,
                    pdu: Bytes::from(vec![request.pdu[0] | 0x80, EXCEPTION_TARGET_FAILED]),
                }
            }
        };
        if framed.send(response).await.is_err() {
            break;
        }
    }
}
