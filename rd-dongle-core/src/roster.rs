use std::net::IpAddr;

use async_trait::async_trait;

/// Per-transport view of connected peers.
///
/// The HTTP surface enumerates these on the status page and routes
/// disconnect requests by protocol label.
#[async_trait]
pub trait ClientRoster: Send + Sync {
    /// Label shown to the operator, e.g. `"SCPI"`, `"Modbus TCP"`,
    /// `"VXI-11"`. Also the key the disconnect form posts back.
    fn protocol(&self) -> &'static str;

    async fn connected_clients(&self) -> Vec<IpAddr>;

    /// Forcibly drop every connection from `ip`. Unknown addresses are a
    /// no-op.
    async fn disconnect(&self, ip: IpAddr);
}
