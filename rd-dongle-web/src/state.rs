use std::net::IpAddr;
use std::sync::Arc;

use rd_dongle_bridge::ModbusBridge;
use rd_dongle_config::ConfigStore;
use rd_dongle_core::{ClientRoster, DongleInfo, RebootController};
use rd_dongle_modbus::ModbusMaster;
use rd_dongle_scpi::RawScpiServer;
use rd_dongle_vxi11::VxiServer;
use tokio::sync::Mutex;

use crate::firmware::FirmwareSink;

/// Everything the handlers reach for. Cloned per worker by actix.
#[derive(Clone)]
pub struct WebState {
    pub master: ModbusMaster,
    pub info: DongleInfo,
    pub store: Arc<Mutex<ConfigStore>>,
    pub scpi: RawScpiServer,
    pub bridge: ModbusBridge,
    pub vxi: VxiServer,
    pub reboot: RebootController,
    pub firmware: Arc<dyn FirmwareSink>,
    /// Address clients should use to reach the dongle.
    pub advertised: IpAddr,
    pub http_port: u16,
}

impl WebState {
    /// The transport rosters, in the order the status page lists them.
    pub fn rosters(&self) -> [&dyn ClientRoster; 3] {
        [&self.scpi, &self.bridge, &self.vxi]
    }

    /// Find a roster by its protocol label.
    pub fn roster(&self, protocol: &str) -> Option<&dyn ClientRoster> {
        self.rosters()
            .into_iter()
            .find(|roster| roster.protocol() == protocol)
    }
}
