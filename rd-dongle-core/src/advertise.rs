use tracing::info;

/// Seam towards service discovery.
///
/// The dongle announces its services (`_http`, `_lxi`, `_scpi-raw`,
/// `_modbus`, `_vxi-11`) when they come up; the actual mDNS responder is
/// an external collaborator behind this trait. The default implementation
/// only logs, which keeps headless deployments and tests quiet but
/// observable.
pub trait ServiceAdvertiser: Send + Sync {
    /// Announce `service` (without the `_tcp` suffix) on `port` with the
    /// given TXT records.
    fn advertise(&self, service: &str, port: u16, txt: &[(&str, &str)]);

    /// Withdraw a previous announcement, e.g. when the VXI-11 listener
    /// rotates away from its advertised port.
    fn withdraw(&self, service: &str);
}

#[derive(Debug, Default)]
pub struct LogAdvertiser;

impl ServiceAdvertiser for LogAdvertiser {
    fn advertise(&self, service: &str, port: u16, txt: &[(&str, &str)]) {
        info!(service, port, ?txt, "service available");
    }

    fn withdraw(&self, service: &str) {
        info!(service, "service withdrawn");
    }
}
