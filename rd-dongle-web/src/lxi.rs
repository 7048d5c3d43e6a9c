//! LXI device identification document.

use crate::state::WebState;

/// Render the XML identification document lxi-tools and friends fetch
/// from `/lxi/identification`.
pub fn identification_document(state: &WebState) -> String {
    let (model, serial, firmware) = match state.master.profile() {
        Ok(profile) => (
            profile.model.to_string(),
            format!("{:08}", profile.serial_number),
            profile.firmware_string(),
        ),
        Err(_) => ("unknown".to_string(), "unknown".to_string(), "unknown".to_string()),
    };
    let visa = state.vxi.visa_resource(state.advertised);
    let raw_visa = state.scpi.visa_resource(state.advertised);
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<LXIDevice xmlns="http://www.lxistandard.org/InstrumentIdentification/1.0">
  <Manufacturer>Riden</Manufacturer>
  <Model>{model}</Model>
  <SerialNumber>{serial}</SerialNumber>
  <FirmwareRevision>{firmware}</FirmwareRevision>
  <ManufacturerDescription>Riden power supply LAN dongle</ManufacturerDescription>
  <HomepageURL>http://{host}/</HomepageURL>
  <DriverURL>http://{host}/</DriverURL>
  <Interface InterfaceType="LXI" InterfaceName="eth0">
    <InstrumentAddressString>{visa}</InstrumentAddressString>
    <InstrumentAddressString>{raw_visa}</InstrumentAddressString>
    <Hostname>{hostname}</Hostname>
    <IPAddress>{ip}</IPAddress>
    <Port>{port}</Port>
  </Interface>
  <LXIVersion>1.5</LXIVersion>
</LXIDevice>
"#,
        host = state.advertised,
        hostname = state.info.hostname,
        ip = state.advertised,
        port = state.http_port,
    )
}
