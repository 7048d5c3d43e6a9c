use std::net::IpAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to load settings: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid VXI port range {start}..{end}")]
    InvalidVxiRange { start: u16, end: u16 },
}

/// Host-side runtime settings, loaded once at startup from a TOML file.
///
/// Everything here has a default so a bare `rd-dongle` start works on a
/// machine with the PSU on `/dev/ttyUSB0`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Serial device connected to the power supply.
    pub serial_device: String,
    /// Address the network services bind to.
    pub bind_address: IpAddr,
    /// Address advertised to clients (VISA strings, LXI document).
    pub advertised_address: IpAddr,
    pub http_port: u16,
    pub scpi_port: u16,
    pub modbus_tcp_port: u16,
    pub rpc_bind_port: u16,
    /// Inclusive VXI-11 listener port range. A singleton range keeps the
    /// port stable and therefore advertisable.
    pub vxi_port_start: u16,
    pub vxi_port_end: u16,
    /// Path of the persisted configuration region.
    pub config_path: PathBuf,
    /// Where uploaded firmware images are staged.
    pub firmware_staging_path: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            serial_device: "/dev/ttyUSB0".to_string(),
            bind_address: IpAddr::from([0, 0, 0, 0]),
            advertised_address: IpAddr::from([127, 0, 0, 1]),
            http_port: 80,
            scpi_port: 5025,
            modbus_tcp_port: 502,
            rpc_bind_port: 111,
            vxi_port_start: 9010,
            vxi_port_end: 9010,
            config_path: PathBuf::from("dongle.cfg"),
            firmware_staging_path: PathBuf::from("firmware.bin"),
        }
    }
}

impl Settings {
    /// Load from `path`; with no path the defaults apply.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let settings: Settings = match path {
            Some(path) => config::Config::builder()
                .add_source(config::File::from(path))
                .build()?
                .try_deserialize()?,
            None => Settings::default(),
        };
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), SettingsError> {
        if self.vxi_port_start > self.vxi_port_end || self.vxi_port_start == 0 {
            return Err(SettingsError::InvalidVxiRange {
                start: self.vxi_port_start,
                end: self.vxi_port_end,
            });
        }
        Ok(())
    }
}
