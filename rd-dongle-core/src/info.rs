use rd_dongle_modbus::DeviceProfile;

/// Identity of the dongle itself, shown on the status page and in the LXI
/// document.
#[derive(Debug, Clone)]
pub struct DongleInfo {
    pub version: &'static str,
    pub hostname: String,
}

impl DongleInfo {
    /// Hostname derives from the identified PSU, `<model>-<serial:08>`,
    /// so a lab with several dongles gets distinct names for free.
    pub fn for_profile(profile: Option<&DeviceProfile>) -> Self {
        let hostname = match profile {
            Some(profile) => format!("{}-{:08}", profile.model, profile.serial_number),
            None => "rd-dongle".to_string(),
        };
        Self {
            version: env!("CARGO_PKG_VERSION"),
            hostname,
        }
    }
}
