use std::io;
use std::path::{Path, PathBuf};

use bytes::{Buf, BufMut};
use tracing::{info, warn};

/// Size of the persisted region. The record always occupies the full
/// region so future versions can grow without relocating anything.
const REGION_SIZE: usize = 512;

const MAGIC: &[u8; 3] = b"RD\0";
const CURRENT_VERSION: u8 = 2;
const TZ_NAME_LEN: usize = 100;

pub const DEFAULT_UART_BAUDRATE: u32 = 115_200;

/// Persisted dongle configuration.
///
/// Field layout on disk (fixed offsets, little-endian):
///
/// ```text
/// 0   magic            "RD\0"
/// 3   version          u8
/// 4   tz_name          [u8; 100], NUL padded
/// 104 portal_on_boot   u8
/// 105 uart_baudrate    u32      (version >= 2)
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigRecord {
    pub tz_name: String,
    pub portal_on_boot: bool,
    pub uart_baudrate: u32,
}

impl Default for ConfigRecord {
    fn default() -> Self {
        Self {
            tz_name: String::new(),
            portal_on_boot: false,
            uart_baudrate: DEFAULT_UART_BAUDRATE,
        }
    }
}

impl ConfigRecord {
    /// Marshal at the current version into a full region image.
    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(REGION_SIZE);
        buf.put_slice(MAGIC);
        buf.put_u8(CURRENT_VERSION);
        let mut name = [0u8; TZ_NAME_LEN];
        let bytes = self.tz_name.as_bytes();
        let n = bytes.len().min(TZ_NAME_LEN - 1);
        name[..n].copy_from_slice(&bytes[..n]);
        buf.put_slice(&name);
        buf.put_u8(self.portal_on_boot as u8);
        buf.put_u32_le(self.uart_baudrate);
        buf.resize(REGION_SIZE, 0);
        buf
    }

    /// Unmarshal any known version. Returns `None` for bad magic or an
    /// unknown version; the caller resets to defaults and rewrites.
    fn decode(region: &[u8]) -> Option<Self> {
        if region.len() < 4 + TZ_NAME_LEN + 1 || &region[..3] != MAGIC {
            return None;
        }
        let version = region[3];
        let mut rest = &region[4..];
        let tz_raw = &rest[..TZ_NAME_LEN];
        let end = tz_raw.iter().position(|&b| b == 0).unwrap_or(TZ_NAME_LEN);
        let tz_name = String::from_utf8_lossy(&tz_raw[..end]).into_owned();
        rest.advance(TZ_NAME_LEN);
        let portal_on_boot = rest.get_u8() != 0;
        let uart_baudrate = match version {
            1 => DEFAULT_UART_BAUDRATE,
            2 => {
                if rest.remaining() < 4 {
                    return None;
                }
                rest.get_u32_le()
            }
            _ => return None,
        };
        Some(Self {
            tz_name,
            portal_on_boot,
            uart_baudrate,
        })
    }
}

/// File-backed store for the [`ConfigRecord`].
///
/// Reads once at [`ConfigStore::open`]; every mutation is committed
/// synchronously with [`ConfigStore::commit`].
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    record: ConfigRecord,
}

impl ConfigStore {
    /// Open the store, falling back to defaults (and rewriting) when the
    /// region is missing, corrupt or from an unknown version.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let record = match std::fs::read(&path) {
            Ok(region) => match ConfigRecord::decode(&region) {
                Some(record) => record,
                None => {
                    warn!(path = %path.display(), "config region unreadable, resetting to defaults");
                    ConfigRecord::default()
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => ConfigRecord::default(),
            Err(e) => return Err(e),
        };
        let mut store = Self { path, record };
        // Rewriting unconditionally migrates V1 regions to the current
        // version and materializes the file on first boot.
        store.commit()?;
        Ok(store)
    }

    pub fn record(&self) -> &ConfigRecord {
        &self.record
    }

    pub fn timezone_name(&self) -> &str {
        &self.record.tz_name
    }

    pub fn set_timezone_name(&mut self, name: impl Into<String>) {
        self.record.tz_name = name.into();
    }

    pub fn uart_baudrate(&self) -> u32 {
        self.record.uart_baudrate
    }

    pub fn set_uart_baudrate(&mut self, baudrate: u32) {
        self.record.uart_baudrate = baudrate;
    }

    pub fn set_portal_on_boot(&mut self) {
        self.record.portal_on_boot = true;
    }

    /// Read and clear the portal flag. The clear is committed immediately
    /// so a crash during boot does not re-trigger the portal.
    pub fn take_portal_on_boot(&mut self) -> io::Result<bool> {
        if !self.record.portal_on_boot {
            return Ok(false);
        }
        self.record.portal_on_boot = false;
        self.commit()?;
        Ok(true)
    }

    /// Write the record back at the current version.
    pub fn commit(&mut self) -> io::Result<()> {
        std::fs::write(&self.path, self.record.encode())?;
        info!(path = %self.path.display(), "saved configuration");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_v1(tz_name: &str, portal_on_boot: bool) -> Vec<u8> {
        let mut buf = Vec::with_capacity(REGION_SIZE);
        buf.put_slice(MAGIC);
        buf.put_u8(1);
        let mut name = [0u8; TZ_NAME_LEN];
        name[..tz_name.len()].copy_from_slice(tz_name.as_bytes());
        buf.put_slice(&name);
        buf.put_u8(portal_on_boot as u8);
        buf.resize(REGION_SIZE, 0);
        buf
    }

    #[test]
    fn roundtrip_current_version() {
        let record = ConfigRecord {
            tz_name: "Europe/Copenhagen".to_string(),
            portal_on_boot: true,
            uart_baudrate: 9600,
        };
        let region = record.encode();
        assert_eq!(region.len(), REGION_SIZE);
        assert_eq!(ConfigRecord::decode(&region), Some(record));
    }

    #[test]
    fn v1_reads_with_default_baudrate() {
        let region = encode_v1("America/New_York", false);
        let record = ConfigRecord::decode(&region).unwrap();
        assert_eq!(record.tz_name, "America/New_York");
        assert!(!record.portal_on_boot);
        assert_eq!(record.uart_baudrate, DEFAULT_UART_BAUDRATE);
    }

    #[test]
    fn v1_region_migrates_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dongle.cfg");
        std::fs::write(&path, encode_v1("Europe/Berlin", true)).unwrap();

        let store = ConfigStore::open(&path).unwrap();
        assert_eq!(store.timezone_name(), "Europe/Berlin");
        assert!(store.record().portal_on_boot);
        assert_eq!(store.uart_baudrate(), DEFAULT_UART_BAUDRATE);

        // open() rewrites at the latest version
        let region = std::fs::read(&path).unwrap();
        assert_eq!(region[3], CURRENT_VERSION);
        let migrated = ConfigRecord::decode(&region).unwrap();
        assert_eq!(migrated.tz_name, "Europe/Berlin");
        assert_eq!(migrated.uart_baudrate, DEFAULT_UART_BAUDRATE);
    }

    #[test]
    fn bad_magic_resets_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dongle.cfg");
        std::fs::write(&path, vec![0xffu8; REGION_SIZE]).unwrap();

        let store = ConfigStore::open(&path).unwrap();
        assert_eq!(store.record(), &ConfigRecord::default());
        // and the region now holds a valid record
        let region = std::fs::read(&path).unwrap();
        assert!(ConfigRecord::decode(&region).is_some());
    }

    #[test]
    fn portal_flag_clears_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dongle.cfg");
        let mut store = ConfigStore::open(&path).unwrap();
        store.set_portal_on_boot();
        store.commit().unwrap();

        let mut reopened = ConfigStore::open(&path).unwrap();
        assert!(reopened.take_portal_on_boot().unwrap());
        assert!(!reopened.take_portal_on_boot().unwrap());

        let third = ConfigStore::open(&path).unwrap();
        assert!(!third.record().portal_on_boot);
    }
}
