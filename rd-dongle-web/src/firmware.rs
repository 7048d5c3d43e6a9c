use std::path::PathBuf;

use tracing::info;

/// First byte of a flashable image.
const IMAGE_MAGIC: u8 = 0xE9;

/// Where uploaded firmware images go. The actual flashing happens outside
/// this process; the surface only validates and stages.
pub trait FirmwareSink: Send + Sync {
    /// Validate `image` and stage it for the updater. The error string is
    /// rendered back to the operator verbatim.
    fn stage(&self, image: &[u8]) -> Result<(), String>;
}

/// Default sink: write the image to a staging file.
#[derive(Debug, Clone)]
pub struct StagingFirmwareSink {
    path: PathBuf,
}

impl StagingFirmwareSink {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl FirmwareSink for StagingFirmwareSink {
    fn stage(&self, image: &[u8]) -> Result<(), String> {
        if image.is_empty() {
            return Err("empty firmware image".to_string());
        }
        if image[0] != IMAGE_MAGIC {
            return Err(format!(
                "not a firmware image (leading byte {:#04x})",
                image[0]
            ));
        }
        std::fs::write(&self.path, image)
            .map_err(|e| format!("failed to stage firmware: {e}"))?;
        info!(path = %self.path.display(), bytes = image.len(), "firmware staged");
        Ok(())
    }
}
