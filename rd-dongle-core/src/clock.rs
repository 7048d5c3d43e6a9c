use std::str::FromStr;

use chrono::Utc;
use chrono_tz::Tz;
use thiserror::Error;
use tracing::info;

use rd_dongle_modbus::{Clock, ModbusError, ModbusMaster};

#[derive(Debug, Error)]
pub enum ClockSyncError {
    #[error("unknown timezone {0:?}")]
    UnknownTimezone(String),
    #[error(transparent)]
    Modbus(#[from] ModbusError),
}

/// Write the host's current local time into the PSU front-panel clock.
///
/// Runs once at startup when the master is connected and a timezone has
/// been configured. An empty timezone name disables the sync and returns
/// `Ok(false)`.
pub async fn sync_psu_clock(
    master: &ModbusMaster,
    tz_name: &str,
) -> Result<bool, ClockSyncError> {
    if tz_name.is_empty() {
        return Ok(false);
    }
    let tz = Tz::from_str(tz_name)
        .map_err(|_| ClockSyncError::UnknownTimezone(tz_name.to_string()))?;
    let local = Utc::now().with_timezone(&tz).naive_local();
    master.set_clock(Clock::from_naive(local)).await?;
    info!(timezone = tz_name, "PSU clock set from host time");
    Ok(true)
}
