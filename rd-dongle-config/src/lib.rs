//! Configuration for the RD dongle.
//!
//! Two distinct layers live here:
//!
//! - [`record`]: the small versioned blob the dongle persists across
//!   reboots (timezone, portal-on-boot flag, UART baud rate). Stored in a
//!   fixed 512-byte region with hand-marshalled fields so old records stay
//!   readable forever.
//! - [`settings`]: host-side runtime settings (serial device, listen
//!   addresses, VXI port range) loaded from a TOML file at startup.

mod record;
mod settings;
mod timezones;

pub use record::{ConfigRecord, ConfigStore, DEFAULT_UART_BAUDRATE};
pub use settings::{Settings, SettingsError};
pub use timezones::{timezone_names, Timezone, TIMEZONES};
