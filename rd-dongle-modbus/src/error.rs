use thiserror::Error;

pub type Result<T> = std::result::Result<T, ModbusError>;

#[derive(Debug, Error)]
pub enum ModbusError {
    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no reply from power supply within the transaction deadline")]
    Timeout,
    #[error("serial master task is gone")]
    ChannelClosed,
    #[error("power supply not identified")]
    NotConnected,
    #[error("unrecognized power supply id {0}")]
    UnknownModel(u16),
    #[error("modbus exception {0:#04x}")]
    Exception(u8),
    #[error("malformed reply from power supply")]
    UnexpectedReply,
    #[error("preset slot {0} out of range")]
    InvalidPreset(u8),
}
