//! In-memory PSU used by tests across the workspace.
//!
//! Speaks Modbus RTU over a [`tokio::io::duplex`] pair: holding-register
//! reads and writes against a plain register file, everything else
//! answered with an illegal-function exception. Requests addressed to a
//! different slave id are ignored, which is exactly what a real bus does.

use std::sync::{Arc, Mutex};

use bytes::{BufMut, Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use tokio::io::DuplexStream;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

use crate::frame::{RtuCodec, RtuFrame};
use crate::master::SLAVE_ADDRESS;
use crate::registers::Register;

/// Register file size. Covers the documented map plus the system cell at
/// offset 256.
const SIM_REGISTER_SPACE: usize = 512;

const ILLEGAL_FUNCTION: u8 = 0x01;
const ILLEGAL_DATA_ADDRESS: u8 = 0x02;

pub struct SimPsu {
    slave: u8,
    silent: bool,
    registers: Vec<u16>,
}

impl SimPsu {
    /// A PSU reporting `id`, serial number 12345 and firmware 1.32.
    pub fn new(id: u16) -> Self {
        let mut registers = vec![0u16; SIM_REGISTER_SPACE];
        registers[Register::Id.offset() as usize] = id;
        registers[Register::SerialNumberLow.offset() as usize] = 12345;
        registers[Register::Firmware.offset() as usize] = 132;
        Self {
            slave: SLAVE_ADDRESS,
            silent: false,
            registers,
        }
    }

    /// An RD6012, the workhorse default for tests.
    pub fn rd6012() -> Self {
        Self::new(60121)
    }

    pub fn with_serial_number(mut self, serial: u32) -> Self {
        self.registers[Register::SerialNumberHigh.offset() as usize] = (serial >> 16) as u16;
        self.registers[Register::SerialNumberLow.offset() as usize] = serial as u16;
        self
    }

    pub fn with_firmware(mut self, version: u16) -> Self {
        self.registers[Register::Firmware.offset() as usize] = version;
        self
    }

    pub fn with_register(mut self, reg: impl Into<u16>, value: u16) -> Self {
        self.registers[reg.into() as usize] = value;
        self
    }

    /// Never answer. Drives the timeout paths.
    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    /// Start the simulator. Returns the master-side stream and a handle
    /// with a shared view of the register file.
    pub fn spawn(self) -> (DuplexStream, SimPsuHandle) {
        let (master_io, sim_io) = tokio::io::duplex(1024);
        let registers = Arc::new(Mutex::new(self.registers));
        let task_registers = Arc::clone(&registers);
        let slave = self.slave;
        let silent = self.silent;
        let task = tokio::spawn(async move {
            let mut framed = Framed::new(sim_io, RtuCodec::requests());
            while let Some(frame) = framed.next().await {
                let Ok(frame) = frame else { continue };
                if frame.slave != slave || silent {
                    continue;
                }
                let response = respond(&task_registers, &frame.pdu);
                let reply = RtuFrame {
                    slave,
                    pdu: response,
                };
                if framed.send(reply).await.is_err() {
                    break;
                }
            }
        });
        (master_io, SimPsuHandle { registers, task })
    }
}

pub struct SimPsuHandle {
    /// Shared register file, for seeding and asserting on writes.
    pub registers: Arc<Mutex<Vec<u16>>>,
    pub task: JoinHandle<()>,
}

impl SimPsuHandle {
    pub fn register(&self, reg: impl Into<u16>) -> u16 {
        self.registers.lock().unwrap()[reg.into() as usize]
    }

    pub fn set_register(&self, reg: impl Into<u16>, value: u16) {
        self.registers.lock().unwrap()[reg.into() as usize] = value;
    }
}

fn respond(registers: &Mutex<Vec<u16>>, pdu: &[u8]) -> Bytes {
    let function = pdu[0];
    let mut regs = registers.lock().unwrap();
    match function {
        0x03 if pdu.len() >= 5 => {
            let offset = u16::from_be_bytes([pdu[1], pdu[2]]) as usize;
            let count = u16::from_be_bytes([pdu[3], pdu[4]]) as usize;
            if count == 0 || offset + count > regs.len() {
                return exception(function, ILLEGAL_DATA_ADDRESS);
            }
            let mut out = BytesMut::with_capacity(2 + 2 * count);
            out.put_u8(function);
            out.put_u8((2 * count) as u8);
            for value in &regs[offset..offset + count] {
                out.put_u16(*value);
            }
            out.freeze()
        }
        0x06 if pdu.len() >= 5 => {
            let offset = u16::from_be_bytes([pdu[1], pdu[2]]) as usize;
            if offset >= regs.len() {
                return exception(function, ILLEGAL_DATA_ADDRESS);
            }
            regs[offset] = u16::from_be_bytes([pdu[3], pdu[4]]);
            Bytes::copy_from_slice(pdu)
        }
        0x10 if pdu.len() >= 6 => {
            let offset = u16::from_be_bytes([pdu[1], pdu[2]]) as usize;
            let count = u16::from_be_bytes([pdu[3], pdu[4]]) as usize;
            if count == 0 || offset + count > regs.len() || pdu.len() < 6 + 2 * count {
                return exception(function, ILLEGAL_DATA_ADDRESS);
            }
            for i in 0..count {
                regs[offset + i] = u16::from_be_bytes([pdu[6 + 2 * i], pdu[7 + 2 * i]]);
            }
            Bytes::copy_from_slice(&pdu[..5])
        }
        _ => exception(function, ILLEGAL_FUNCTION),
    }
}

fn exception(function: u8, code: u8) -> Bytes {
    Bytes::copy_from_slice(&[function | 0x80, code])
}
