//! Modbus RTU framing.
//!
//! An ADU is `slave + PDU + CRC-16` with the CRC transmitted low byte
//! first. RTU has no length prefix, so the decoder derives the frame
//! length from the function code; on a CRC mismatch or an unrecognized
//! function it slides one byte forward and rescans, which resynchronizes
//! after line noise instead of poisoning the stream.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ModbusError;

/// Modbus CRC-16 (polynomial 0xA001, init 0xFFFF).
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// One RTU ADU with the CRC stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtuFrame {
    pub slave: u8,
    pub pdu: Bytes,
}

/// Which side of the exchange the decoder is parsing. Request and reply
/// frames of the same function code have different lengths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Request,
    Response,
}

#[derive(Debug)]
pub struct RtuCodec {
    direction: Direction,
}

impl RtuCodec {
    /// Decoder for the master side: frames coming back from the slave.
    pub fn responses() -> Self {
        Self {
            direction: Direction::Response,
        }
    }

    /// Decoder for the slave side: frames sent by a master. Used by the
    /// PSU simulator.
    pub fn requests() -> Self {
        Self {
            direction: Direction::Request,
        }
    }

    /// Expected ADU length, or `None` until enough bytes are buffered to
    /// tell. `Err(())` flags an unrecognized function code.
    fn frame_len(&self, buf: &[u8]) -> Result<Option<usize>, ()> {
        debug_assert!(buf.len() >= 2);
        let function = buf[1];
        if function & 0x80 != 0 {
            // Exception replies only travel slave -> master.
            return match self.direction {
                Direction::Response => Ok(Some(5)),
                Direction::Request => Err(()),
            };
        }
        let len = match (self.direction, function) {
            (Direction::Response, 0x01..=0x04) => match buf.get(2) {
                Some(&count) => 5 + count as usize,
                None => return Ok(None),
            },
            (Direction::Response, 0x05 | 0x06 | 0x0f | 0x10) => 8,
            (Direction::Request, 0x01..=0x06) => 8,
            (Direction::Request, 0x0f | 0x10) => match buf.get(6) {
                Some(&count) => 9 + count as usize,
                None => return Ok(None),
            },
            _ => return Err(()),
        };
        Ok(Some(len))
    }
}

impl Encoder<RtuFrame> for RtuCodec {
    type Error = ModbusError;

    fn encode(&mut self, frame: RtuFrame, buf: &mut BytesMut) -> Result<(), Self::Error> {
        buf.reserve(1 + frame.pdu.len() + 2);
        let start = buf.len();
        buf.put_u8(frame.slave);
        buf.put_slice(&frame.pdu);
        let crc = crc16(&buf[start..]);
        buf.put_u16_le(crc);
        Ok(())
    }
}

impl Decoder for RtuCodec {
    type Item = RtuFrame;
    type Error = ModbusError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        while buf.len() >= 4 {
            let len = match self.frame_len(buf) {
                Ok(Some(len)) => len,
                Ok(None) => return Ok(None),
                Err(()) => {
                    buf.advance(1);
                    continue;
                }
            };
            if buf.len() < len {
                return Ok(None);
            }
            let crc_rx = u16::from_le_bytes([buf[len - 2], buf[len - 1]]);
            if crc16(&buf[..len - 2]) != crc_rx {
                buf.advance(1);
                continue;
            }
            let mut adu = buf.split_to(len);
            let slave = adu[0];
            adu.advance(1);
            adu.truncate(len - 3);
            return Ok(Some(RtuFrame {
                slave,
                pdu: adu.freeze(),
            }));
        }
        Ok(None)
    }
}
