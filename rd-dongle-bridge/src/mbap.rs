//! MBAP (Modbus TCP Application Protocol) framing.
//!
//! Header: transaction id, protocol id (always 0), length of the unit id
//! plus PDU, unit id. The PDU itself stays opaque to the bridge.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

const MBAP_HEADER_LEN: usize = 7;
/// Ceiling on the length field; a standard ADU never exceeds 254 bytes.
const MAX_FRAME_LEN: usize = 260;

#[derive(Debug, Error)]
pub enum MbapError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unsupported MBAP protocol id {0}")]
    BadProtocolId(u16),
    #[error("unreasonable MBAP length {0}")]
    BadLength(u16),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MbapFrame {
    pub transaction_id: u16,
    pub unit_id: u8,
    pub pdu: Bytes,
}

#[derive(Debug, Default)]
pub struct MbapCodec;

impl Decoder for MbapCodec {
    type Item = MbapFrame;
    type Error = MbapError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if buf.len() < MBAP_HEADER_LEN {
            return Ok(None);
        }
        let protocol_id = u16::from_be_bytes([buf[2], buf[3]]);
        if protocol_id != 0 {
            return Err(MbapError::BadProtocolId(protocol_id));
        }
        let length = u16::from_be_bytes([buf[4], buf[5]]);
        if length == 0 || length as usize > MAX_FRAME_LEN {
            return Err(MbapError::BadLength(length));
        }
        let total = MBAP_HEADER_LEN - 1 + length as usize;
        if buf.len() < total {
            return Ok(None);
        }
        let mut frame = buf.split_to(total);
        let transaction_id = u16::from_be_bytes([frame[0], frame[1]]);
        let unit_id = frame[6];
        frame.advance(MBAP_HEADER_LEN);
        Ok(Some(MbapFrame {
            transaction_id,
            unit_id,
            pdu: frame.freeze(),
        }))
    }
}

impl Encoder<MbapFrame> for MbapCodec {
    type Error = MbapError;

    fn encode(&mut self, frame: MbapFrame, buf: &mut BytesMut) -> Result<(), Self::Error> {
        buf.reserve(MBAP_HEADER_LEN + frame.pdu.len());
        buf.put_u16(frame.transaction_id);
        buf.put_u16(0);
        buf.put_u16(frame.pdu.len() as u16 + 1);
        buf.put_u8(frame.unit_id);
        buf.put_slice(&frame.pdu);
        Ok(())
    }
}
