//! XDR marshalling for the subset of ONC-RPC this device speaks.
//!
//! Calls carry AUTH_NULL credentials, which makes the call header a fixed
//! 40 bytes: xid, message type, RPC version, program, program version,
//! procedure, then four zero words of credential/verifier. Replies are a
//! fixed 24-byte header followed by a procedure-specific body. TCP adds a
//! record mark: a length prefix with the final-fragment bit set.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::rpc;

/// Fixed size of an AUTH_NULL call header.
pub const RPC_CALL_HEADER_LEN: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpcCall {
    pub xid: u32,
    pub msg_type: u32,
    pub rpc_version: u32,
    pub program: u32,
    pub program_version: u32,
    pub procedure: u32,
}

/// Split a datagram or record into the call header and its payload.
/// `None` when the buffer is too short to hold a call.
pub fn decode_call(buf: &[u8]) -> Option<(RpcCall, &[u8])> {
    if buf.len() < RPC_CALL_HEADER_LEN {
        return None;
    }
    let mut header = &buf[..RPC_CALL_HEADER_LEN];
    let call = RpcCall {
        xid: header.get_u32(),
        msg_type: header.get_u32(),
        rpc_version: header.get_u32(),
        program: header.get_u32(),
        program_version: header.get_u32(),
        procedure: header.get_u32(),
    };
    Some((call, &buf[RPC_CALL_HEADER_LEN..]))
}

/// The 24-byte accepted-reply header. Body words are appended by the
/// caller.
pub fn reply_header(xid: u32, rpc_status: u32) -> BytesMut {
    let mut reply = BytesMut::with_capacity(64);
    reply.put_u32(xid);
    reply.put_u32(rpc::MSG_REPLY);
    reply.put_u32(rpc::MSG_ACCEPTED);
    reply.put_u32(0); // verifier flavor
    reply.put_u32(0); // verifier length
    reply.put_u32(rpc_status);
    reply
}

/// Append opaque data with XDR four-byte padding.
pub fn put_opaque(reply: &mut BytesMut, data: &[u8]) {
    reply.put_u32(data.len() as u32);
    reply.put_slice(data);
    let pad = (4 - data.len() % 4) % 4;
    reply.put_bytes(0, pad);
}

/// Read one TCP record (single fragment, which is all the instrument
/// protocols here ever send). `None` on a clean EOF.
pub async fn read_record<S>(stream: &mut S, max_len: usize) -> std::io::Result<Option<Bytes>>
where
    S: AsyncRead + Unpin,
{
    let mut mark = [0u8; 4];
    match stream.read_exact(&mut mark).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = (u32::from_be_bytes(mark) & !rpc::FRAG_LAST) as usize;
    if len == 0 || len > max_len {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("unreasonable record length {len}"),
        ));
    }
    let mut record = vec![0u8; len];
    stream.read_exact(&mut record).await?;
    Ok(Some(Bytes::from(record)))
}

/// Send a reply with the TCP record mark prepended.
pub async fn write_record<S>(stream: &mut S, reply: &[u8]) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let mark = rpc::FRAG_LAST | reply.len() as u32;
    stream.write_all(&mark.to_be_bytes()).await?;
    stream.write_all(reply).await?;
    stream.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call_bytes(xid: u32, program: u32, procedure: u32) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u32(xid);
        buf.put_u32(rpc::MSG_CALL);
        buf.put_u32(2);
        buf.put_u32(program);
        buf.put_u32(1);
        buf.put_u32(procedure);
        buf.put_bytes(0, 16);
        buf.to_vec()
    }

    #[test]
    fn decodes_a_call_header() {
        let mut raw = call_bytes(0xDEADBEEF, rpc::PORTMAP, rpc::proc::GET_PORT);
        raw.extend_from_slice(&[0, 6, 7, 0xAF]); // payload
        let (call, payload) = decode_call(&raw).unwrap();
        assert_eq!(call.xid, 0xDEADBEEF);
        assert_eq!(call.msg_type, rpc::MSG_CALL);
        assert_eq!(call.program, rpc::PORTMAP);
        assert_eq!(call.procedure, rpc::proc::GET_PORT);
        assert_eq!(payload, &[0, 6, 7, 0xAF]);
    }

    #[test]
    fn short_buffers_are_rejected() {
        assert!(decode_call(&[0u8; 39]).is_none());
    }

    #[test]
    fn reply_header_layout() {
        let reply = reply_header(0x1234, rpc::status::SUCCESS);
        assert_eq!(reply.len(), 24);
        assert_eq!(&reply[..4], &[0x00, 0x00, 0x12, 0x34]);
        assert_eq!(&reply[4..8], &[0, 0, 0, 1]); // REPLY
        assert_eq!(&reply[8..12], &[0, 0, 0, 0]); // MSG_ACCEPTED
        assert_eq!(&reply[20..24], &[0, 0, 0, 0]); // SUCCESS
    }

    #[test]
    fn opaque_data_is_padded_to_words() {
        let mut reply = BytesMut::new();
        put_opaque(&mut reply, b"CV\n");
        assert_eq!(reply.len(), 4 + 4);
        assert_eq!(&reply[..4], &[0, 0, 0, 3]);
        assert_eq!(&reply[4..], &[b'C', b'V', b'\n', 0]);
    }

    #[tokio::test]
    async fn records_roundtrip() {
        let (mut a, mut b) = tokio::io::duplex(256);
        write_record(&mut a, b"hello").await.unwrap();
        let record = read_record(&mut b, 64).await.unwrap().unwrap();
        assert_eq!(&record[..], b"hello");
        drop(a);
        assert!(read_record(&mut b, 64).await.unwrap().is_none());
    }
}
