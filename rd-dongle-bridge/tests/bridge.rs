use std::net::SocketAddr;

use rd_dongle_bridge::ModbusBridge;
use rd_dongle_core::ClientRoster;
use rd_dongle_modbus::sim::SimPsu;
use rd_dongle_modbus::{crc16, ModbusMaster, Register};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

async fn start_bridge(sim: SimPsu) -> (ModbusBridge, CancellationToken) {
    let (io, _handle) = sim.spawn();
    let master = ModbusMaster::spawn(io, 115_200);
    master.begin().await.unwrap();
    let cancel = CancellationToken::new();
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let bridge = ModbusBridge::start(addr, master, cancel.clone())
        .await
        .unwrap();
    (bridge, cancel)
}

fn mbap(transaction_id: u16, unit_id: u8, pdu: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(7 + pdu.len());
    out.extend_from_slice(&transaction_id.to_be_bytes());
    out.extend_from_slice(&[0, 0]);
    out.extend_from_slice(&(pdu.len() as u16 + 1).to_be_bytes());
    out.push(unit_id);
    out.extend_from_slice(pdu);
    out
}

async fn read_response(stream: &mut TcpStream) -> (u16, u8, Vec<u8>) {
    let mut header = [0u8; 7];
    stream.read_exact(&mut header).await.unwrap();
    let transaction_id = u16::from_be_bytes([header[0], header[1]]);
    let length = u16::from_be_bytes([header[4], header[5]]) as usize;
    let mut pdu = vec![0u8; length - 1];
    stream.read_exact(&mut pdu).await.unwrap();
    (transaction_id, header[6], pdu)
}

#[tokio::test]
async fn passthrough_preserves_transaction_id() {
    let sim = SimPsu::rd6012()
        .with_register(Register::VoltageSet, 0x0960)
        .with_register(Register::CurrentSet, 0x01F4);
    let (bridge, _cancel) = start_bridge(sim).await;

    let mut stream = TcpStream::connect(bridge.local_addr()).await.unwrap();
    stream
        .write_all(&mbap(0x4242, 1, &[0x03, 0x00, 0x08, 0x00, 0x02]))
        .await
        .unwrap();

    let (tid, unit, pdu) = read_response(&mut stream).await;
    assert_eq!(tid, 0x4242);
    assert_eq!(unit, 1);
    assert_eq!(pdu, vec![0x03, 0x04, 0x09, 0x60, 0x01, 0xF4]);
}

#[tokio::test]
async fn consecutive_requests_keep_their_ids() {
    let (bridge, _cancel) = start_bridge(SimPsu::rd6012()).await;
    let mut stream = TcpStream::connect(bridge.local_addr()).await.unwrap();

    for tid in [7u16, 9, 11] {
        stream
            .write_all(&mbap(tid, 1, &[0x03, 0x00, 0x00, 0x00, 0x01]))
            .await
            .unwrap();
        let (got, _, pdu) = read_response(&mut stream).await;
        assert_eq!(got, tid);
        assert_eq!(pdu[0], 0x03);
    }
}

#[tokio::test]
async fn silent_unit_yields_synthesized_exception() {
    // the simulator only answers unit 1; unit 9 times out on the serial side
    let (bridge, _cancel) = start_bridge(SimPsu::rd6012()).await;
    let mut stream = TcpStream::connect(bridge.local_addr()).await.unwrap();

    stream
        .write_all(&mbap(0xDEAD, 9, &[0x03, 0x00, 0x00, 0x00, 0x01]))
        .await
        .unwrap();
    let (tid, unit, pdu) = read_response(&mut stream).await;
    assert_eq!(tid, 0xDEAD);
    assert_eq!(unit, 9);
    assert_eq!(pdu, vec![0x83, 0x0B]);
}

#[tokio::test]
async fn roster_tracks_and_disconnects_clients() {
    let (bridge, _cancel) = start_bridge(SimPsu::rd6012()).await;

    let mut stream = TcpStream::connect(bridge.local_addr()).await.unwrap();
    // prove the connection is established end to end
    stream
        .write_all(&mbap(1, 1, &[0x03, 0x00, 0x00, 0x00, 0x01]))
        .await
        .unwrap();
    let _ = read_response(&mut stream).await;

    let clients = bridge.connected_clients().await;
    assert_eq!(clients.len(), 1);

    bridge.disconnect(clients[0]).await;
    let mut buf = [0u8; 8];
    // connection closes without further data
    assert_eq!(stream.read(&mut buf).await.unwrap(), 0);
}

#[tokio::test]
async fn crc_stays_on_the_serial_side() {
    // sanity: the TCP payload is CRC-free even though the RTU side isn't
    let frame = [0x01u8, 0x03, 0x00, 0x00, 0x00, 0x01];
    assert_eq!(crc16(&frame), 0x0A84);
    let (bridge, _cancel) = start_bridge(SimPsu::rd6012()).await;
    let mut stream = TcpStream::connect(bridge.local_addr()).await.unwrap();
    stream
        .write_all(&mbap(2, 1, &frame[1..]))
        .await
        .unwrap();
    let (_, _, pdu) = read_response(&mut stream).await;
    assert_eq!(pdu.len(), 2 + 2);
}
