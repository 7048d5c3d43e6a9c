use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use rd_dongle_core::{ClientRoster, EngineGate, LogAdvertiser};
use rd_dongle_modbus::sim::SimPsu;
use rd_dongle_modbus::ModbusMaster;
use rd_dongle_scpi::{Identity, ScpiEngine, SharedEngine};
use rd_dongle_vxi11::{rpc, PortmapServer, VxiServer};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio_util::sync::CancellationToken;

const LOCALHOST: IpAddr = IpAddr::V4(std::net::Ipv4Addr::LOCALHOST);

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

async fn shared_engine() -> (SharedEngine, EngineGate) {
    let (io, _handle) = SimPsu::rd6012().spawn();
    let master = ModbusMaster::spawn(io, 115_200);
    let profile = master.begin().await.unwrap();
    let gate = EngineGate::new();
    let engine =
        ScpiEngine::new(master, gate.clone(), Identity::from_profile(&profile)).into_shared();
    (engine, gate)
}

async fn start_vxi(port_start: u16, port_end: u16) -> (VxiServer, EngineGate, CancellationToken) {
    let (engine, gate) = shared_engine().await;
    let cancel = CancellationToken::new();
    let server = VxiServer::start(
        LOCALHOST,
        port_start,
        port_end,
        engine,
        gate.clone(),
        Arc::new(LogAdvertiser),
        cancel.clone(),
    )
    .await;
    // wait for the first bind
    for _ in 0..50 {
        if server.current_port() != 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    (server, gate, cancel)
}

fn call(xid: u32, program: u32, procedure: u32, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(40 + payload.len());
    for word in [xid, rpc::MSG_CALL, 2, program, 1, procedure] {
        buf.extend_from_slice(&word.to_be_bytes());
    }
    buf.extend_from_slice(&[0u8; 16]);
    buf.extend_from_slice(payload);
    buf
}

async fn send_call(
    stream: &mut TcpStream,
    xid: u32,
    procedure: u32,
    payload: &[u8],
) -> Vec<u8> {
    let body = call(xid, rpc::VXI_11_CORE, procedure, payload);
    let mark = 0x8000_0000u32 | body.len() as u32;
    stream.write_all(&mark.to_be_bytes()).await.unwrap();
    stream.write_all(&body).await.unwrap();

    let mut mark = [0u8; 4];
    stream.read_exact(&mut mark).await.unwrap();
    let len = (u32::from_be_bytes(mark) & 0x7fff_ffff) as usize;
    let mut reply = vec![0u8; len];
    stream.read_exact(&mut reply).await.unwrap();
    reply
}

fn word(reply: &[u8], index: usize) -> u32 {
    u32::from_be_bytes(reply[index * 4..index * 4 + 4].try_into().unwrap())
}

fn create_link_payload(device: &str) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&[0u8; 12]); // client id, lock, lock timeout
    payload.extend_from_slice(&(device.len() as u32).to_be_bytes());
    payload.extend_from_slice(device.as_bytes());
    while payload.len() % 4 != 0 {
        payload.push(0);
    }
    payload
}

fn dev_write_payload(data: &str) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&[0u8; 16]); // link id, timeouts, flags
    payload.extend_from_slice(&(data.len() as u32).to_be_bytes());
    payload.extend_from_slice(data.as_bytes());
    while payload.len() % 4 != 0 {
        payload.push(0);
    }
    payload
}

fn dev_read_payload() -> Vec<u8> {
    vec![0u8; 24] // link id, request size, timeouts, flags, term char
}

#[tokio::test]
async fn create_write_read_destroy() {
    let port = free_port();
    let (server, _gate, _cancel) = start_vxi(port, port).await;
    let addr = SocketAddr::new(LOCALHOST, server.current_port());
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let reply = send_call(&mut stream, 1, rpc::proc::CREATE_LINK, &create_link_payload("inst0")).await;
    assert_eq!(word(&reply, 0), 1); // xid echoed
    assert_eq!(word(&reply, 5), rpc::status::SUCCESS);
    assert_eq!(word(&reply, 6), rpc::error::NO_ERROR);
    assert_eq!(word(&reply, 9), 252); // max receive size

    let reply = send_call(
        &mut stream,
        2,
        rpc::proc::DEV_WRITE,
        &dev_write_payload("*IDN?\n"),
    )
    .await;
    assert_eq!(word(&reply, 6), rpc::error::NO_ERROR);
    assert_eq!(word(&reply, 7), 6); // original length echoed

    let reply = send_call(&mut stream, 3, rpc::proc::DEV_READ, &dev_read_payload()).await;
    assert_eq!(word(&reply, 6), rpc::error::NO_ERROR);
    assert_eq!(word(&reply, 7), rpc::REASON_END);
    let data_len = word(&reply, 8) as usize;
    let data = &reply[36..36 + data_len];
    assert_eq!(data, b"Riden,RD6012,00012345,1.32\n");

    let reply = send_call(&mut stream, 4, rpc::proc::DESTROY_LINK, &[0u8; 4]).await;
    assert_eq!(word(&reply, 6), rpc::error::NO_ERROR);
    // server closes the connection after DESTROY_LINK
    let mut buf = [0u8; 4];
    assert_eq!(stream.read(&mut buf).await.unwrap(), 0);
}

#[tokio::test]
async fn second_create_link_is_out_of_resources() {
    let port = free_port();
    let (server, _gate, _cancel) = start_vxi(port, port).await;
    let addr = SocketAddr::new(LOCALHOST, server.current_port());
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let reply = send_call(&mut stream, 1, rpc::proc::CREATE_LINK, &create_link_payload("inst0")).await;
    assert_eq!(word(&reply, 6), rpc::error::NO_ERROR);

    let reply = send_call(&mut stream, 2, rpc::proc::CREATE_LINK, &create_link_payload("inst0")).await;
    assert_eq!(word(&reply, 5), rpc::status::SUCCESS);
    assert_eq!(word(&reply, 6), rpc::error::OUT_OF_RESOURCES);
    assert_eq!(word(&reply, 9), 0);
}

#[tokio::test]
async fn unknown_program_and_procedure_replies() {
    let port = free_port();
    let (server, _gate, _cancel) = start_vxi(port, port).await;
    let addr = SocketAddr::new(LOCALHOST, server.current_port());
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let body = call(7, 0x12345, rpc::proc::CREATE_LINK, &create_link_payload("inst0"));
    let mark = 0x8000_0000u32 | body.len() as u32;
    stream.write_all(&mark.to_be_bytes()).await.unwrap();
    stream.write_all(&body).await.unwrap();
    let mut mark = [0u8; 4];
    stream.read_exact(&mut mark).await.unwrap();
    let len = (u32::from_be_bytes(mark) & 0x7fff_ffff) as usize;
    let mut reply = vec![0u8; len];
    stream.read_exact(&mut reply).await.unwrap();
    assert_eq!(word(&reply, 0), 7);
    assert_eq!(word(&reply, 5), rpc::status::PROG_UNAVAIL);

    let reply = send_call(&mut stream, 8, 99, &[]).await;
    assert_eq!(word(&reply, 5), rpc::status::PROC_UNAVAIL);
}

#[tokio::test]
async fn implicit_destroy_frees_the_gate() {
    let port = free_port();
    let (server, gate, _cancel) = start_vxi(port, port).await;
    let addr = SocketAddr::new(LOCALHOST, server.current_port());

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let _ = send_call(&mut stream, 1, rpc::proc::CREATE_LINK, &create_link_payload("inst0")).await;
    assert!(gate.is_external_owned());
    assert_eq!(server.connected_clients().await.len(), 1);

    drop(stream);
    for _ in 0..50 {
        if !gate.is_external_owned() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!gate.is_external_owned());
    assert!(server.connected_clients().await.is_empty());
}

#[tokio::test]
async fn forced_disconnect_releases_the_link() {
    let port = free_port();
    let (server, gate, _cancel) = start_vxi(port, port).await;
    let addr = SocketAddr::new(LOCALHOST, server.current_port());

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let _ = send_call(&mut stream, 1, rpc::proc::CREATE_LINK, &create_link_payload("inst0")).await;
    assert!(gate.is_external_owned());

    let clients = server.connected_clients().await;
    server.disconnect(clients[0]).await;

    let mut buf = [0u8; 4];
    assert_eq!(stream.read(&mut buf).await.unwrap(), 0);
    for _ in 0..50 {
        if !gate.is_external_owned() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!gate.is_external_owned());
}

#[tokio::test]
async fn port_rotates_after_each_link() {
    let base = free_port();
    let (server, _gate, _cancel) = start_vxi(base, base + 1).await;
    let first = server.current_port();
    assert_eq!(first, base);

    let mut stream = TcpStream::connect(SocketAddr::new(LOCALHOST, first))
        .await
        .unwrap();
    let _ = send_call(&mut stream, 1, rpc::proc::CREATE_LINK, &create_link_payload("inst0")).await;
    // while the link lives, no port is on offer
    assert_eq!(server.current_port(), 0);
    let _ = send_call(&mut stream, 2, rpc::proc::DESTROY_LINK, &[0u8; 4]).await;
    drop(stream);

    for _ in 0..50 {
        if server.current_port() == base + 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(server.current_port(), base + 1);

    // and wraps back to the start of the range after the next link
    let mut stream = TcpStream::connect(SocketAddr::new(LOCALHOST, base + 1))
        .await
        .unwrap();
    let _ = send_call(&mut stream, 3, rpc::proc::CREATE_LINK, &create_link_payload("inst0")).await;
    let _ = send_call(&mut stream, 4, rpc::proc::DESTROY_LINK, &[0u8; 4]).await;
    drop(stream);
    for _ in 0..50 {
        if server.current_port() == base {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(server.current_port(), base);
}

#[tokio::test]
async fn getport_reports_the_vxi_port_over_udp() {
    let port = free_port();
    let (server, _gate, cancel) = start_vxi(port, port).await;
    let portmap = PortmapServer::start(LOCALHOST, 0, server.port_handle(), cancel.clone())
        .await
        .unwrap();

    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let request = call(0xDEADBEEF, rpc::PORTMAP, rpc::proc::GET_PORT, &[0u8; 16]);
    socket
        .send_to(&request, portmap.udp_addr())
        .await
        .unwrap();

    let mut buf = [0u8; 64];
    let (len, _) = socket.recv_from(&mut buf).await.unwrap();
    assert_eq!(len, 28);
    assert_eq!(word(&buf, 0), 0xDEADBEEF);
    assert_eq!(word(&buf, 5), rpc::status::SUCCESS);
    assert_eq!(word(&buf, 6), u32::from(server.current_port()));
}

#[tokio::test]
async fn getport_over_tcp_uses_record_marks() {
    let port = free_port();
    let (server, _gate, cancel) = start_vxi(port, port).await;
    let portmap = PortmapServer::start(LOCALHOST, 0, server.port_handle(), cancel.clone())
        .await
        .unwrap();

    let mut stream = TcpStream::connect(portmap.tcp_addr()).await.unwrap();
    let body = call(0x42, rpc::PORTMAP, rpc::proc::GET_PORT, &[0u8; 16]);
    let mark = 0x8000_0000u32 | body.len() as u32;
    stream.write_all(&mark.to_be_bytes()).await.unwrap();
    stream.write_all(&body).await.unwrap();

    let mut mark = [0u8; 4];
    stream.read_exact(&mut mark).await.unwrap();
    assert_eq!(u32::from_be_bytes(mark), 0x8000_0000 | 28);
    let mut reply = [0u8; 28];
    stream.read_exact(&mut reply).await.unwrap();
    assert_eq!(word(&reply, 0), 0x42);
    assert_eq!(word(&reply, 6), u32::from(server.current_port()));
}
