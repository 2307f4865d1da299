//! Minimal STUN client used to learn the external address of a local socket.
//!
//! Only the Binding Request / Binding Success Response exchange is supported.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::time::Duration;

use async_trait::async_trait;
use stun_format::{Attr, MsgBuilder, MsgType};
use tokio::net::UdpSocket;

use crate::socket::{bind_udp_ops, BufferSizes};

const MAGIC_COOKIE: u128 = 0x2112_A442;
const HEADER_LEN: usize = 20;

/// A fresh transaction id with the RFC 5389 magic cookie in the top 32 bits.
pub fn new_transaction_id() -> u128 {
    (MAGIC_COOKIE << 96) | (rand::random::<u128>() & ((1u128 << 96) - 1))
}

pub fn binding_request(tid: u128) -> io::Result<Vec<u8>> {
    let mut buf = [0u8; HEADER_LEN];
    let mut msg = MsgBuilder::from(buf.as_mut_slice());
    msg.typ(MsgType::BindingRequest)
        .ok_or_else(|| io::Error::other("stun: encode message type"))?;
    msg.tid(tid)
        .ok_or_else(|| io::Error::other("stun: encode transaction id"))?;
    Ok(msg.as_bytes().to_vec())
}

pub fn is_stun_response(buf: &[u8]) -> bool {
    buf.len() >= HEADER_LEN && buf[0] == 0x01 && buf[1] == 0x01
}

/// Extracts the mapped address from a Binding Success Response carrying `tid`.
pub fn recv_stun_response(buf: &[u8], tid: u128) -> Option<SocketAddr> {
    if !is_stun_response(buf) {
        return None;
    }
    let msg = stun_format::Msg::from(buf);
    if !matches!(msg.typ(), Some(MsgType::BindingResponse)) {
        return None;
    }
    if msg.tid() != Some(tid) {
        return None;
    }
    let mut mapped = None;
    for attr in msg.attrs_iter() {
        match attr {
            Attr::XorMappedAddress(addr) => return Some(convert(addr)),
            Attr::MappedAddress(addr) => {
                mapped.replace(convert(addr));
            }
            _ => {}
        }
    }
    mapped
}

fn convert(addr: stun_format::SocketAddr) -> SocketAddr {
    match addr {
        stun_format::SocketAddr::V4(ip, port) => {
            SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::from(ip), port))
        }
        stun_format::SocketAddr::V6(ip, port) => {
            SocketAddr::V6(SocketAddrV6::new(Ipv6Addr::from(ip), port, 0, 0))
        }
    }
}

/// Asks STUN servers which external IP a socket bound to `local` is seen from.
///
/// Implementations must report a contended local port with
/// [`io::ErrorKind::AddrInUse`]; every other error aborts probing for that local IP.
#[async_trait]
pub trait StunProber: Send + Sync {
    async fn probe(&self, local: SocketAddr, stun_servers: &[String]) -> io::Result<IpAddr>;
}

/// [`StunProber`] that talks to the servers over a real UDP socket.
#[derive(Clone, Debug)]
pub struct UdpStunProber {
    recv_timeout: Duration,
    attempts: usize,
}

impl Default for UdpStunProber {
    fn default() -> Self {
        Self {
            recv_timeout: Duration::from_secs(1),
            attempts: 3,
        }
    }
}

impl UdpStunProber {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_recv_timeout(mut self, recv_timeout: Duration) -> Self {
        self.recv_timeout = recv_timeout;
        self
    }
    pub fn set_attempts(mut self, attempts: usize) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    async fn query(&self, udp: &UdpSocket, server: SocketAddr) -> io::Result<SocketAddr> {
        let tid = new_transaction_id();
        let request = binding_request(tid)?;
        let mut buf = [0u8; 1500];
        for _ in 0..self.attempts {
            udp.send_to(&request, server).await?;
            let deadline = tokio::time::Instant::now() + self.recv_timeout;
            loop {
                match tokio::time::timeout_at(deadline, udp.recv_from(&mut buf)).await {
                    Ok(rs) => {
                        let (len, from) = rs?;
                        if from != server {
                            continue;
                        }
                        if let Some(addr) = recv_stun_response(&buf[..len], tid) {
                            return Ok(addr);
                        }
                    }
                    Err(_) => break,
                }
            }
        }
        Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("stun {server} no response"),
        ))
    }
}

#[async_trait]
impl StunProber for UdpStunProber {
    async fn probe(&self, local: SocketAddr, stun_servers: &[String]) -> io::Result<IpAddr> {
        let socket = bind_udp_ops(local, true, BufferSizes::default())?;
        let udp = UdpSocket::from_std(socket.into())?;
        let mut err: Option<io::Error> = None;
        for stun_server in stun_servers {
            let addrs = match tokio::net::lookup_host(stun_server.as_str()).await {
                Ok(addrs) => addrs,
                Err(e) => {
                    log::debug!("stun server lookup {stun_server:?} {e:?}");
                    err.replace(e);
                    continue;
                }
            };
            // the server must be reachable from the family of the local address
            let Some(server) = addrs.into_iter().find(|a| a.is_ipv4() == local.is_ipv4()) else {
                continue;
            };
            match self.query(&udp, server).await {
                Ok(addr) => return Ok(addr.ip()),
                Err(e) => {
                    log::debug!("stun query {server} from {local} {e:?}");
                    err.replace(e);
                }
            }
        }
        Err(err.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no stun server usable from {local}"),
            )
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    use crate::stun::{
        binding_request, is_stun_response, new_transaction_id, recv_stun_response, StunProber,
        UdpStunProber,
    };

    fn mapped_address_response(tid: u128, ip: Ipv4Addr, port: u16) -> Vec<u8> {
        let mut buf = vec![0x01, 0x01, 0x00, 0x0c];
        buf.extend_from_slice(&tid.to_be_bytes());
        buf.extend_from_slice(&[0x00, 0x01, 0x00, 0x08, 0x00, 0x01]);
        buf.extend_from_slice(&port.to_be_bytes());
        buf.extend_from_slice(&ip.octets());
        buf
    }

    #[test]
    fn request_header() {
        let tid = new_transaction_id();
        let request = binding_request(tid).unwrap();
        assert_eq!(request.len(), 20);
        assert_eq!(&request[..4], &[0x00, 0x01, 0x00, 0x00]);
        assert!(!is_stun_response(&request));
    }

    #[test]
    fn response_with_mapped_address() {
        let tid = new_transaction_id();
        let response = mapped_address_response(tid, Ipv4Addr::new(203, 0, 113, 5), 40000);
        assert!(is_stun_response(&response));
        assert_eq!(
            recv_stun_response(&response, tid),
            Some(SocketAddr::new(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 5)), 40000))
        );
        assert_eq!(recv_stun_response(&response, tid ^ 1), None);
    }

    #[tokio::test]
    async fn probe_against_local_server() {
        let server = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 1500];
            let (len, from) = server.recv_from(&mut buf).await.unwrap();
            assert_eq!(len, 20);
            let tid = u128::from_be_bytes(buf[4..20].try_into().unwrap());
            let ip = match from.ip() {
                IpAddr::V4(ip) => ip,
                IpAddr::V6(_) => unreachable!(),
            };
            let response = mapped_address_response(tid, ip, from.port());
            server.send_to(&response, from).await.unwrap();
        });
        let prober = UdpStunProber::new();
        let ip = prober
            .probe("127.0.0.1:0".parse().unwrap(), &[server_addr.to_string()])
            .await
            .unwrap();
        assert_eq!(ip, IpAddr::V4(Ipv4Addr::LOCALHOST));
    }

    #[tokio::test]
    async fn probe_reports_addr_in_use() {
        let taken = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let local = taken.local_addr().unwrap();
        let err = UdpStunProber::new()
            .probe(local, &["127.0.0.1:3478".to_string()])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::AddrInUse);
    }
}
