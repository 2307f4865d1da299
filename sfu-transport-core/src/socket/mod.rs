use std::io;
use std::net::{IpAddr, SocketAddr};

use anyhow::Context;
use network_interface::{NetworkInterface, NetworkInterfaceConfig};
use socket2::Protocol;

/// Receive buffers below this size drop packets under production load.
pub const MIN_UDP_READ_BUFFER_SIZE: usize = 5_000_000;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LocalInterface {
    pub index: u32,
    pub name: String,
}

impl LocalInterface {
    pub fn new(index: u32, name: String) -> Self {
        Self { index, name }
    }
}

/// Kernel buffer sizes applied to a socket before it is bound. `None` keeps the OS default.
#[derive(Clone, Copy, Debug, Default)]
pub struct BufferSizes {
    pub recv: Option<usize>,
    pub send: Option<usize>,
}

/// Every usable address of every local interface, paired with the interface it belongs to.
pub fn local_addresses(include_loopback: bool) -> anyhow::Result<Vec<(LocalInterface, IpAddr)>> {
    let network_interfaces = NetworkInterface::show().context("list network interfaces")?;
    let mut rs = Vec::new();
    for iface in network_interfaces {
        for addr in &iface.addr {
            let ip = addr.ip();
            if !is_usable(&ip, include_loopback) {
                continue;
            }
            rs.push((LocalInterface::new(iface.index, iface.name.clone()), ip));
        }
    }
    Ok(rs)
}

/// The distinct local IPs ICE may gather candidates on.
pub fn local_ip_addresses(include_loopback: bool) -> anyhow::Result<Vec<IpAddr>> {
    let mut ips: Vec<IpAddr> = Vec::new();
    for (_, ip) in local_addresses(include_loopback)? {
        if !ips.contains(&ip) {
            ips.push(ip);
        }
    }
    Ok(ips)
}

fn is_usable(ip: &IpAddr, include_loopback: bool) -> bool {
    if ip.is_unspecified() || ip.is_multicast() {
        return false;
    }
    if ip.is_loopback() {
        return include_loopback;
    }
    match ip {
        IpAddr::V4(_) => true,
        // fe80::/10 needs a scope id to be bound
        IpAddr::V6(v6) => (v6.segments()[0] & 0xffc0) != 0xfe80,
    }
}

/// Binds a non-blocking UDP socket, keeping the OS error kind intact so callers
/// can tell `AddrInUse` apart from other failures.
pub fn bind_udp_ops(addr: SocketAddr, only_v6: bool, buffers: BufferSizes) -> io::Result<socket2::Socket> {
    let socket = if addr.is_ipv4() {
        socket2::Socket::new(
            socket2::Domain::IPV4,
            socket2::Type::DGRAM,
            Some(Protocol::UDP),
        )?
    } else {
        let socket = socket2::Socket::new(
            socket2::Domain::IPV6,
            socket2::Type::DGRAM,
            Some(Protocol::UDP),
        )?;
        socket.set_only_v6(only_v6)?;
        socket
    };
    if let Some(size) = buffers.recv {
        if let Err(e) = socket.set_recv_buffer_size(size) {
            log::warn!("set_recv_buffer_size {size} {addr} {e:?}")
        }
    }
    if let Some(size) = buffers.send {
        if let Err(e) = socket.set_send_buffer_size(size) {
            log::warn!("set_send_buffer_size {size} {addr} {e:?}")
        }
    }
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    Ok(socket)
}

pub fn bind_udp(addr: SocketAddr, buffers: BufferSizes) -> anyhow::Result<socket2::Socket> {
    bind_udp_ops(addr, true, buffers).with_context(|| format!("bind_udp {addr}"))
}

pub fn create_tcp_listener(addr: SocketAddr) -> anyhow::Result<std::net::TcpListener> {
    let socket = if addr.is_ipv6() {
        let socket = socket2::Socket::new(socket2::Domain::IPV6, socket2::Type::STREAM, None)?;
        socket
            .set_only_v6(false)
            .with_context(|| format!("set_only_v6 failed: {}", &addr))?;
        socket
    } else {
        socket2::Socket::new(socket2::Domain::IPV4, socket2::Type::STREAM, None)?
    };
    socket
        .set_reuse_address(true)
        .context("set_reuse_address")?;
    socket
        .bind(&addr.into())
        .with_context(|| format!("bind tcp {addr}"))?;
    socket.listen(128)?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

/// Reads the default receive buffer of a fresh UDP socket.
pub fn udp_read_buffer_size() -> io::Result<usize> {
    let socket = socket2::Socket::new(
        socket2::Domain::IPV4,
        socket2::Type::DGRAM,
        Some(Protocol::UDP),
    )?;
    socket.recv_buffer_size()
}

/// Warns when the OS receive buffer is too small for a production deployment.
pub fn check_udp_read_buffer() {
    match udp_read_buffer_size() {
        Ok(size) if size < MIN_UDP_READ_BUFFER_SIZE => {
            log::warn!(
                "UDP receive buffer is too small for a production set-up, current={size} suggested={MIN_UDP_READ_BUFFER_SIZE}"
            )
        }
        Ok(size) => {
            log::debug!("UDP receive buffer size {size}")
        }
        Err(e) => {
            log::debug!("udp_read_buffer_size {e:?}")
        }
    }
}
