//! Shared sockets handed to the ICE agent.
//!
//! Demultiplexing happens inside the media transport; this module only binds
//! the sockets with the right options and keeps them alive.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::filter::{InterfaceFilter, IpFilter};
use crate::socket::{bind_udp, create_tcp_listener, local_addresses, BufferSizes, LocalInterface};

pub const DEFAULT_UDP_BUFFER_SIZE: usize = 16 * 1024 * 1024;
/// Number of packets buffered per TCP connection.
pub const TCP_READ_BUFFER_SIZE: usize = 50;
pub const TCP_WRITE_BUFFER_SIZE: usize = 4 * 1024 * 1024;

#[derive(Clone, Debug)]
pub struct UdpMuxOptions {
    pub read_buffer_size: usize,
    pub write_buffer_size: usize,
    pub include_loopback: bool,
    pub ip_filter: Option<IpFilter>,
    pub interface_filter: Option<InterfaceFilter>,
}

impl Default for UdpMuxOptions {
    fn default() -> Self {
        Self {
            read_buffer_size: DEFAULT_UDP_BUFFER_SIZE,
            write_buffer_size: DEFAULT_UDP_BUFFER_SIZE,
            include_loopback: false,
            ip_filter: None,
            interface_filter: None,
        }
    }
}

impl UdpMuxOptions {
    pub fn set_read_buffer_size(mut self, read_buffer_size: usize) -> Self {
        self.read_buffer_size = read_buffer_size;
        self
    }
    pub fn set_write_buffer_size(mut self, write_buffer_size: usize) -> Self {
        self.write_buffer_size = write_buffer_size;
        self
    }
    pub fn set_include_loopback(mut self, include_loopback: bool) -> Self {
        self.include_loopback = include_loopback;
        self
    }
    pub fn set_ip_filter(mut self, ip_filter: IpFilter) -> Self {
        self.ip_filter.replace(ip_filter);
        self
    }
    pub fn set_interface_filter(mut self, interface_filter: InterfaceFilter) -> Self {
        self.interface_filter.replace(interface_filter);
        self
    }

    fn allows(&self, interface: &LocalInterface, ip: &IpAddr) -> bool {
        if ip.is_loopback() && !self.include_loopback {
            return false;
        }
        if let Some(filter) = &self.interface_filter {
            if !filter.allows(&interface.name) {
                return false;
            }
        }
        if let Some(filter) = &self.ip_filter {
            if !filter.allows(ip) {
                return false;
            }
        }
        true
    }
}

/// One UDP socket per local address, all on the same port.
#[derive(Debug)]
pub struct MultiUdpMux {
    sockets: Vec<std::net::UdpSocket>,
    local_addrs: Vec<SocketAddr>,
}

impl MultiUdpMux {
    pub fn from_port(port: u16, options: UdpMuxOptions) -> Result<Self> {
        let addresses = local_addresses(options.include_loopback)?;
        Self::bind(port, addresses, &options)
    }

    pub(crate) fn bind(
        port: u16,
        addresses: Vec<(LocalInterface, IpAddr)>,
        options: &UdpMuxOptions,
    ) -> Result<Self> {
        let buffers = BufferSizes {
            recv: Some(options.read_buffer_size),
            send: Some(options.write_buffer_size),
        };
        let mut sockets = Vec::new();
        let mut local_addrs = Vec::new();
        for (interface, ip) in addresses {
            if !options.allows(&interface, &ip) {
                continue;
            }
            let socket = bind_udp(SocketAddr::new(ip, port), buffers)?;
            let socket: std::net::UdpSocket = socket.into();
            let local_addr = socket.local_addr()?;
            log::debug!("udp mux listening on {local_addr} ({})", interface.name);
            sockets.push(socket);
            local_addrs.push(local_addr);
        }
        if sockets.is_empty() {
            return Err(Error::NoUsableAddress(port));
        }
        Ok(Self {
            sockets,
            local_addrs,
        })
    }

    pub fn local_addrs(&self) -> &[SocketAddr] {
        &self.local_addrs
    }
    pub fn sockets(&self) -> &[std::net::UdpSocket] {
        &self.sockets
    }
}

/// Binds the ICE/TCP listener, dual-stack when the host supports IPv6.
pub fn listen_tcp(port: u16) -> Result<std::net::TcpListener> {
    match create_tcp_listener(SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port)) {
        Ok(listener) => Ok(listener),
        Err(e) => {
            log::debug!("dual-stack tcp listener on {port} {e:?}, falling back to ipv4");
            Ok(create_tcp_listener(SocketAddr::new(
                IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                port,
            ))?)
        }
    }
}

#[derive(Clone, Debug)]
pub struct TcpMuxParams {
    pub listener: Arc<std::net::TcpListener>,
    pub read_buffer_size: usize,
    pub write_buffer_size: usize,
}

impl TcpMuxParams {
    pub fn new(listener: Arc<std::net::TcpListener>) -> Self {
        Self {
            listener,
            read_buffer_size: TCP_READ_BUFFER_SIZE,
            write_buffer_size: TCP_WRITE_BUFFER_SIZE,
        }
    }
}

#[derive(Clone, Debug)]
pub struct TcpMux {
    params: TcpMuxParams,
}

impl TcpMux {
    pub fn new(params: TcpMuxParams) -> Self {
        Self { params }
    }
    pub fn listener(&self) -> &Arc<std::net::TcpListener> {
        &self.params.listener
    }
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.params.listener.local_addr()
    }
    pub fn read_buffer_size(&self) -> usize {
        self.params.read_buffer_size
    }
    pub fn write_buffer_size(&self) -> usize {
        self.params.write_buffer_size
    }
}

#[cfg(test)]
mod tests {
    use std::net::IpAddr;
    use std::sync::Arc;

    use crate::error::Error;
    use crate::filter::{InterfaceFilter, IpFilter};
    use crate::mux::{listen_tcp, MultiUdpMux, TcpMux, TcpMuxParams, UdpMuxOptions};
    use crate::socket::LocalInterface;

    fn loopback() -> Vec<(LocalInterface, IpAddr)> {
        vec![(
            LocalInterface::new(1, "lo".to_string()),
            "127.0.0.1".parse().unwrap(),
        )]
    }

    #[test]
    fn binds_allowed_addresses() {
        let options = UdpMuxOptions::default()
            .set_read_buffer_size(1024 * 1024)
            .set_write_buffer_size(1024 * 1024)
            .set_include_loopback(true);
        let mux = MultiUdpMux::bind(0, loopback(), &options).unwrap();
        assert_eq!(mux.local_addrs().len(), 1);
        assert!(mux.local_addrs()[0].ip().is_loopback());
        assert_eq!(mux.sockets().len(), 1);
    }

    #[test]
    fn loopback_skipped_unless_enabled() {
        let err = MultiUdpMux::bind(0, loopback(), &UdpMuxOptions::default()).unwrap_err();
        assert!(matches!(err, Error::NoUsableAddress(0)));
    }

    #[test]
    fn filters_apply() {
        let options = UdpMuxOptions::default()
            .set_include_loopback(true)
            .set_interface_filter(InterfaceFilter::new(vec!["eth0".to_string()], vec![]));
        assert!(MultiUdpMux::bind(0, loopback(), &options).is_err());

        let options = UdpMuxOptions::default()
            .set_include_loopback(true)
            .set_ip_filter(IpFilter::new(&[], &["127.0.0.0/8"]).unwrap());
        assert!(MultiUdpMux::bind(0, loopback(), &options).is_err());
    }

    #[test]
    fn tcp_mux_defaults() {
        let listener = Arc::new(listen_tcp(0).unwrap());
        let mux = TcpMux::new(TcpMuxParams::new(listener));
        assert_eq!(mux.read_buffer_size(), 50);
        assert_eq!(mux.write_buffer_size(), 4 * 1024 * 1024);
        assert_ne!(mux.local_addr().unwrap().port(), 0);
    }
}
