use std::net::IpAddr;

use serde::{Deserialize, Serialize};

pub(crate) const DEFAULT_PACKET_BUFFER_SIZE: usize = 500;

pub const DEFAULT_STUN_SERVERS: &[&str] = &[
    "stun.l.google.com:19302",
    "stun1.l.google.com:19302",
];

pub fn default_stun_servers() -> Vec<String> {
    DEFAULT_STUN_SERVERS.iter().map(|s| s.to_string()).collect()
}

/// Process level settings the transport depends on.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub rtc: RtcConfig,
    /// Skips production-only checks such as the UDP buffer size advisory.
    pub development: bool,
}

impl Config {
    pub fn new(rtc: RtcConfig) -> Self {
        Self {
            rtc,
            development: false,
        }
    }
    pub fn set_development(mut self, development: bool) -> Self {
        self.development = development;
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterfacesConfig {
    pub includes: Vec<String>,
    pub excludes: Vec<String>,
}

/// CIDR blocks, e.g. `10.0.0.0/8`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IpsConfig {
    pub includes: Vec<String>,
    pub excludes: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CongestionControlConfig {
    /// Transport-wide CC instead of REMB/abs-send-time towards subscribers.
    pub use_send_side_bwe: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RtcConfig {
    /// Single UDP port shared by every peer connection, 0 to disable.
    pub udp_port: u16,
    pub ice_port_range_start: u16,
    pub ice_port_range_end: u16,
    /// ICE/TCP port, 0 to disable.
    pub tcp_port: u16,
    /// `host:port` entries; the defaults are used when empty.
    pub stun_servers: Vec<String>,
    pub force_tcp: bool,
    pub use_ice_lite: bool,
    pub use_mdns: bool,
    pub enable_loopback_candidate: bool,
    pub strict_acks: bool,
    pub congestion_control: CongestionControlConfig,
    pub interfaces: InterfacesConfig,
    pub ips: IpsConfig,
    pub node_ip: Option<IpAddr>,
    /// `node_ip` was filled in by discovery rather than by the operator.
    pub node_ip_auto_generated: bool,
    pub use_external_ip: bool,
    pub packet_buffer_size: usize,
}

impl Default for RtcConfig {
    fn default() -> Self {
        Self {
            udp_port: 0,
            ice_port_range_start: 0,
            ice_port_range_end: 0,
            tcp_port: 0,
            stun_servers: Vec::new(),
            force_tcp: false,
            use_ice_lite: false,
            use_mdns: false,
            enable_loopback_candidate: false,
            strict_acks: true,
            congestion_control: Default::default(),
            interfaces: Default::default(),
            ips: Default::default(),
            node_ip: None,
            node_ip_auto_generated: false,
            use_external_ip: false,
            packet_buffer_size: DEFAULT_PACKET_BUFFER_SIZE,
        }
    }
}

impl RtcConfig {
    pub fn set_udp_port(mut self, udp_port: u16) -> Self {
        self.udp_port = udp_port;
        self
    }
    pub fn set_ice_port_range(mut self, start: u16, end: u16) -> Self {
        self.ice_port_range_start = start;
        self.ice_port_range_end = end;
        self
    }
    pub fn set_tcp_port(mut self, tcp_port: u16) -> Self {
        self.tcp_port = tcp_port;
        self
    }
    pub fn set_stun_servers(mut self, stun_servers: Vec<String>) -> Self {
        self.stun_servers = stun_servers;
        self
    }
    pub fn set_force_tcp(mut self, force_tcp: bool) -> Self {
        self.force_tcp = force_tcp;
        self
    }
    pub fn set_use_ice_lite(mut self, use_ice_lite: bool) -> Self {
        self.use_ice_lite = use_ice_lite;
        self
    }
    pub fn set_use_mdns(mut self, use_mdns: bool) -> Self {
        self.use_mdns = use_mdns;
        self
    }
    pub fn set_enable_loopback_candidate(mut self, enable_loopback_candidate: bool) -> Self {
        self.enable_loopback_candidate = enable_loopback_candidate;
        self
    }
    pub fn set_strict_acks(mut self, strict_acks: bool) -> Self {
        self.strict_acks = strict_acks;
        self
    }
    pub fn set_use_send_side_bwe(mut self, use_send_side_bwe: bool) -> Self {
        self.congestion_control.use_send_side_bwe = use_send_side_bwe;
        self
    }
    pub fn set_interfaces(mut self, includes: Vec<String>, excludes: Vec<String>) -> Self {
        self.interfaces = InterfacesConfig { includes, excludes };
        self
    }
    pub fn set_ips(mut self, includes: Vec<String>, excludes: Vec<String>) -> Self {
        self.ips = IpsConfig { includes, excludes };
        self
    }
    pub fn set_node_ip(mut self, node_ip: IpAddr, auto_generated: bool) -> Self {
        self.node_ip.replace(node_ip);
        self.node_ip_auto_generated = auto_generated;
        self
    }
    pub fn set_use_external_ip(mut self, use_external_ip: bool) -> Self {
        self.use_external_ip = use_external_ip;
        self
    }
    pub fn set_packet_buffer_size(mut self, packet_buffer_size: usize) -> Self {
        self.packet_buffer_size = packet_buffer_size;
        self
    }

    /// Configured STUN servers, or the built-in list when none are set.
    pub fn stun_servers_or_default(&self) -> Vec<String> {
        if self.stun_servers.is_empty() {
            default_stun_servers()
        } else {
            self.stun_servers.clone()
        }
    }
    pub(crate) fn has_port_range(&self) -> bool {
        self.ice_port_range_start != 0 && self.ice_port_range_end != 0
    }
    /// An operator-provided node IP, as opposed to one found by discovery.
    pub(crate) fn has_static_node_ip(&self) -> bool {
        self.node_ip.is_some() && !self.node_ip_auto_generated
    }
    pub(crate) fn packet_buffer_size_or_default(&self) -> usize {
        if self.packet_buffer_size == 0 {
            DEFAULT_PACKET_BUFFER_SIZE
        } else {
            self.packet_buffer_size
        }
    }
}
