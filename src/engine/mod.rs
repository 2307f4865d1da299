//! Settings handed to the media engine when peer connections are created.

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use sfu_transport_core::filter::{InterfaceFilter, IpFilter};
use sfu_transport_core::mux::{MultiUdpMux, TcpMux};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum NetworkType {
    Udp4,
    Udp6,
    Tcp4,
    Tcp6,
}

impl fmt::Display for NetworkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NetworkType::Udp4 => "udp4",
            NetworkType::Udp6 => "udp6",
            NetworkType::Tcp4 => "tcp4",
            NetworkType::Tcp6 => "tcp6",
        };
        f.write_str(s)
    }
}

/// Candidate type the NAT 1:1 IPs are advertised as.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum CandidateType {
    #[default]
    Host,
    ServerReflexive,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum MulticastDnsMode {
    /// Neither gather nor resolve `.local` candidates.
    Disabled,
    /// Resolve remote `.local` candidates, never advertise our own.
    #[default]
    QueryOnly,
    QueryAndGather,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum SdpSemantics {
    #[default]
    UnifiedPlan,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IceServer {
    pub urls: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EngineConfiguration {
    pub ice_servers: Vec<IceServer>,
    pub sdp_semantics: SdpSemantics,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BufferPacketType {
    Rtp,
    Rtcp,
}

/// Supplies per-stream packet buffers; attached after the settings are built.
pub trait BufferFactory: Send + Sync {
    fn get_or_new(&self, packet_type: BufferPacketType, ssrc: u32) -> Vec<u8>;
}

#[derive(Clone, Default)]
pub struct SettingEngine {
    interface_filter: Option<InterfaceFilter>,
    ip_filter: Option<IpFilter>,
    mdns_mode: MulticastDnsMode,
    nat_1to1_ips: Vec<String>,
    nat_1to1_candidate_type: CandidateType,
    ephemeral_udp_port_range: Option<(u16, u16)>,
    udp_mux: Option<Arc<MultiUdpMux>>,
    tcp_mux: Option<TcpMux>,
    network_types: Vec<NetworkType>,
    include_loopback_candidate: bool,
    lite: bool,
    buffer_factory: Option<Arc<dyn BufferFactory>>,
}

impl fmt::Debug for SettingEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettingEngine")
            .field("interface_filter", &self.interface_filter)
            .field("ip_filter", &self.ip_filter)
            .field("mdns_mode", &self.mdns_mode)
            .field("nat_1to1_ips", &self.nat_1to1_ips)
            .field("nat_1to1_candidate_type", &self.nat_1to1_candidate_type)
            .field("ephemeral_udp_port_range", &self.ephemeral_udp_port_range)
            .field("udp_mux", &self.udp_mux)
            .field("tcp_mux", &self.tcp_mux)
            .field("network_types", &self.network_types)
            .field("include_loopback_candidate", &self.include_loopback_candidate)
            .field("lite", &self.lite)
            .field("buffer_factory", &self.buffer_factory.is_some())
            .finish()
    }
}

impl SettingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_interface_filter(&mut self, filter: InterfaceFilter) {
        self.interface_filter.replace(filter);
    }
    pub fn set_ip_filter(&mut self, filter: IpFilter) {
        self.ip_filter.replace(filter);
    }
    pub fn set_multicast_dns_mode(&mut self, mode: MulticastDnsMode) {
        self.mdns_mode = mode;
    }
    /// Advertises `ips` (`external` or `external/local`) instead of the gathered host IPs.
    pub fn set_nat_1to1_ips(&mut self, ips: Vec<String>, candidate_type: CandidateType) {
        self.nat_1to1_ips = ips;
        self.nat_1to1_candidate_type = candidate_type;
    }
    pub fn set_ephemeral_udp_port_range(&mut self, start: u16, end: u16) {
        self.ephemeral_udp_port_range.replace((start, end));
    }
    pub fn set_udp_mux(&mut self, mux: Arc<MultiUdpMux>) {
        self.udp_mux.replace(mux);
    }
    pub fn set_tcp_mux(&mut self, mux: TcpMux) {
        self.tcp_mux.replace(mux);
    }
    pub fn set_network_types(&mut self, network_types: Vec<NetworkType>) {
        self.network_types = network_types;
    }
    pub fn set_include_loopback_candidate(&mut self, include: bool) {
        self.include_loopback_candidate = include;
    }
    pub fn set_lite(&mut self, lite: bool) {
        self.lite = lite;
    }
    pub fn set_buffer_factory(&mut self, factory: Arc<dyn BufferFactory>) {
        self.buffer_factory.replace(factory);
    }

    pub fn interface_filter(&self) -> Option<&InterfaceFilter> {
        self.interface_filter.as_ref()
    }
    pub fn ip_filter(&self) -> Option<&IpFilter> {
        self.ip_filter.as_ref()
    }
    pub fn multicast_dns_mode(&self) -> MulticastDnsMode {
        self.mdns_mode
    }
    pub fn nat_1to1_ips(&self) -> &[String] {
        &self.nat_1to1_ips
    }
    pub fn nat_1to1_candidate_type(&self) -> CandidateType {
        self.nat_1to1_candidate_type
    }
    pub fn ephemeral_udp_port_range(&self) -> Option<(u16, u16)> {
        self.ephemeral_udp_port_range
    }
    pub fn udp_mux(&self) -> Option<&Arc<MultiUdpMux>> {
        self.udp_mux.as_ref()
    }
    pub fn tcp_mux(&self) -> Option<&TcpMux> {
        self.tcp_mux.as_ref()
    }
    pub fn network_types(&self) -> &[NetworkType] {
        &self.network_types
    }
    pub fn include_loopback_candidate(&self) -> bool {
        self.include_loopback_candidate
    }
    pub fn lite(&self) -> bool {
        self.lite
    }
    pub fn buffer_factory(&self) -> Option<&Arc<dyn BufferFactory>> {
        self.buffer_factory.as_ref()
    }

    /// Whether `ip` may be gathered as a host candidate.
    pub fn allows_ip(&self, ip: &IpAddr) -> bool {
        if ip.is_loopback() && !self.include_loopback_candidate {
            return false;
        }
        self.ip_filter.as_ref().map_or(true, |filter| filter.allows(ip))
    }
}

#[cfg(test)]
mod tests {
    use std::net::IpAddr;

    use sfu_transport_core::filter::IpFilter;

    use crate::engine::{CandidateType, MulticastDnsMode, NetworkType, SettingEngine};

    #[test]
    fn defaults() {
        let engine = SettingEngine::new();
        assert_eq!(engine.multicast_dns_mode(), MulticastDnsMode::QueryOnly);
        assert_eq!(engine.nat_1to1_candidate_type(), CandidateType::Host);
        assert!(engine.network_types().is_empty());
        assert!(engine.udp_mux().is_none());
        assert!(!engine.lite());
    }

    #[test]
    fn allows_ip() {
        let mut engine = SettingEngine::new();
        let loopback: IpAddr = "127.0.0.1".parse().unwrap();
        let private: IpAddr = "10.0.0.1".parse().unwrap();
        assert!(!engine.allows_ip(&loopback));
        assert!(engine.allows_ip(&private));
        engine.set_include_loopback_candidate(true);
        engine.set_ip_filter(IpFilter::new(&[], &["10.0.0.0/8"]).unwrap());
        assert!(engine.allows_ip(&loopback));
        assert!(!engine.allows_ip(&private));
    }

    #[test]
    fn network_type_names() {
        let names: Vec<String> = [
            NetworkType::Udp4,
            NetworkType::Udp6,
            NetworkType::Tcp4,
            NetworkType::Tcp6,
        ]
        .iter()
        .map(|t| t.to_string())
        .collect();
        assert_eq!(names, vec!["udp4", "udp6", "tcp4", "tcp6"]);
    }
}
