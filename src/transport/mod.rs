use std::fmt;
use std::net::{IpAddr, TcpListener};
use std::sync::Arc;

use sfu_transport_core::filter::{InterfaceFilter, IpFilter};
use sfu_transport_core::mux::{listen_tcp, MultiUdpMux, TcpMux, TcpMuxParams, UdpMuxOptions};
use sfu_transport_core::nat::{NatMapping, NatResolver, UdpPortPolicy};
use sfu_transport_core::socket::{check_udp_read_buffer, local_ip_addresses};
use sfu_transport_core::stun::{StunProber, UdpStunProber};

use crate::config::{Config, RtcConfig};
use crate::engine::{
    BufferFactory, CandidateType, EngineConfiguration, IceServer, MulticastDnsMode, NetworkType,
    SettingEngine,
};
use crate::error::{Error, Result};
use crate::profile::DirectionProfile;

/// How the server learns the IPs it advertises to clients.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NatStrategy {
    /// Probe STUN servers from every local IP, falling back to the hint.
    AutoDiscover(IpAddr),
    /// Advertise the operator-provided IP as is.
    StaticHint(IpAddr),
    None,
}

impl NatStrategy {
    pub fn select(rtc: &RtcConfig, external_ip: Option<IpAddr>) -> Self {
        match external_ip {
            Some(hint) if rtc.use_external_ip => NatStrategy::AutoDiscover(hint),
            Some(hint) if rtc.has_static_node_ip() => NatStrategy::StaticHint(hint),
            _ => NatStrategy::None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IceMode {
    Lite,
    /// `stun:` URLs handed to clients.
    StunServers(Vec<String>),
    HostOnly,
}

impl IceMode {
    pub fn select(rtc: &RtcConfig) -> Self {
        if rtc.use_ice_lite {
            IceMode::Lite
        } else if rtc.node_ip.is_none() && !rtc.use_external_ip {
            let urls = rtc
                .stun_servers_or_default()
                .iter()
                .map(|server| format!("stun:{server}"))
                .collect();
            IceMode::StunServers(urls)
        } else {
            IceMode::HostOnly
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ReceiverConfig {
    pub packet_buffer_size: usize,
}

/// Everything the media engine needs to create peer connections, built once at startup.
pub struct TransportSettings {
    pub configuration: EngineConfiguration,
    pub setting_engine: SettingEngine,
    pub receiver: ReceiverConfig,
    pub udp_mux: Option<Arc<MultiUdpMux>>,
    pub tcp_listener: Option<Arc<TcpListener>>,
    pub publisher: DirectionProfile,
    pub subscriber: DirectionProfile,
    pub nat_1to1_ips: Vec<String>,
    pub use_mdns: bool,
    buffer_factory: Option<Arc<dyn BufferFactory>>,
}

impl fmt::Debug for TransportSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportSettings")
            .field("configuration", &self.configuration)
            .field("setting_engine", &self.setting_engine)
            .field("receiver", &self.receiver)
            .field("udp_mux", &self.udp_mux)
            .field("tcp_listener", &self.tcp_listener)
            .field("publisher", &self.publisher)
            .field("subscriber", &self.subscriber)
            .field("nat_1to1_ips", &self.nat_1to1_ips)
            .field("use_mdns", &self.use_mdns)
            .field("buffer_factory", &self.buffer_factory.is_some())
            .finish()
    }
}

impl TransportSettings {
    /// Builds the settings with the UDP STUN client.
    ///
    /// `external_ip` is the node IP known to the caller, used as the NAT hint.
    pub async fn build(config: &Config, external_ip: Option<IpAddr>) -> Result<Self> {
        Self::build_with_prober(config, external_ip, Arc::new(UdpStunProber::new())).await
    }

    pub async fn build_with_prober(
        config: &Config,
        external_ip: Option<IpAddr>,
        prober: Arc<dyn StunProber>,
    ) -> Result<Self> {
        Self::build_from(config, external_ip, prober, local_ip_addresses).await
    }

    pub(crate) async fn build_from<F>(
        config: &Config,
        external_ip: Option<IpAddr>,
        prober: Arc<dyn StunProber>,
        local_ips: F,
    ) -> Result<Self>
    where
        F: FnOnce(bool) -> anyhow::Result<Vec<IpAddr>>,
    {
        let rtc = &config.rtc;
        if rtc.has_port_range() && rtc.ice_port_range_start > rtc.ice_port_range_end {
            return Err(Error::Configuration(format!(
                "invalid ice port range {}-{}",
                rtc.ice_port_range_start, rtc.ice_port_range_end
            )));
        }
        let mut setting_engine = SettingEngine::new();

        let interface_filter = if rtc.interfaces.includes.is_empty() && rtc.interfaces.excludes.is_empty() {
            None
        } else {
            Some(InterfaceFilter::new(
                rtc.interfaces.includes.clone(),
                rtc.interfaces.excludes.clone(),
            ))
        };
        let ip_filter = if rtc.ips.includes.is_empty() && rtc.ips.excludes.is_empty() {
            None
        } else {
            Some(IpFilter::new(
                rtc.ips.includes.as_slice(),
                rtc.ips.excludes.as_slice(),
            )?)
        };
        if let Some(filter) = &interface_filter {
            setting_engine.set_interface_filter(filter.clone());
        }
        if let Some(filter) = &ip_filter {
            setting_engine.set_ip_filter(filter.clone());
        }

        if !rtc.use_mdns {
            setting_engine.set_multicast_dns_mode(MulticastDnsMode::Disabled);
        }

        let mut nat_1to1_ips = Vec::new();
        match NatStrategy::select(rtc, external_ip) {
            NatStrategy::AutoDiscover(hint) => {
                let local_ips = local_ips(rtc.enable_loopback_candidate)
                    .map_err(sfu_transport_core::error::Error::from)?;
                match discover(rtc, ip_filter.as_ref(), prober, &local_ips).await {
                    Some(mapping) if !mapping.is_empty() => {
                        log::info!("using nat 1:1 mapping {mapping}");
                        nat_1to1_ips = mapping.to_strings();
                        setting_engine.set_nat_1to1_ips(nat_1to1_ips.clone(), CandidateType::Host);
                    }
                    _ => {
                        log::info!("no external ip discovered, using {hint}");
                        setting_engine.set_nat_1to1_ips(vec![hint.to_string()], CandidateType::Host);
                    }
                }
            }
            NatStrategy::StaticHint(hint) => {
                log::info!("using static node ip {hint}");
                setting_engine.set_nat_1to1_ips(vec![hint.to_string()], CandidateType::Host);
            }
            NatStrategy::None => {}
        }

        let mut network_types = Vec::new();
        let mut udp_mux = None;
        if !rtc.force_tcp {
            network_types.push(NetworkType::Udp4);
            network_types.push(NetworkType::Udp6);
            if rtc.has_port_range() {
                setting_engine
                    .set_ephemeral_udp_port_range(rtc.ice_port_range_start, rtc.ice_port_range_end);
            } else if rtc.udp_port != 0 {
                let mut options = UdpMuxOptions::default()
                    .set_include_loopback(rtc.enable_loopback_candidate);
                if let Some(filter) = interface_filter {
                    options = options.set_interface_filter(filter);
                }
                if let Some(filter) = ip_filter {
                    options = options.set_ip_filter(filter);
                }
                let mux = Arc::new(MultiUdpMux::from_port(rtc.udp_port, options)?);
                log::info!("udp mux bound to {:?}", mux.local_addrs());
                setting_engine.set_udp_mux(mux.clone());
                udp_mux.replace(mux);
                if !config.development {
                    check_udp_read_buffer();
                }
            }
        }

        let mut tcp_listener = None;
        if rtc.tcp_port != 0 {
            network_types.push(NetworkType::Tcp4);
            network_types.push(NetworkType::Tcp6);
            let listener = Arc::new(listen_tcp(rtc.tcp_port)?);
            log::info!("ice/tcp listening on {}", listener.local_addr()?);
            setting_engine.set_tcp_mux(TcpMux::new(TcpMuxParams::new(listener.clone())));
            tcp_listener.replace(listener);
        }

        if network_types.is_empty() {
            return Err(Error::Configuration(
                "TCP is forced but not configured".to_string(),
            ));
        }
        setting_engine.set_network_types(network_types);
        if rtc.enable_loopback_candidate {
            setting_engine.set_include_loopback_candidate(true);
        }

        let mut configuration = EngineConfiguration::default();
        match IceMode::select(rtc) {
            IceMode::Lite => setting_engine.set_lite(true),
            IceMode::StunServers(urls) => configuration.ice_servers.push(IceServer { urls }),
            IceMode::HostOnly => {}
        }

        Ok(Self {
            configuration,
            setting_engine,
            receiver: ReceiverConfig {
                packet_buffer_size: rtc.packet_buffer_size_or_default(),
            },
            udp_mux,
            tcp_listener,
            publisher: DirectionProfile::publisher(),
            subscriber: DirectionProfile::subscriber(
                rtc.strict_acks,
                rtc.congestion_control.use_send_side_bwe,
            ),
            nat_1to1_ips,
            use_mdns: rtc.use_mdns,
            buffer_factory: None,
        })
    }

    pub fn set_buffer_factory(&mut self, factory: Arc<dyn BufferFactory>) {
        self.setting_engine.set_buffer_factory(factory.clone());
        self.buffer_factory.replace(factory);
    }
    pub fn buffer_factory(&self) -> Option<&Arc<dyn BufferFactory>> {
        self.buffer_factory.as_ref()
    }
}

/// Maps every local IP to the external IP STUN servers see it as.
///
/// `None` means there was no local IP to map, not that discovery failed.
pub async fn resolve_external_ips(
    rtc: &RtcConfig,
    ip_filter: Option<&IpFilter>,
) -> Result<Option<NatMapping>> {
    let local_ips =
        local_ip_addresses(rtc.enable_loopback_candidate).map_err(sfu_transport_core::error::Error::from)?;
    Ok(discover(rtc, ip_filter, Arc::new(UdpStunProber::new()), &local_ips).await)
}

async fn discover(
    rtc: &RtcConfig,
    ip_filter: Option<&IpFilter>,
    prober: Arc<dyn StunProber>,
    local_ips: &[IpAddr],
) -> Option<NatMapping> {
    let ports = UdpPortPolicy::new(rtc.ice_port_range_start, rtc.ice_port_range_end, rtc.udp_port)
        .candidate_ports();
    NatResolver::new(prober, rtc.stun_servers_or_default(), ports)
        .resolve(local_ips, ip_filter)
        .await
}
