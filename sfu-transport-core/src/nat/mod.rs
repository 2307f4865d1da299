//! NAT 1:1 discovery.
//!
//! For every local IP a probe task asks the STUN servers which external IP the
//! host is seen from. A single collector folds the answers into a
//! [`NatMapping`]: it waits up to `first_response_timeout` for anything at all,
//! and once the first answer arrives gives the remaining probes only
//! `grace_period` more. Local IPs that end up without an answer are mapped to
//! themselves.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sfu_transport_core::nat::{NatResolver, UdpPortPolicy};
//! use sfu_transport_core::stun::UdpStunProber;
//!
//! # async fn example() {
//! let resolver = NatResolver::new(
//!     Arc::new(UdpStunProber::new()),
//!     vec!["stun.l.google.com:19302".to_string()],
//!     UdpPortPolicy::Fixed(7882).candidate_ports(),
//! );
//! let local_ips: Vec<std::net::IpAddr> = vec!["10.0.0.1".parse().unwrap()];
//! if let Some(mapping) = resolver.resolve(&local_ips, None).await {
//!     println!("{:?}", mapping.to_strings());
//! }
//! # }
//! ```

use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::filter::IpFilter;
use crate::stun::StunProber;

pub const DEFAULT_FIRST_RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(1);
/// Number of ports sampled from a configured port range.
pub const PORT_RANGE_SAMPLES: usize = 5;

/// Which local UDP ports a probe binds to, in order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UdpPortPolicy {
    /// Sample [`PORT_RANGE_SAMPLES`] ports from the inclusive range.
    Range { start: u16, end: u16 },
    Fixed(u16),
    /// Let the OS pick.
    Ephemeral,
}

impl UdpPortPolicy {
    /// A range wins over a fixed port; zero means "not configured".
    pub fn new(port_range_start: u16, port_range_end: u16, udp_port: u16) -> Self {
        if port_range_start != 0 && port_range_end != 0 {
            UdpPortPolicy::Range {
                start: port_range_start.min(port_range_end),
                end: port_range_start.max(port_range_end),
            }
        } else if udp_port != 0 {
            UdpPortPolicy::Fixed(udp_port)
        } else {
            UdpPortPolicy::Ephemeral
        }
    }
    pub fn candidate_ports(&self) -> Vec<u16> {
        match *self {
            UdpPortPolicy::Range { start, end } => {
                let mut rng = rand::thread_rng();
                (0..PORT_RANGE_SAMPLES)
                    .map(|_| rng.gen_range(start..=end))
                    .collect()
            }
            UdpPortPolicy::Fixed(port) => vec![port],
            UdpPortPolicy::Ephemeral => vec![0],
        }
    }
}

/// One external IP and the local IP that discovered it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct IpMapping {
    pub external: IpAddr,
    pub local: IpAddr,
}

impl IpMapping {
    pub fn new(external: IpAddr, local: IpAddr) -> Self {
        Self { external, local }
    }
    pub fn is_identity(&self) -> bool {
        self.external == self.local
    }
}

impl fmt::Display for IpMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.external, self.local)
    }
}

/// External to local IP table; external IPs are unique.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NatMapping {
    mappings: Vec<IpMapping>,
}

impl NatMapping {
    pub fn iter(&self) -> impl Iterator<Item = &IpMapping> {
        self.mappings.iter()
    }
    pub fn len(&self) -> usize {
        self.mappings.len()
    }
    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
    pub fn external_for(&self, local: &IpAddr) -> Option<IpAddr> {
        self.mappings
            .iter()
            .find(|m| &m.local == local)
            .map(|m| m.external)
    }
    /// `external/local` strings as ICE expects them for 1:1 NAT.
    pub fn to_strings(&self) -> Vec<String> {
        self.mappings.iter().map(|m| m.to_string()).collect()
    }

    fn contains_external(&self, external: &IpAddr) -> bool {
        self.mappings.iter().any(|m| &m.external == external)
    }
    fn contains_local(&self, local: &IpAddr) -> bool {
        self.mappings.iter().any(|m| &m.local == local)
    }

    /// First writer wins per external IP.
    fn fold(mut self, mapping: IpMapping) -> Self {
        let existing = self
            .mappings
            .iter()
            .find(|m| m.external == mapping.external)
            .map(|m| m.local);
        match existing {
            Some(local) => {
                log::info!(
                    "external ip already resolved, ignore duplicate external={} local={local} ignore={}",
                    mapping.external,
                    mapping.local
                );
            }
            None => self.mappings.push(mapping),
        }
        self
    }

    /// Maps every local IP that got nothing to itself.
    fn complete(mut self, local_ips: &[IpAddr]) -> Self {
        for local in local_ips {
            if self.contains_local(local) {
                continue;
            }
            if self.contains_external(local) {
                log::info!("local ip {local} is already an external ip, skip self mapping");
                continue;
            }
            self.mappings.push(IpMapping::new(*local, *local));
        }
        self
    }
}

impl fmt::Display for NatMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.to_strings().join(", "))
    }
}

/// Collector state: wait long for the first answer, then briefly for stragglers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CollectState {
    Waiting { deadline: Instant },
    Collecting { deadline: Instant },
    Done,
}

impl CollectState {
    pub(crate) fn start(now: Instant, first_response_timeout: Duration) -> Self {
        CollectState::Waiting {
            deadline: now + first_response_timeout,
        }
    }
    pub(crate) fn deadline(&self) -> Option<Instant> {
        match self {
            CollectState::Waiting { deadline } | CollectState::Collecting { deadline } => {
                Some(*deadline)
            }
            CollectState::Done => None,
        }
    }
    pub(crate) fn on_result(self, now: Instant, grace_period: Duration) -> Self {
        match self {
            CollectState::Waiting { .. } => CollectState::Collecting {
                deadline: now + grace_period,
            },
            state => state,
        }
    }
    /// Deadline fired or every probe finished.
    pub(crate) fn finish(self) -> Self {
        CollectState::Done
    }
}

pub struct NatResolver {
    prober: Arc<dyn StunProber>,
    stun_servers: Arc<[String]>,
    udp_ports: Arc<[u16]>,
    first_response_timeout: Duration,
    grace_period: Duration,
}

impl NatResolver {
    pub fn new(prober: Arc<dyn StunProber>, stun_servers: Vec<String>, udp_ports: Vec<u16>) -> Self {
        let udp_ports = if udp_ports.is_empty() {
            vec![0]
        } else {
            udp_ports
        };
        Self {
            prober,
            stun_servers: stun_servers.into(),
            udp_ports: udp_ports.into(),
            first_response_timeout: DEFAULT_FIRST_RESPONSE_TIMEOUT,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }
    pub fn set_first_response_timeout(mut self, first_response_timeout: Duration) -> Self {
        self.first_response_timeout = first_response_timeout;
        self
    }
    pub fn set_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }
    pub fn udp_ports(&self) -> &[u16] {
        &self.udp_ports
    }

    /// Returns `None` when no local IP passes the filter: there is nothing to map and
    /// the caller should fall back to its own external IP.
    pub async fn resolve(&self, local_ips: &[IpAddr], ip_filter: Option<&IpFilter>) -> Option<NatMapping> {
        let mut inputs: Vec<IpAddr> = Vec::with_capacity(local_ips.len());
        for ip in local_ips {
            if !inputs.contains(ip) {
                inputs.push(*ip);
            }
        }
        // only IPs passing the filter are probed, every input IP ends up mapped
        let candidates: Vec<IpAddr> = inputs
            .iter()
            .filter(|ip| ip_filter.map_or(true, |filter| filter.allows(ip)))
            .copied()
            .collect();
        if candidates.is_empty() {
            return None;
        }

        let (sender, mut receiver) = mpsc::channel::<IpMapping>(candidates.len());
        let cancel = CancellationToken::new();
        let mut join_set = JoinSet::new();
        for local_ip in &candidates {
            join_set.spawn(probe_task(
                self.prober.clone(),
                self.stun_servers.clone(),
                self.udp_ports.clone(),
                *local_ip,
                sender.clone(),
                cancel.clone(),
            ));
        }
        drop(sender);

        let mut mapping = NatMapping::default();
        let mut state = CollectState::start(Instant::now(), self.first_response_timeout);
        while let Some(deadline) = state.deadline() {
            tokio::select! {
                rs = receiver.recv() => {
                    match rs {
                        Some(ip_mapping) => {
                            state = state.on_result(Instant::now(), self.grace_period);
                            mapping = mapping.fold(ip_mapping);
                        }
                        // every probe finished, no need to sit out the deadline
                        None => state = state.finish(),
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    state = state.finish();
                }
            }
        }
        cancel.cancel();
        // anything that arrives from here on is discarded
        receiver.close();
        while let Some(rs) = join_set.join_next().await {
            if let Err(e) = rs {
                log::warn!("nat probe task {e:?}");
            }
        }

        Some(mapping.complete(&inputs))
    }
}

async fn probe_task(
    prober: Arc<dyn StunProber>,
    stun_servers: Arc<[String]>,
    udp_ports: Arc<[u16]>,
    local_ip: IpAddr,
    sender: mpsc::Sender<IpMapping>,
    cancel: CancellationToken,
) {
    tokio::select! {
        rs = probe_ports(prober.as_ref(), &stun_servers, &udp_ports, local_ip) => {
            match rs {
                Ok(external) => {
                    if sender.send(IpMapping::new(external, local_ip)).await.is_err() {
                        log::debug!("external ip {external} for {local_ip} resolved after deadline");
                    }
                }
                Err(e) => {
                    log::info!("failed to get external ip, local={local_ip} {e}");
                }
            }
        }
        _ = cancel.cancelled() => {
            log::debug!("nat probe cancelled, local={local_ip}");
        }
    }
}

async fn probe_ports(
    prober: &dyn StunProber,
    stun_servers: &[String],
    udp_ports: &[u16],
    local_ip: IpAddr,
) -> Result<IpAddr> {
    let mut last = SocketAddr::new(local_ip, 0);
    for port in udp_ports {
        let local = SocketAddr::new(local_ip, *port);
        match prober.probe(local, stun_servers).await {
            Ok(external) => return Ok(external),
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                log::debug!("{}", Error::PortContention(local));
                last = local;
            }
            Err(source) => {
                return Err(Error::Resolution {
                    local: local_ip,
                    source,
                })
            }
        }
    }
    Err(Error::PortContention(last))
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::io;
    use std::net::{IpAddr, SocketAddr};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::time::Instant;

    use crate::error::Error;
    use crate::filter::IpFilter;
    use crate::nat::{probe_ports, CollectState, IpMapping, NatResolver, UdpPortPolicy, PORT_RANGE_SAMPLES};
    use crate::stun::StunProber;

    type Reply = (Duration, io::Result<IpAddr>);

    struct FakeProber<F> {
        reply: F,
        calls: Mutex<Vec<SocketAddr>>,
    }

    impl<F: Fn(SocketAddr) -> Reply + Send + Sync> FakeProber<F> {
        fn new(reply: F) -> Arc<Self> {
            Arc::new(Self {
                reply,
                calls: Mutex::new(Vec::new()),
            })
        }
        fn calls(&self) -> Vec<SocketAddr> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl<F: Fn(SocketAddr) -> Reply + Send + Sync> StunProber for FakeProber<F> {
        async fn probe(&self, local: SocketAddr, _stun_servers: &[String]) -> io::Result<IpAddr> {
            self.calls.lock().unwrap().push(local);
            let (delay, rs) = (self.reply)(local);
            tokio::time::sleep(delay).await;
            rs
        }
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }
    fn never() -> Reply {
        (Duration::from_secs(3600), Err(io::Error::other("unreachable")))
    }
    fn stun_servers() -> Vec<String> {
        vec!["stun1:3478".to_string()]
    }

    #[tokio::test(start_paused = true)]
    async fn fast_answer_shortens_deadline() {
        let prober = FakeProber::new(|local: SocketAddr| {
            if local.ip() == ip("10.0.0.1") {
                (Duration::from_millis(200), Ok(ip("203.0.113.5")))
            } else {
                never()
            }
        });
        let resolver = NatResolver::new(prober, stun_servers(), vec![0]);
        let start = Instant::now();
        let mapping = resolver
            .resolve(&[ip("10.0.0.1"), ip("10.0.0.2")], None)
            .await
            .unwrap();
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(1200), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(1300), "{elapsed:?}");
        assert_eq!(
            mapping.to_strings(),
            vec!["203.0.113.5/10.0.0.1", "10.0.0.2/10.0.0.2"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn no_answer_waits_full_timeout() {
        let prober = FakeProber::new(|_: SocketAddr| never());
        let resolver = NatResolver::new(prober, stun_servers(), vec![0]);
        let start = Instant::now();
        let mapping = resolver
            .resolve(&[ip("10.0.0.1"), ip("10.0.0.2")], None)
            .await
            .unwrap();
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(5), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(5100), "{elapsed:?}");
        assert!(mapping.iter().all(IpMapping::is_identity));
        assert_eq!(mapping.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn all_failures_self_map() {
        let prober = FakeProber::new(|_: SocketAddr| (Duration::ZERO, Err(io::Error::other("stun down"))));
        let resolver = NatResolver::new(prober, stun_servers(), vec![0]);
        let locals = [ip("10.0.0.1"), ip("192.168.1.4"), ip("fd00::7")];
        let mapping = resolver.resolve(&locals, None).await.unwrap();
        assert_eq!(
            mapping.to_strings(),
            vec!["10.0.0.1/10.0.0.1", "192.168.1.4/192.168.1.4", "fd00::7/fd00::7"]
        );
    }

    #[tokio::test]
    async fn empty_input_has_no_policy() {
        let prober = FakeProber::new(|_: SocketAddr| never());
        let resolver = NatResolver::new(prober.clone(), stun_servers(), vec![0]);
        assert_eq!(resolver.resolve(&[], None).await, None);
        let filter = IpFilter::new(&["172.16.0.0/12"], &[]).unwrap();
        assert_eq!(resolver.resolve(&[ip("10.0.0.1")], Some(&filter)).await, None);
        assert!(prober.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_external_first_wins() {
        let prober = FakeProber::new(|local: SocketAddr| match local.ip().to_string().as_str() {
            "10.0.0.1" => (Duration::from_millis(100), Ok(ip("198.51.100.1"))),
            "10.0.0.2" => (Duration::from_millis(300), Ok(ip("198.51.100.1"))),
            _ => (Duration::from_millis(200), Ok(ip("198.51.100.2"))),
        });
        let resolver = NatResolver::new(prober, stun_servers(), vec![0]);
        let locals = [ip("10.0.0.1"), ip("10.0.0.2"), ip("10.0.0.3")];
        let mapping = resolver.resolve(&locals, None).await.unwrap();
        assert_eq!(
            mapping.to_strings(),
            vec![
                "198.51.100.1/10.0.0.1",
                "198.51.100.2/10.0.0.3",
                "10.0.0.2/10.0.0.2"
            ]
        );
        let externals: HashSet<IpAddr> = mapping.iter().map(|m| m.external).collect();
        assert_eq!(externals.len(), mapping.len());
        for local in locals {
            assert_eq!(mapping.iter().filter(|m| m.local == local).count(), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn port_contention_tries_next_port() {
        let prober = FakeProber::new(|local: SocketAddr| {
            if local.port() == 7003 {
                (Duration::ZERO, Ok(ip("203.0.113.9")))
            } else {
                (
                    Duration::ZERO,
                    Err(io::Error::from(io::ErrorKind::AddrInUse)),
                )
            }
        });
        let resolver = NatResolver::new(prober.clone(), stun_servers(), vec![7001, 7002, 7003, 7004]);
        let mapping = resolver.resolve(&[ip("10.0.0.1")], None).await.unwrap();
        assert_eq!(mapping.external_for(&ip("10.0.0.1")), Some(ip("203.0.113.9")));
        let ports: Vec<u16> = prober.calls().iter().map(|a| a.port()).collect();
        assert_eq!(ports, vec![7001, 7002, 7003]);
    }

    #[tokio::test(start_paused = true)]
    async fn all_ports_contended() {
        let prober = FakeProber::new(|_: SocketAddr| {
            (
                Duration::ZERO,
                Err(io::Error::from(io::ErrorKind::AddrInUse)),
            )
        });
        let rs = probe_ports(prober.as_ref(), &stun_servers(), &[7001, 7002], ip("10.0.0.1")).await;
        assert!(matches!(rs, Err(Error::PortContention(addr)) if addr.port() == 7002));

        let resolver = NatResolver::new(prober.clone(), stun_servers(), vec![7001, 7002]);
        let mapping = resolver.resolve(&[ip("10.0.0.1")], None).await.unwrap();
        assert_eq!(mapping.to_strings(), vec!["10.0.0.1/10.0.0.1"]);
        assert_eq!(prober.calls().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn other_failure_aborts_local_ip() {
        let prober = FakeProber::new(|_: SocketAddr| {
            (
                Duration::ZERO,
                Err(io::Error::from(io::ErrorKind::ConnectionRefused)),
            )
        });
        let resolver = NatResolver::new(prober.clone(), stun_servers(), vec![7001, 7002]);
        let mapping = resolver.resolve(&[ip("10.0.0.1")], None).await.unwrap();
        assert_eq!(mapping.to_strings(), vec!["10.0.0.1/10.0.0.1"]);
        assert_eq!(prober.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn filter_and_duplicates_reduce_candidates() {
        let prober = FakeProber::new(|_: SocketAddr| (Duration::ZERO, Err(io::Error::other("down"))));
        let resolver = NatResolver::new(prober.clone(), stun_servers(), vec![0]);
        let filter = IpFilter::new(&[], &["192.168.0.0/16"]).unwrap();
        let locals = [ip("10.0.0.1"), ip("192.168.1.1"), ip("10.0.0.1")];
        let mapping = resolver.resolve(&locals, Some(&filter)).await.unwrap();
        assert_eq!(mapping.to_strings(), vec!["10.0.0.1/10.0.0.1", "192.168.1.1/192.168.1.1"]);
        assert_eq!(prober.calls(), vec![SocketAddr::new(ip("10.0.0.1"), 0)]);
    }

    #[tokio::test(start_paused = true)]
    async fn filtered_local_ip_is_self_mapped() {
        let prober = FakeProber::new(|local: SocketAddr| {
            if local.ip() == ip("10.0.0.1") {
                (Duration::from_millis(100), Ok(ip("203.0.113.5")))
            } else {
                (Duration::ZERO, Err(io::Error::other("down")))
            }
        });
        let resolver = NatResolver::new(prober.clone(), stun_servers(), vec![0]);
        let filter = IpFilter::new(&[], &["192.168.0.0/16"]).unwrap();
        let locals = [ip("10.0.0.1"), ip("192.168.1.9")];
        let mapping = resolver.resolve(&locals, Some(&filter)).await.unwrap();
        assert_eq!(
            mapping.to_strings(),
            vec!["203.0.113.5/10.0.0.1", "192.168.1.9/192.168.1.9"]
        );
        let values: HashSet<IpAddr> = mapping.iter().map(|m| m.local).collect();
        assert_eq!(values.len(), locals.len());
        assert_eq!(prober.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn local_ip_used_as_external_is_not_self_mapped() {
        let prober = FakeProber::new(|local: SocketAddr| {
            if local.ip() == ip("10.0.0.1") {
                (Duration::ZERO, Ok(ip("10.0.0.2")))
            } else {
                (Duration::ZERO, Err(io::Error::other("down")))
            }
        });
        let resolver = NatResolver::new(prober, stun_servers(), vec![0]);
        let mapping = resolver
            .resolve(&[ip("10.0.0.1"), ip("10.0.0.2")], None)
            .await
            .unwrap();
        assert_eq!(mapping.to_strings(), vec!["10.0.0.2/10.0.0.1"]);
    }

    #[test]
    fn port_policy() {
        assert_eq!(UdpPortPolicy::new(0, 0, 0), UdpPortPolicy::Ephemeral);
        assert_eq!(UdpPortPolicy::new(0, 0, 7882), UdpPortPolicy::Fixed(7882));
        assert_eq!(
            UdpPortPolicy::new(50000, 60000, 7882),
            UdpPortPolicy::Range {
                start: 50000,
                end: 60000
            }
        );
        assert_eq!(UdpPortPolicy::Ephemeral.candidate_ports(), vec![0]);
        assert_eq!(UdpPortPolicy::Fixed(7882).candidate_ports(), vec![7882]);
        let ports = UdpPortPolicy::new(50000, 50010, 0).candidate_ports();
        assert_eq!(ports.len(), PORT_RANGE_SAMPLES);
        assert!(ports.iter().all(|p| (50000..=50010).contains(p)));
        assert_eq!(
            UdpPortPolicy::new(9000, 9000, 0).candidate_ports(),
            vec![9000; PORT_RANGE_SAMPLES]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn collect_state_transitions() {
        let now = Instant::now();
        let state = CollectState::start(now, Duration::from_secs(5));
        assert_eq!(state.deadline(), Some(now + Duration::from_secs(5)));
        let later = now + Duration::from_millis(200);
        let state = state.on_result(later, Duration::from_secs(1));
        assert_eq!(state.deadline(), Some(later + Duration::from_secs(1)));
        let state = state.on_result(later + Duration::from_millis(500), Duration::from_secs(1));
        assert_eq!(state.deadline(), Some(later + Duration::from_secs(1)));
        assert_eq!(state.finish(), CollectState::Done);
        assert_eq!(CollectState::Done.deadline(), None);
    }
}
