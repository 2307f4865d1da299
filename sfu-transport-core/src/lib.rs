//! # sfu-transport-core
//!
//! Building blocks for wiring the network side of an SFU media transport:
//!
//! - [`filter`] - interface name and CIDR inclusion/exclusion predicates
//! - [`nat`] - concurrent NAT 1:1 external IP discovery
//! - [`stun`] - STUN binding client used by the discovery
//! - [`socket`] - socket creation, local address enumeration, buffer checks
//! - [`mux`] - shared UDP/TCP sockets for the ICE agent
//!
//! ## NAT 1:1 discovery
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sfu_transport_core::filter::IpFilter;
//! use sfu_transport_core::nat::{NatResolver, UdpPortPolicy};
//! use sfu_transport_core::socket::local_ip_addresses;
//! use sfu_transport_core::stun::UdpStunProber;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let ip_filter = IpFilter::new(&[], &["172.17.0.0/16"])?;
//! let local_ips = local_ip_addresses(false)?;
//! let resolver = NatResolver::new(
//!     Arc::new(UdpStunProber::new()),
//!     vec!["stun.l.google.com:19302".to_string()],
//!     UdpPortPolicy::new(50000, 60000, 0).candidate_ports(),
//! );
//! match resolver.resolve(&local_ips, Some(&ip_filter)).await {
//!     Some(mapping) => println!("nat 1:1 {mapping}"),
//!     None => println!("no local ip to map"),
//! }
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod filter;
pub mod mux;
pub mod nat;
pub mod socket;
pub mod stun;
