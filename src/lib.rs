//! Network transport settings for an SFU media server.
//!
//! [`build_transport_settings`] turns the `rtc` section of the server
//! configuration into everything the media engine needs: ICE servers, NAT 1:1
//! IPs (discovered over STUN when `use_external_ip` is on), UDP/TCP muxes and
//! the header extensions and RTCP feedback for each direction.
//!
//! ```rust,no_run
//! use sfu_transport::config::{Config, RtcConfig};
//!
//! # #[tokio::main]
//! # async fn main() -> sfu_transport::error::Result<()> {
//! let config = Config::new(
//!     RtcConfig::default()
//!         .set_udp_port(7882)
//!         .set_tcp_port(7881)
//!         .set_use_external_ip(true),
//! );
//! let settings = sfu_transport::build_transport_settings(&config, "203.0.113.5".parse().ok()).await?;
//! println!("nat 1:1 {:?}", settings.setting_engine.nat_1to1_ips());
//! # Ok(())
//! # }
//! ```

use std::net::IpAddr;

pub mod config;
pub mod engine;
pub mod error;
pub mod profile;
pub mod transport;

pub use sfu_transport_core::filter::{InterfaceFilter, IpFilter};
pub use sfu_transport_core::nat::{IpMapping, NatMapping};
pub use transport::{resolve_external_ips, TransportSettings};

pub async fn build_transport_settings(
    config: &config::Config,
    external_ip: Option<IpAddr>,
) -> error::Result<TransportSettings> {
    TransportSettings::build(config, external_ip).await
}
