use std::io;
use std::net::{IpAddr, SocketAddr};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("invalid CIDR {cidr:?}: {source}")]
    InvalidCidr {
        cidr: String,
        source: ipnet::AddrParseError,
    },
    #[error("address already in use: {0}")]
    PortContention(SocketAddr),
    #[error("failed to get external ip for {local}: {source}")]
    Resolution { local: IpAddr, source: io::Error },
    #[error("no local address could be bound on port {0}")]
    NoUsableAddress(u16),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T, E = Error> = ::std::result::Result<T, E>;
