//! Inclusion/exclusion predicates over interface names and IP addresses.
//!
//! Both filters follow the same rule: a non-empty include list is necessary
//! and sufficient, and the exclude list is ignored. With no includes, any
//! match in the exclude list disqualifies and everything else passes.

use std::net::IpAddr;

use ipnet::IpNet;

use crate::error::{Error, Result};

/// Filters local interfaces by name.
#[derive(Clone, Debug, Default)]
pub struct InterfaceFilter {
    includes: Vec<String>,
    excludes: Vec<String>,
}

impl InterfaceFilter {
    pub fn new(includes: Vec<String>, excludes: Vec<String>) -> Self {
        Self { includes, excludes }
    }
    pub fn is_empty(&self) -> bool {
        self.includes.is_empty() && self.excludes.is_empty()
    }
    pub fn allows(&self, name: &str) -> bool {
        if !self.includes.is_empty() {
            return self.includes.iter().any(|iface| iface == name);
        }
        !self.excludes.iter().any(|iface| iface == name)
    }
}

/// Filters local addresses by CIDR block.
#[derive(Clone, Debug, Default)]
pub struct IpFilter {
    includes: Vec<IpNet>,
    excludes: Vec<IpNet>,
}

impl IpFilter {
    /// Parses both lists; the first entry that is not a CIDR block fails the whole filter.
    pub fn new<S: AsRef<str>>(includes: &[S], excludes: &[S]) -> Result<Self> {
        Ok(Self {
            includes: parse_cidrs(includes)?,
            excludes: parse_cidrs(excludes)?,
        })
    }
    pub fn is_empty(&self) -> bool {
        self.includes.is_empty() && self.excludes.is_empty()
    }
    pub fn allows(&self, ip: &IpAddr) -> bool {
        if !self.includes.is_empty() {
            return self.includes.iter().any(|net| net.contains(ip));
        }
        !self.excludes.iter().any(|net| net.contains(ip))
    }
}

fn parse_cidrs<S: AsRef<str>>(cidrs: &[S]) -> Result<Vec<IpNet>> {
    cidrs
        .iter()
        .map(|cidr| {
            let cidr = cidr.as_ref();
            cidr.parse::<IpNet>().map_err(|source| Error::InvalidCidr {
                cidr: cidr.to_string(),
                source,
            })
        })
        .collect()
}
