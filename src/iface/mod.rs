//! Network interface resolution
//!
//! Turns an account's interface specifier (empty, interface name or IPv4
//! literal) into the concrete binding its requests are sent from. The OS
//! specific part (listing interfaces, finding the default route) sits
//! behind the `InterfaceProbe` trait so platform adapters can be swapped.

pub mod system;

pub use system::SystemProbe;

use crate::models::InterfaceBinding;
use std::fmt;
use std::net::Ipv4Addr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InterfaceError {
    #[error("no suitable interface found")]
    NoSuitableInterface,

    #[error("interface '{0}' not found")]
    InterfaceNotFound(String),

    #[error("no MAC address on interface '{0}'")]
    NoMacForInterface(String),

    #[error("no local interface owns address {0}")]
    AddressNotLocal(Ipv4Addr),

    #[cfg(not(unix))]
    #[error("interface discovery is not supported on {0}")]
    Unsupported(&'static str),

    #[error("failed to query network interfaces: {0}")]
    Probe(#[from] std::io::Error),
}

/// How an account pins its traffic
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterfaceSpec {
    /// Follow the OS default route, re-resolved every cycle
    Auto,
    Name(String),
    Address(Ipv4Addr),
}

impl InterfaceSpec {
    pub fn parse(spec: &str) -> Self {
        let spec = spec.trim();
        if spec.is_empty() {
            InterfaceSpec::Auto
        } else if let Ok(ip) = spec.parse::<Ipv4Addr>() {
            InterfaceSpec::Address(ip)
        } else {
            InterfaceSpec::Name(spec.to_string())
        }
    }

    pub fn is_auto(&self) -> bool {
        matches!(self, InterfaceSpec::Auto)
    }
}

impl fmt::Display for InterfaceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterfaceSpec::Auto => f.write_str("Auto"),
            InterfaceSpec::Name(name) => f.write_str(name),
            InterfaceSpec::Address(ip) => write!(f, "{ip}"),
        }
    }
}

/// One local interface as reported by the platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetInterface {
    pub name: String,
    pub up: bool,
    pub loopback: bool,
    pub ipv4: Vec<Ipv4Addr>,
    pub mac: Option<String>,
}

impl NetInterface {
    /// First address usable for portal traffic
    pub fn usable_ipv4(&self) -> Option<Ipv4Addr> {
        self.ipv4.iter().copied().find(|ip| is_usable(*ip))
    }
}

fn is_usable(ip: Ipv4Addr) -> bool {
    !ip.is_loopback() && !ip.is_link_local() && !ip.is_unspecified()
}

/// Platform adapter seam
pub trait InterfaceProbe: Send + Sync {
    /// All interfaces with their IPv4 and hardware addresses
    fn interfaces(&self) -> Result<Vec<NetInterface>, InterfaceError>;

    /// Name of the interface carrying the default IPv4 route, if the
    /// platform can tell
    fn default_route_interface(&self) -> Result<Option<String>, InterfaceError>;
}

pub struct InterfaceResolver<P> {
    probe: P,
}

impl<P: InterfaceProbe> InterfaceResolver<P> {
    pub fn new(probe: P) -> Self {
        Self { probe }
    }

    #[cfg(test)]
    pub fn probe(&self) -> &P {
        &self.probe
    }

    pub fn resolve(&self, spec: &InterfaceSpec) -> Result<InterfaceBinding, InterfaceError> {
        let interfaces = self.probe.interfaces()?;

        match spec {
            InterfaceSpec::Auto => self.resolve_default(&interfaces),
            InterfaceSpec::Name(name) => {
                let iface = interfaces
                    .iter()
                    .find(|i| &i.name == name)
                    .ok_or_else(|| InterfaceError::InterfaceNotFound(name.clone()))?;
                let ip = iface
                    .usable_ipv4()
                    .ok_or(InterfaceError::NoSuitableInterface)?;
                binding(iface, ip)
            }
            InterfaceSpec::Address(ip) => {
                let iface = interfaces
                    .iter()
                    .find(|i| i.ipv4.contains(ip))
                    .ok_or(InterfaceError::AddressNotLocal(*ip))?;
                binding(iface, *ip)
            }
        }
    }

    fn resolve_default(&self, interfaces: &[NetInterface]) -> Result<InterfaceBinding, InterfaceError> {
        if let Some(name) = self.probe.default_route_interface()? {
            match interfaces.iter().find(|i| i.name == name) {
                Some(iface) => {
                    let ip = iface
                        .usable_ipv4()
                        .ok_or(InterfaceError::NoSuitableInterface)?;
                    return binding(iface, ip);
                }
                None => {
                    tracing::debug!("Default route names unknown interface '{}', scanning", name);
                }
            }
        }

        interfaces
            .iter()
            .filter(|i| i.up && !i.loopback)
            .find_map(|i| i.usable_ipv4().map(|ip| (i, ip)))
            .ok_or(InterfaceError::NoSuitableInterface)
            .and_then(|(iface, ip)| binding(iface, ip))
    }
}

fn binding(iface: &NetInterface, ip: Ipv4Addr) -> Result<InterfaceBinding, InterfaceError> {
    let mac = iface
        .mac
        .clone()
        .ok_or_else(|| InterfaceError::NoMacForInterface(iface.name.clone()))?;

    Ok(InterfaceBinding {
        name: iface.name.clone(),
        ip,
        mac,
    })
}
