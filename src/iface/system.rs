//! Interface discovery backed by the operating system

use super::{InterfaceError, InterfaceProbe, NetInterface};

/// Reads interfaces through `getifaddrs(3)` via `nix`. On Linux the default route
/// comes from `/proc/net/route`; elsewhere the resolver falls back to
/// scanning for the first usable interface.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProbe;

impl InterfaceProbe for SystemProbe {
    fn interfaces(&self) -> Result<Vec<NetInterface>, InterfaceError> {
        enumerate()
    }

    fn default_route_interface(&self) -> Result<Option<String>, InterfaceError> {
        default_route()
    }
}

#[cfg(unix)]
fn enumerate() -> Result<Vec<NetInterface>, InterfaceError> {
    use nix::net::if_::InterfaceFlags;
    use std::net::SocketAddrV4;

    let addrs = nix::ifaddrs::getifaddrs().map_err(std::io::Error::from)?;
    let mut found: Vec<NetInterface> = Vec::new();

    for addr in addrs {
        let pos = match found.iter().position(|i| i.name == addr.interface_name) {
            Some(pos) => pos,
            None => {
                found.push(NetInterface {
                    name: addr.interface_name.clone(),
                    up: addr.flags.contains(InterfaceFlags::IFF_UP),
                    loopback: addr.flags.contains(InterfaceFlags::IFF_LOOPBACK),
                    ipv4: Vec::new(),
                    mac: None,
                });
                found.len() - 1
            }
        };
        let entry = &mut found[pos];

        let Some(sockaddr) = addr.address else {
            continue;
        };
        if let Some(sin) = sockaddr.as_sockaddr_in() {
            entry.ipv4.push(*SocketAddrV4::from(*sin).ip());
        }
        #[cfg(any(
            target_os = "linux",
            target_os = "android",
            target_os = "macos",
            target_os = "ios",
            target_os = "freebsd"
        ))]
        if let Some(hw) = sockaddr.as_link_addr().and_then(|link| link.addr()) {
            if entry.mac.is_none() {
                entry.mac = format_mac(&hw);
            }
        }
    }

    Ok(found)
}

#[cfg(not(unix))]
fn enumerate() -> Result<Vec<NetInterface>, InterfaceError> {
    Err(InterfaceError::Unsupported(std::env::consts::OS))
}

#[cfg(target_os = "linux")]
fn default_route() -> Result<Option<String>, InterfaceError> {
    let table = std::fs::read_to_string("/proc/net/route")?;
    Ok(parse_route_table(&table))
}

#[cfg(not(target_os = "linux"))]
fn default_route() -> Result<Option<String>, InterfaceError> {
    Ok(None)
}

/// Pick the lowest-metric default route out of `/proc/net/route`
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_route_table(table: &str) -> Option<String> {
    const RTF_UP: u32 = 0x1;

    table
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 8 {
                return None;
            }
            let flags = u32::from_str_radix(fields[3], 16).ok()?;
            let metric: u32 = fields[6].parse().ok()?;
            let is_default = fields[1] == "00000000" && fields[7] == "00000000";
            (is_default && flags & RTF_UP != 0).then(|| (metric, fields[0].to_string()))
        })
        .min_by_key(|(metric, _)| *metric)
        .map(|(_, name)| name)
}

#[cfg_attr(not(unix), allow(dead_code))]
fn format_mac(bytes: &[u8]) -> Option<String> {
    if bytes.is_empty() || bytes.iter().all(|b| *b == 0) {
        return None;
    }
    Some(
        bytes
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect::<Vec<_>>()
            .join(":"),
    )
}
