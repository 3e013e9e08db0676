//! Discovery of the addresses that identify the monitored host.

use crate::error::{Error, Result};
use get_if_addrs::{get_if_addrs, IfAddr, Interface};
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

const PUBLIC_IP_URL: &str = "https://api.ipify.org?format=json";
const PUBLIC_IP_TIMEOUT: Duration = Duration::from_secs(5);

/// Primary address plus every interface address of this host.
pub struct HostAddresses {
    /// Address used by the inbound-only detection rule.
    pub primary:   IpAddr,
    /// Name of the interface `primary` belongs to, if one was found.
    pub interface: Option<String>,
    pub all:       Vec<IpAddr>,
}

impl HostAddresses {
    /// One-line summary for the start-up log.
    pub fn describe(&self) -> String {
        match &self.interface {
            Some(name) => format!("Primary address {} on {}", self.primary, name),
            None       => format!("Primary address {} (no matching interface)", self.primary),
        }
    }
}

/// Picks the first non-loopback, non-link-local IPv4 address, restricted to
/// `wanted` when an interface was named on the command line.
///
/// Falls back to `0.0.0.0` when nothing usable is found; the agent still
/// runs, but inbound-only detection is disabled.
pub fn discover(wanted: Option<&str>) -> Result<HostAddresses> {
    let ifaces = get_if_addrs()?;

    if let Some(name) = wanted {
        if !ifaces.iter().any(|i| i.name == name) {
            return Err(Error::InterfaceNotFound(name.to_string()));
        }
    }

    let (primary, interface) = select_primary(&ifaces, wanted)
        .map(|(ip, name)| (IpAddr::V4(ip), Some(name)))
        .unwrap_or((IpAddr::V4(Ipv4Addr::UNSPECIFIED), None));

    Ok(HostAddresses {
        primary,
        interface,
        all: ifaces.iter().map(|i| i.ip()).collect(),
    })
}

fn select_primary(ifaces: &[Interface], wanted: Option<&str>) -> Option<(Ipv4Addr, String)> {
    ifaces.iter().find_map(|iface| {
        if let Some(name) = wanted {
            if iface.name != name {
                return None;
            }
        }
        match &iface.addr {
            IfAddr::V4(v4) if !v4.ip.is_loopback() && !v4.ip.is_link_local() => {
                Some((v4.ip, iface.name.clone()))
            }
            _ => None,
        }
    })
}

#[derive(Deserialize)]
struct PublicIp {
    ip: IpAddr,
}

/// Asks a public echo service for this host's external address.
pub fn public_ip() -> Result<IpAddr> {
    let resp: PublicIp = reqwest::blocking::Client::builder()
        .timeout(PUBLIC_IP_TIMEOUT)
        .build()?
        .get(PUBLIC_IP_URL)
        .send()?
        .error_for_status()?
        .json()?;
    Ok(resp.ip)
}

/// Host name from the environment or `/etc/hostname`.
pub fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Prints every interface and its addresses for `--list`.
pub fn print_interfaces() -> Result<()> {
    let ifaces = get_if_addrs()?;
    println!("\nAvailable interfaces:");
    println!("{:<16} {:<40}", "Interface", "Address");
    println!("{}", "-".repeat(56));
    for iface in &ifaces {
        println!("{:<16} {:<40}", iface.name, iface.ip());
    }
    println!();
    Ok(())
}
