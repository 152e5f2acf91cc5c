//! Default-route discovery.
//!
//! The session only needs to know which gateway the host routes through and
//! which device carries that route. [`NetworkLookup`] is the seam; callers
//! with their own route discovery implement it directly.

use std::net::IpAddr;

use ipnetwork::IpNetwork;

use crate::error::{DnsChangeError, Result};
use crate::exec::{CommandRunner, run_checked};

/// Default gateway and the device that reaches it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkIdentity {
    pub gateway: IpAddr,
    pub device: String,
}

/// Addresses assigned to one system interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceAddrs {
    pub name: String,
    pub networks: Vec<IpNetwork>,
}

impl InterfaceAddrs {
    #[must_use]
    pub fn new(name: impl Into<String>, networks: Vec<IpNetwork>) -> Self {
        Self {
            name: name.into(),
            networks,
        }
    }
}

/// Source of the current network identity.
pub trait NetworkLookup {
    /// Returns the default gateway and its device.
    ///
    /// # Errors
    ///
    /// [`DnsChangeError::GatewayUnavailable`] if there is no default route,
    /// [`DnsChangeError::InterfaceNotFound`] if no interface reaches it.
    fn identity(&self) -> Result<NetworkIdentity>;
}

/// Picks the interface with an address whose network contains `gateway`.
///
/// When several match, the last one listed wins.
#[must_use]
pub fn interface_for_gateway(gateway: IpAddr, interfaces: &[InterfaceAddrs]) -> Option<&InterfaceAddrs> {
    interfaces
        .iter()
        .rev()
        .find(|iface| iface.networks.iter().any(|net| net.contains(gateway)))
}

/// Lookup over a fixed gateway and interface listing.
#[derive(Debug, Clone)]
pub struct StaticLookup {
    gateway: IpAddr,
    interfaces: Vec<InterfaceAddrs>,
}

impl StaticLookup {
    #[must_use]
    pub const fn new(gateway: IpAddr, interfaces: Vec<InterfaceAddrs>) -> Self {
        Self {
            gateway,
            interfaces,
        }
    }
}

impl NetworkLookup for StaticLookup {
    fn identity(&self) -> Result<NetworkIdentity> {
        let iface = interface_for_gateway(self.gateway, &self.interfaces).ok_or_else(|| {
            DnsChangeError::InterfaceNotFound {
                interface: self.gateway.to_string(),
            }
        })?;
        Ok(NetworkIdentity {
            gateway: self.gateway,
            device: iface.name.clone(),
        })
    }
}

/// Reads the default route from the platform's routing tool.
///
/// * macOS / BSD: `route -n get default`
/// * Linux: `ip route show default`
/// * Windows: `route print -4 0.0.0.0` (the device is the interface address)
#[derive(Debug, Clone)]
pub struct RouteCommandLookup<R> {
    runner: R,
}

impl<R: CommandRunner> RouteCommandLookup<R> {
    pub const fn new(runner: R) -> Self {
        Self { runner }
    }
}

impl<R: CommandRunner> NetworkLookup for RouteCommandLookup<R> {
    fn identity(&self) -> Result<NetworkIdentity> {
        let (tool, args, parse): (&str, &[&str], fn(&str) -> Option<NetworkIdentity>) =
            if cfg!(target_os = "linux") {
                ("ip", &["route", "show", "default"], parse_ip_route)
            } else if cfg!(windows) {
                ("route", &["print", "-4", "0.0.0.0"], parse_route_print)
            } else {
                ("route", &["-n", "get", "default"], parse_route_get)
            };
        let output = run_checked(&self.runner, tool, args)?;
        let identity = parse(&output.stdout).ok_or_else(|| {
            DnsChangeError::GatewayUnavailable(format!("no default route in `{tool}` output"))
        })?;
        tracing::debug!(gateway = %identity.gateway, device = %identity.device, "Found default route");
        Ok(identity)
    }
}

/// Parses `route -n get default`:
///
/// ```text
///     gateway: 192.168.1.1
///   interface: en0
/// ```
#[must_use]
pub fn parse_route_get(output: &str) -> Option<NetworkIdentity> {
    let mut gateway = None;
    let mut device = None;
    for line in output.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        match key.trim() {
            "gateway" => gateway = value.trim().parse().ok(),
            "interface" => device = Some(value.trim().to_string()),
            _ => {}
        }
    }
    Some(NetworkIdentity {
        gateway: gateway?,
        device: device?,
    })
}

/// Parses `ip route show default`:
///
/// ```text
/// default via 10.0.0.1 dev eth0 proto dhcp metric 100
/// ```
#[must_use]
pub fn parse_ip_route(output: &str) -> Option<NetworkIdentity> {
    output.lines().find_map(|line| {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let after = |key: &str| {
            tokens
                .iter()
                .position(|t| *t == key)
                .and_then(|i| tokens.get(i + 1))
        };
        Some(NetworkIdentity {
            gateway: after("via")?.parse().ok()?,
            device: (*after("dev")?).to_string(),
        })
    })
}

/// Parses the IPv4 route table of `route print`, taking the first
/// `0.0.0.0 0.0.0.0 <gateway> <interface> <metric>` row.
#[must_use]
pub fn parse_route_print(output: &str) -> Option<NetworkIdentity> {
    output.lines().find_map(|line| {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens.as_slice() {
            ["0.0.0.0", "0.0.0.0", gateway, interface, _metric, ..] => Some(NetworkIdentity {
                gateway: gateway.parse().ok()?,
                device: (*interface).to_string(),
            }),
            _ => None,
        }
    })
}
