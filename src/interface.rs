//! Mapping kernel device names to the handles OS tools address them by.
//!
//! `networksetup` wants a network service name, the registry a GUID
//! subkey, and `resolv.conf` management only a device known to the kernel.

use std::net::IpAddr;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{DnsChangeError, Result};
use crate::model::InterfaceConfig;

/// `(Hardware Port: Wi-Fi, Device: en0)`
static HARDWARE_PORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\(Hardware Port:\s+(.*),\s+Device:\s+(.*)\)").expect("valid hardware port pattern")
});

/// Finds the hardware port paired with `device` in
/// `networksetup -listnetworkserviceorder` output.
///
/// # Errors
///
/// [`DnsChangeError::InterfaceNotFound`] if no pairing names `device`.
pub fn service_for_device(output: &str, device: &str) -> Result<String> {
    output
        .lines()
        .filter(|line| line.contains("Hardware Port"))
        .filter_map(|line| HARDWARE_PORT.captures(line))
        .filter(|caps| caps[2].trim() == device)
        .map(|caps| caps[1].trim().to_string())
        .last()
        .ok_or_else(|| not_found(device))
}

/// Returns the adapter whose default gateways include `gateway`.
///
/// # Errors
///
/// [`DnsChangeError::InterfaceNotFound`] if none does.
pub fn adapter_for_gateway(adapters: &[InterfaceConfig], gateway: IpAddr) -> Result<&InterfaceConfig> {
    adapters
        .iter()
        .find(|a| a.default_gateways.contains(&gateway))
        .ok_or_else(|| not_found(&gateway.to_string()))
}

/// Confirms `device` is listed under `sys_class_net` (normally
/// `/sys/class/net`).
///
/// # Errors
///
/// [`DnsChangeError::InterfaceNotFound`] if it is not listed,
/// [`DnsChangeError::Io`] if the directory cannot be read.
pub fn sysfs_device(sys_class_net: &Path, device: &str) -> Result<String> {
    for entry in std::fs::read_dir(sys_class_net)? {
        let name = entry?.file_name();
        if name.to_str() == Some(device) {
            return Ok(device.to_string());
        }
    }
    Err(not_found(device))
}

fn not_found(interface: &str) -> DnsChangeError {
    tracing::warn!(interface = %interface, "Network interface not found");
    DnsChangeError::InterfaceNotFound {
        interface: interface.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SERVICE_ORDER: &str = "\
An asterisk (*) denotes that a network service is disabled.
(1) Wi-Fi
(Hardware Port: Wi-Fi, Device: en0)

(2) Thunderbolt Bridge
(Hardware Port: Thunderbolt Bridge, Device: bridge0)

(3) USB 10/100/1000 LAN
(Hardware Port: USB 10/100/1000 LAN, Device: en7)
";

    #[test]
    fn maps_device_to_hardware_port() {
        assert_eq!(service_for_device(SERVICE_ORDER, "en0").unwrap(), "Wi-Fi");
        assert_eq!(
            service_for_device(SERVICE_ORDER, "en7").unwrap(),
            "USB 10/100/1000 LAN"
        );
    }

    #[test]
    fn unknown_device_is_not_found() {
        assert!(matches!(
            service_for_device(SERVICE_ORDER, "en9"),
            Err(DnsChangeError::InterfaceNotFound { interface }) if interface == "en9"
        ));
        assert!(service_for_device("", "en0").is_err());
    }

    #[test]
    fn adapter_selected_by_gateway() {
        let adapters = vec![
            InterfaceConfig {
                name: "{A}".into(),
                default_gateways: vec!["192.168.1.1".parse().unwrap()],
                ..InterfaceConfig::default()
            },
            InterfaceConfig {
                name: "{B}".into(),
                default_gateways: vec!["10.0.0.1".parse().unwrap()],
                ..InterfaceConfig::default()
            },
        ];
        let found = adapter_for_gateway(&adapters, "10.0.0.1".parse().unwrap()).unwrap();
        assert_eq!(found.name, "{B}");
        assert!(adapter_for_gateway(&adapters, "10.0.0.254".parse().unwrap()).is_err());
    }

    #[test]
    fn sysfs_listing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("eth0")).unwrap();
        std::fs::create_dir(dir.path().join("lo")).unwrap();

        assert_eq!(sysfs_device(dir.path(), "eth0").unwrap(), "eth0");
        assert!(matches!(
            sysfs_device(dir.path(), "wlan0"),
            Err(DnsChangeError::InterfaceNotFound { .. })
        ));
    }
}
