//! Name Resolution Policy Table overrides (Windows).
//!
//! Adapter settings are read from the Tcpip interface store; overrides are
//! NRPT rules under `Dnscache\Parameters\DnsPolicyConfig`, one registry key
//! per rule, each tagged with a `Comment` marker so teardown can find them
//! without remembering key names.

use std::net::IpAddr;

use uuid::Uuid;

use crate::backend::DnsBackend;
use crate::config::ChangeRequest;
use crate::error::{DnsChangeError, Result};
use crate::exec::{CommandRunner, run_checked};
use crate::interface::adapter_for_gateway;
use crate::model::{
    DiscoveryReport, InstallReport, InterfaceConfig, RemoveReport, ResolvedInterface,
};
use crate::names::OverrideNameSet;
use crate::network::NetworkIdentity;
use crate::registry::{self, RegValue, Registry};

/// Adapter store below `HKEY_LOCAL_MACHINE`.
pub const INTERFACES_KEY: &str = r"SYSTEM\CurrentControlSet\Services\Tcpip\Parameters\Interfaces";

/// NRPT rule store below `HKEY_LOCAL_MACHINE`.
pub const POLICY_KEY: &str =
    r"SYSTEM\CurrentControlSet\Services\Dnscache\Parameters\DnsPolicyConfig";

/// `Comment` value identifying rules created by this crate.
pub const DEFAULT_MARKER: &str = "dnschange split DNS";

const DISPLAY_NAME: &str = "dnschange";
const FORWARD_DISPLAY_NAME: &str = "dnschange api forward";

/// `ConfigOptions` flag for "generic DNS servers".
const CONFIG_OPTIONS_GENERIC_DNS: u32 = 0x8;
const RULE_VERSION: u32 = 2;

/// One NRPT rule as read back from the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyRule {
    /// Registry subkey name (`{GUID}`).
    pub key: String,
    pub comment: String,
    pub display_name: String,
    /// `GenericDNSServers`, split on `;`.
    pub servers: Vec<String>,
}

/// NRPT backend over an injectable [`Registry`].
///
/// # Example
///
/// ```
/// use dnschange::{MemoryRegistry, NrptBackend, SystemRunner};
///
/// let backend = NrptBackend::new(MemoryRegistry::new(), SystemRunner::new())
///     .with_marker("Example ZTN");
/// assert_eq!(backend.marker(), "Example ZTN");
/// ```
pub struct NrptBackend<G, R> {
    registry: G,
    runner: R,
    marker: String,
    config: InterfaceConfig,
}

impl<G: Registry, R: CommandRunner> NrptBackend<G, R> {
    #[must_use]
    pub fn new(registry: G, runner: R) -> Self {
        Self {
            registry,
            runner,
            marker: DEFAULT_MARKER.to_string(),
            config: InterfaceConfig::default(),
        }
    }

    /// Overrides the `Comment` marker written to and matched on rules.
    #[must_use]
    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.marker = marker.into();
        self
    }

    #[must_use]
    pub fn marker(&self) -> &str {
        &self.marker
    }

    #[must_use]
    pub const fn registry(&self) -> &G {
        &self.registry
    }

    /// Reads every adapter in the interface store.
    ///
    /// Adapters without an `EnableDHCP` value are not configured for IP and
    /// are skipped. Missing fields on the remaining adapters are logged.
    ///
    /// # Errors
    ///
    /// [`DnsChangeError::Registry`] if the interface store cannot be listed.
    pub fn interfaces(&self) -> Result<Vec<InterfaceConfig>> {
        let guids = self
            .registry
            .subkeys(INTERFACES_KEY)
            .map_err(|source| DnsChangeError::Registry {
                path: INTERFACES_KEY.to_string(),
                source,
            })?;

        let mut adapters = Vec::new();
        for guid in guids {
            let mut issues = DiscoveryReport::default();
            if let Some(adapter) = read_adapter(&self.registry, &guid, &mut issues) {
                adapters.push(adapter);
            }
        }
        Ok(adapters)
    }

    /// Reads all rules in the policy store. A missing store yields no rules.
    ///
    /// # Errors
    ///
    /// [`DnsChangeError::Registry`] if the store exists but cannot be listed.
    pub fn rules(&self) -> Result<Vec<PolicyRule>> {
        let keys = match self.registry.subkeys(POLICY_KEY) {
            Ok(keys) => keys,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(DnsChangeError::Registry {
                    path: POLICY_KEY.to_string(),
                    source,
                });
            }
        };

        let mut rules = Vec::new();
        for key in keys {
            let path = registry::join(POLICY_KEY, &key);
            let read = |name: &str| match self.registry.value(&path, name) {
                Ok(value) => value,
                Err(e) => {
                    tracing::debug!(rule = %key, value = name, error = %e, "Unreadable NRPT rule value");
                    None
                }
            };
            let string = |name: &str| {
                read(name)
                    .and_then(|v| v.as_string().map(str::to_string))
                    .unwrap_or_default()
            };
            let servers = string("GenericDNSServers")
                .split(';')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            rules.push(PolicyRule {
                comment: string("Comment"),
                display_name: string("DisplayName"),
                servers,
                key,
            });
        }
        Ok(rules)
    }

    fn write_rule(&self, servers: &str, names: &[String], display_name: &str) -> std::io::Result<String> {
        let key = format!("{{{}}}", Uuid::new_v4().to_string().to_uppercase());
        let path = registry::join(POLICY_KEY, &key);
        self.registry.create_key(&path)?;

        // Comment goes first so a rule whose rollback also fails still
        // carries the marker; teardown selects marked rules without servers.
        let values = [
            ("Comment", RegValue::String(self.marker.clone())),
            ("DisplayName", RegValue::String(display_name.to_string())),
            ("GenericDNSServers", RegValue::String(servers.to_string())),
            ("IPSECCARestriction", RegValue::String(String::new())),
            ("Name", RegValue::MultiString(names.to_vec())),
            ("ConfigOptions", RegValue::Dword(CONFIG_OPTIONS_GENERIC_DNS)),
            ("Version", RegValue::Dword(RULE_VERSION)),
        ];
        for (name, value) in &values {
            if let Err(e) = self.registry.set_value(&path, name, value) {
                if let Err(cleanup) = self.registry.delete_key(&path) {
                    tracing::warn!(rule = %key, error = %cleanup, "Failed to discard partial NRPT rule");
                }
                return Err(e);
            }
        }
        Ok(key)
    }

    fn flush_resolver_cache(&self) {
        if let Err(e) = run_checked(&self.runner, "ipconfig", &["/flushdns"]) {
            tracing::warn!(error = %e, "Failed to flush DNS resolver cache");
        }
    }
}

impl<G: Registry, R: CommandRunner> DnsBackend for NrptBackend<G, R> {
    type Config = InterfaceConfig;

    fn resolve_interface(&mut self, identity: &NetworkIdentity) -> Result<ResolvedInterface> {
        let adapters = self.interfaces()?;
        let adapter = adapter_for_gateway(&adapters, identity.gateway)?;
        tracing::debug!(gateway = %identity.gateway, adapter = %adapter.name, "Resolved adapter");
        Ok(ResolvedInterface {
            device: identity.device.clone(),
            handle: adapter.name.clone(),
        })
    }

    fn discover(&mut self, iface: &ResolvedInterface) -> Result<DiscoveryReport> {
        let mut report = DiscoveryReport::default();
        let config = read_adapter(&self.registry, &iface.handle, &mut report).ok_or_else(|| {
            DnsChangeError::InterfaceNotFound {
                interface: iface.handle.clone(),
            }
        })?;
        tracing::info!(
            adapter = %config.name,
            dhcp = config.dhcp_enabled,
            dns_servers = ?config.dns_servers,
            domain = %config.domain,
            "Discovered DNS configuration"
        );
        self.config = config;
        Ok(report)
    }

    fn config(&self) -> &InterfaceConfig {
        &self.config
    }

    fn current_name_servers(&self) -> Vec<String> {
        self.config.dns_servers.iter().map(ToString::to_string).collect()
    }

    fn current_search_domains(&self) -> Vec<String> {
        if self.config.domain.is_empty() {
            Vec::new()
        } else {
            vec![self.config.domain.clone()]
        }
    }

    fn install_overrides(
        &mut self,
        request: &ChangeRequest,
        names: &OverrideNameSet,
    ) -> Result<InstallReport> {
        let mut report = InstallReport::default();

        let rule_names = policy_names(names, &request.internal);
        if rule_names.is_empty() {
            tracing::debug!(dns = %request.dns, "No names to redirect");
        } else {
            match self.write_rule(&request.dns.to_string(), &rule_names, DISPLAY_NAME) {
                Ok(key) => {
                    tracing::info!(rule = %key, dns = %request.dns, names = ?rule_names, "Added NRPT rule");
                    report.installed.extend(rule_names);
                }
                Err(source) => {
                    tracing::warn!(dns = %request.dns, error = %source, "Failed to add NRPT rule");
                    report.failed.push(DnsChangeError::ArtifactWriteFailed {
                        name: rule_names.join(","),
                        source,
                    });
                }
            }
        }

        // Keep the controlling service reachable through the servers it was
        // reachable through before the redirect.
        if let Some(api) = request.api_host() {
            let original = self.current_name_servers();
            if original.is_empty() {
                tracing::warn!(api = %api, "No original DNS servers known, api endpoint not forwarded");
            } else {
                let servers = original.join(";");
                match self.write_rule(&servers, &[api.to_string()], FORWARD_DISPLAY_NAME) {
                    Ok(key) => {
                        tracing::info!(rule = %key, api = %api, servers = %servers, "Added NRPT forward rule");
                        report.installed.push(api.to_string());
                    }
                    Err(source) => {
                        tracing::warn!(api = %api, error = %source, "Failed to add NRPT forward rule");
                        report.failed.push(DnsChangeError::ArtifactWriteFailed {
                            name: api.to_string(),
                            source,
                        });
                    }
                }
            }
        }

        self.flush_resolver_cache();
        Ok(report)
    }

    fn remove_overrides(
        &mut self,
        dns: IpAddr,
        _original: Option<&InterfaceConfig>,
    ) -> Result<RemoveReport> {
        let rules = self.rules()?;
        let mut report = RemoveReport::default();

        for rule in rules_to_remove(&rules, &self.marker, dns) {
            let path = registry::join(POLICY_KEY, &rule.key);
            match self.registry.delete_key(&path) {
                Ok(()) => {
                    tracing::info!(rule = %rule.key, "Removed NRPT rule");
                    report.removed.push(rule.key.clone());
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::debug!(rule = %rule.key, "NRPT rule already gone");
                }
                Err(source) => {
                    tracing::warn!(rule = %rule.key, error = %source, "Failed to remove NRPT rule");
                    report.failed.push(DnsChangeError::ArtifactRemoveFailed {
                        name: rule.key.clone(),
                        source,
                    });
                }
            }
        }

        if report.removed.is_empty() && report.failed.is_empty() {
            tracing::debug!(dns = %dns, "No NRPT rules to remove");
        } else {
            self.flush_resolver_cache();
        }
        Ok(report)
    }
}

/// Expands the override set into NRPT `Name` entries.
///
/// Zones (and the internal zone) are listed both bare and with a leading dot
/// so the rule covers the zone apex and everything below it. Hosts are
/// listed as-is.
#[must_use]
pub fn policy_names(names: &OverrideNameSet, internal: &str) -> Vec<String> {
    let internal = internal.trim().trim_end_matches('.');
    let zones = names
        .zones()
        .iter()
        .map(String::as_str)
        .chain((!internal.is_empty()).then_some(internal));

    let mut out: Vec<String> = Vec::new();
    for zone in zones {
        for name in [zone.to_string(), format!(".{zone}")] {
            if !out.contains(&name) {
                out.push(name);
            }
        }
    }
    for host in names.hosts() {
        if !out.contains(host) {
            out.push(host.clone());
        }
    }
    out
}

/// Selects the rules teardown deletes: ours by marker, and either pointing
/// at `dns`, one of our api forwarding rules, or left without a usable
/// server list by an interrupted write.
#[must_use]
pub fn rules_to_remove<'a>(rules: &'a [PolicyRule], marker: &str, dns: IpAddr) -> Vec<&'a PolicyRule> {
    rules
        .iter()
        .filter(|r| r.comment == marker)
        .filter(|r| {
            let servers: Vec<IpAddr> = r.servers.iter().filter_map(|s| s.parse().ok()).collect();
            r.display_name == FORWARD_DISPLAY_NAME || servers.is_empty() || servers.contains(&dns)
        })
        .collect()
}

/// Reads one adapter subkey.
///
/// DHCP adapters report `Dhcp`-prefixed values; static ones the plain names.
/// `NameServer` wins when set, otherwise a DHCP adapter falls back to
/// `DhcpNameServer`. Returns `None` when the adapter has no `EnableDHCP`.
fn read_adapter<G: Registry>(
    registry: &G,
    guid: &str,
    report: &mut DiscoveryReport,
) -> Option<InterfaceConfig> {
    let path = registry::join(INTERFACES_KEY, guid);
    let read = |name: &str, report: &mut DiscoveryReport| match registry.value(&path, name) {
        Ok(Some(value)) => Some(value),
        Ok(None) => {
            report.push(DnsChangeError::missing(name, path.clone()));
            None
        }
        Err(source) => {
            report.push(DnsChangeError::Registry {
                path: path.clone(),
                source,
            });
            None
        }
    };

    let dhcp = match registry.value(&path, "EnableDHCP") {
        Ok(Some(value)) => value.as_dword()? == 1,
        Ok(None) | Err(_) => {
            tracing::debug!(adapter = %guid, "Skipping adapter without EnableDHCP");
            return None;
        }
    };
    let key = |name: &str| {
        if dhcp {
            format!("Dhcp{name}")
        } else {
            name.to_string()
        }
    };

    let mut config = InterfaceConfig {
        name: guid.to_string(),
        description: guid.to_string(),
        dhcp_enabled: dhcp,
        ..InterfaceConfig::default()
    };

    if let Some(value) = read(&key("DefaultGateway"), &mut *report) {
        config.default_gateways = parse_ips(&value.strings());
    }
    if let Some(value) = read(&key("Domain"), &mut *report) {
        config.domain = value.as_string().unwrap_or_default().trim().to_string();
    }
    if let Some(value) = read(&key("IPAddress"), &mut *report) {
        config.ip_address = value.as_string().and_then(|s| s.trim().parse().ok());
    }
    if let Some(value) = read(&key("SubnetMask"), &mut *report) {
        config.mask = value.as_string().and_then(|s| s.trim().parse().ok());
    }

    let static_servers = registry
        .value(&path, "NameServer")
        .ok()
        .flatten()
        .and_then(|v| v.as_string().map(str::to_string))
        .filter(|s| !s.trim().is_empty());
    let servers = match static_servers {
        Some(servers) => Some(servers),
        None if dhcp => read("DhcpNameServer", &mut *report).and_then(|v| v.as_string().map(str::to_string)),
        None => {
            report.push(DnsChangeError::missing("NameServer", path.clone()));
            None
        }
    };
    if let Some(servers) = servers {
        config.dns_servers = parse_ips(&[servers]);
    }

    Some(config)
}

/// Parses server lists separated by commas or whitespace, skipping
/// anything that is not an address.
fn parse_ips(values: &[String]) -> Vec<IpAddr> {
    values
        .iter()
        .flat_map(|v| v.split(|c: char| c == ',' || c.is_whitespace()))
        .filter_map(|s| s.trim().parse().ok())
        .collect()
}
