//! Discovered configuration records and operation reports.

use std::net::IpAddr;

use crate::error::DnsChangeError;

/// Adapter record read from the Windows interface store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfaceConfig {
    /// Registry adapter GUID (the platform handle).
    pub name: String,
    pub description: String,
    pub dhcp_enabled: bool,
    pub domain: String,
    pub ip_address: Option<IpAddr>,
    pub mask: Option<IpAddr>,
    pub default_gateways: Vec<IpAddr>,
    pub dns_servers: Vec<IpAddr>,
}

/// Resolver configuration read from tool output or `resolv.conf`.
///
/// `flags`, `reach` and `options` are kept for diagnostics only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DnsConfig {
    pub domain: String,
    /// Search domains in the order the OS reports them.
    pub search_domains: Vec<String>,
    pub name_servers: Vec<String>,
    pub if_index: String,
    /// Resolved platform handle (network service name or device).
    pub if_name: String,
    pub flags: String,
    pub reach: String,
    pub options: String,
}

/// Current name servers and search domains as seen by the platform.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DnsInfo {
    pub name_servers: Vec<String>,
    pub search_domains: Vec<String>,
}

/// Result of mapping a device or gateway to a platform handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedInterface {
    /// Kernel device name (or the identifier that was looked up).
    pub device: String,
    /// Handle the configuration tool or registry addresses it by.
    pub handle: String,
}

/// Per-field outcome of a discovery pass.
///
/// Discovery never stops at a missing value; the issues are collected here
/// so the caller can decide whether partial visibility is acceptable.
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    pub issues: Vec<DnsChangeError>,
}

impl DiscoveryReport {
    /// Returns `true` if every expected field was read.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.issues.is_empty()
    }

    pub(crate) fn push(&mut self, issue: DnsChangeError) {
        tracing::warn!(error = %issue, "DNS discovery incomplete");
        self.issues.push(issue);
    }
}

/// Outcome of installing overrides.
#[derive(Debug, Default)]
pub struct InstallReport {
    /// Names (or artifact identifiers) written successfully.
    pub installed: Vec<String>,
    /// One entry per artifact that could not be written.
    pub failed: Vec<DnsChangeError>,
}

impl InstallReport {
    /// Returns `true` if no artifact failed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Outcome of removing overrides.
#[derive(Debug, Default)]
pub struct RemoveReport {
    /// Artifacts deleted.
    pub removed: Vec<String>,
    /// Artifacts that matched but could not be deleted.
    pub failed: Vec<DnsChangeError>,
}

impl RemoveReport {
    /// Returns `true` if every matching artifact was deleted.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Outcome of [`DnsSession::change`](crate::DnsSession::change).
#[derive(Debug, Default)]
pub struct ChangeReport {
    pub interface: Option<ResolvedInterface>,
    pub discovery: DiscoveryReport,
    /// Loop-back alias failure, if any.
    pub alias_error: Option<DnsChangeError>,
    pub install: InstallReport,
}

impl ChangeReport {
    /// Returns `true` if the overrides are fully active.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.alias_error.is_none() && self.install.is_complete()
    }
}
