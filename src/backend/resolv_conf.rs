//! `/etc/resolv.conf` rewrite (Linux and other Unix).
//!
//! The system resolver has no per-domain scoping here, so the override is
//! the name-server list itself: the live file is preserved as a backup and
//! replaced by a marked file pointing at the redirect resolver. Every write
//! goes through a staging file and a rename, so `resolv.conf` is never
//! missing or half written. Teardown puts the backup back, or rewrites the
//! file from the captured original when no backup survives.

use std::fs::{self, File};
use std::io::{self, Write};
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use crate::backend::DnsBackend;
use crate::config::ChangeRequest;
use crate::error::{DnsChangeError, Result};
use crate::interface::sysfs_device;
use crate::model::{DiscoveryReport, DnsConfig, InstallReport, RemoveReport, ResolvedInterface};
use crate::names::OverrideNameSet;
use crate::network::NetworkIdentity;

const DEFAULT_RESOLV_CONF: &str = "/etc/resolv.conf";
const DEFAULT_BACKUP: &str = "/etc/resolv.conf.dnschange-save";
const DEFAULT_SYS_CLASS_NET: &str = "/sys/class/net";

/// First line of every `resolv.conf` written by this backend.
pub const MANAGED_BY_MARKER: &str = "# managed by dnschange";

/// Written when there was no `resolv.conf` to preserve; teardown then
/// deletes the file instead of restoring one.
const NO_ORIGINAL_MARKER: &str = "# no original resolv.conf";

const STAGING_SUFFIX: &str = ".dnschange-tmp";

/// Rewrites the system name-server list.
///
/// # Example
///
/// ```
/// use dnschange::ResolvConfBackend;
///
/// let backend = ResolvConfBackend::with_paths(
///     "/tmp/resolv.conf",
///     "/tmp/resolv.conf.save",
///     "/sys/class/net",
/// );
/// assert_eq!(backend.resolv_conf().to_str(), Some("/tmp/resolv.conf"));
/// ```
pub struct ResolvConfBackend {
    resolv_conf: PathBuf,
    backup: PathBuf,
    sys_class_net: PathBuf,
    config: DnsConfig,
}

impl ResolvConfBackend {
    /// Targets `/etc/resolv.conf` and `/sys/class/net`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_paths(DEFAULT_RESOLV_CONF, DEFAULT_BACKUP, DEFAULT_SYS_CLASS_NET)
    }

    /// Targets custom paths (useful for testing).
    #[must_use]
    pub fn with_paths(
        resolv_conf: impl Into<PathBuf>,
        backup: impl Into<PathBuf>,
        sys_class_net: impl Into<PathBuf>,
    ) -> Self {
        Self {
            resolv_conf: resolv_conf.into(),
            backup: backup.into(),
            sys_class_net: sys_class_net.into(),
            config: DnsConfig::default(),
        }
    }

    #[must_use]
    pub fn resolv_conf(&self) -> &Path {
        &self.resolv_conf
    }

    #[must_use]
    pub fn backup(&self) -> &Path {
        &self.backup
    }

    /// Sibling file new content is written to before it is renamed over
    /// `resolv.conf`.
    #[must_use]
    pub fn staging(&self) -> PathBuf {
        let mut path = self.resolv_conf.clone().into_os_string();
        path.push(STAGING_SUFFIX);
        PathBuf::from(path)
    }

    fn read_current(&self) -> Result<Option<String>> {
        match fs::read_to_string(&self.resolv_conf) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn replace_resolv_conf(&self, content: &str) -> io::Result<()> {
        let staging = self.staging();
        let written = File::create(&staging).and_then(|mut file| {
            file.write_all(content.as_bytes())?;
            file.sync_all()
        });
        let result = written.and_then(|()| fs::rename(&staging, &self.resolv_conf));
        if result.is_err() {
            if let Err(e) = fs::remove_file(&staging) {
                tracing::debug!(path = %staging.display(), error = %e, "Staging file not removed");
            }
        }
        result
    }

    /// Preserves the live file as the backup while leaving it in place.
    fn preserve_original(&self) -> io::Result<()> {
        match fs::remove_file(&self.backup) {
            Ok(()) => tracing::debug!(backup = %self.backup.display(), "Replaced stale backup"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        if let Err(e) = fs::hard_link(&self.resolv_conf, &self.backup) {
            tracing::debug!(error = %e, "Hard link unavailable, copying resolv.conf");
            fs::copy(&self.resolv_conf, &self.backup)?;
        }
        Ok(())
    }

    fn discard_backup(&self) {
        if let Err(e) = fs::remove_file(&self.backup) {
            tracing::warn!(backup = %self.backup.display(), error = %e, "Failed to discard backup");
        }
    }
}

impl Default for ResolvConfBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DnsBackend for ResolvConfBackend {
    type Config = DnsConfig;

    fn resolve_interface(&mut self, identity: &NetworkIdentity) -> Result<ResolvedInterface> {
        let device = sysfs_device(&self.sys_class_net, &identity.device)?;
        Ok(ResolvedInterface {
            device: identity.device.clone(),
            handle: device,
        })
    }

    fn discover(&mut self, iface: &ResolvedInterface) -> Result<DiscoveryReport> {
        let mut report = DiscoveryReport::default();
        let origin = self.resolv_conf.display().to_string();

        let mut config = match self.read_current()? {
            Some(content) => parse_resolv_conf(&content).unwrap_or_else(|e| {
                report.push(DnsChangeError::missing("resolv.conf", format!("{origin}: {e}")));
                DnsConfig::default()
            }),
            None => {
                report.push(DnsChangeError::missing("resolv.conf", origin.clone()));
                DnsConfig::default()
            }
        };
        if config.name_servers.is_empty() {
            report.push(DnsChangeError::missing("nameserver", origin));
        }
        config.if_name.clone_from(&iface.handle);

        tracing::info!(
            device = %iface.handle,
            name_servers = ?config.name_servers,
            search_domains = ?config.search_domains,
            "Discovered DNS configuration"
        );
        self.config = config;
        Ok(report)
    }

    fn config(&self) -> &DnsConfig {
        &self.config
    }

    fn current_name_servers(&self) -> Vec<String> {
        self.config.name_servers.clone()
    }

    fn current_search_domains(&self) -> Vec<String> {
        self.config.search_domains.clone()
    }

    fn install_overrides(
        &mut self,
        request: &ChangeRequest,
        names: &OverrideNameSet,
    ) -> Result<InstallReport> {
        let current = self.read_current()?;
        let preserve = current.as_deref().is_some_and(|c| !is_managed(c));
        // A backup without a live file is the original left by an
        // interrupted run; keep it for teardown.
        let no_original = match current.as_deref() {
            None => !self.backup.exists(),
            Some(content) => lacks_original(content),
        };

        if preserve {
            self.preserve_original()?;
            tracing::debug!(backup = %self.backup.display(), "Preserved original resolv.conf");
        }

        let mut report = InstallReport::default();
        let path = self.resolv_conf.display().to_string();
        let content = managed_content(request.dns, &self.config.search_domains, no_original);
        match self.replace_resolv_conf(&content) {
            Ok(()) => {
                tracing::info!(
                    path = %path,
                    dns = %request.dns,
                    names = names.len(),
                    "Redirected system resolver"
                );
                report.installed.push(path);
            }
            Err(source) => {
                tracing::warn!(path = %path, error = %source, "Failed to write resolv.conf");
                if preserve {
                    self.discard_backup();
                }
                report.failed.push(DnsChangeError::ArtifactWriteFailed { name: path, source });
            }
        }
        Ok(report)
    }

    fn remove_overrides(&mut self, dns: IpAddr, original: Option<&DnsConfig>) -> Result<RemoveReport> {
        let mut report = RemoveReport::default();
        let path = self.resolv_conf.display().to_string();

        let Some(content) = self.read_current()? else {
            if self.backup.exists() {
                fs::rename(&self.backup, &self.resolv_conf)?;
                tracing::info!(path = %path, "Restored missing resolv.conf from backup");
                report.removed.push(path);
            } else {
                tracing::debug!(dns = %dns, "No resolv.conf and no backup, nothing to restore");
            }
            return Ok(report);
        };
        if !is_managed_for(&content, dns) {
            tracing::debug!(dns = %dns, "resolv.conf not redirected, nothing to restore");
            return Ok(report);
        }

        if self.backup.exists() {
            fs::rename(&self.backup, &self.resolv_conf)?;
            tracing::info!(path = %path, "Restored original resolv.conf from backup");
        } else if lacks_original(&content) {
            if let Err(source) = fs::remove_file(&self.resolv_conf) {
                report.failed.push(DnsChangeError::ArtifactRemoveFailed { name: path, source });
                return Ok(report);
            }
            tracing::info!(path = %path, "Removed resolv.conf, there was none before");
        } else if let Some(original) = original {
            if let Err(source) = self.replace_resolv_conf(&original_content(original)) {
                report.failed.push(DnsChangeError::ArtifactRemoveFailed { name: path, source });
                return Ok(report);
            }
            tracing::info!(
                path = %path,
                name_servers = ?original.name_servers,
                "Rewrote resolv.conf from captured configuration"
            );
        } else {
            return Err(DnsChangeError::RestoreUnavailable(format!(
                "{path} is redirected to {dns} but {} is missing",
                self.backup.display()
            )));
        }

        report.removed.push(path);
        Ok(report)
    }
}

/// Reads `nameserver`, `search`, `domain` and the common `options`.
///
/// # Errors
///
/// Returns the parser's error for malformed content (e.g. a `nameserver`
/// that is not an address).
pub fn parse_resolv_conf(content: &str) -> std::result::Result<DnsConfig, resolv_conf::ParseError> {
    let parsed = resolv_conf::Config::parse(content)?;
    Ok(DnsConfig {
        domain: parsed.get_domain().cloned().unwrap_or_default(),
        search_domains: parsed.get_search().cloned().unwrap_or_default(),
        name_servers: parsed.nameservers.iter().map(ToString::to_string).collect(),
        options: options_of(&parsed),
        ..DnsConfig::default()
    })
}

fn options_of(parsed: &resolv_conf::Config) -> String {
    let mut options = Vec::new();
    if parsed.ndots != 1 {
        options.push(format!("ndots:{}", parsed.ndots));
    }
    if parsed.timeout != 5 {
        options.push(format!("timeout:{}", parsed.timeout));
    }
    if parsed.attempts != 2 {
        options.push(format!("attempts:{}", parsed.attempts));
    }
    for (set, name) in [
        (parsed.edns0, "edns0"),
        (parsed.rotate, "rotate"),
        (parsed.single_request, "single-request"),
    ] {
        if set {
            options.push(name.to_string());
        }
    }
    options.join(" ")
}

/// Returns `true` if `content` was written by this backend.
#[must_use]
pub fn is_managed(content: &str) -> bool {
    content.lines().next().is_some_and(|l| l.trim() == MANAGED_BY_MARKER)
}

/// Returns `true` if `content` was written by this backend for `dns`.
#[must_use]
pub fn is_managed_for(content: &str, dns: IpAddr) -> bool {
    is_managed(content)
        && parse_resolv_conf(content).is_ok_and(|config| {
            config
                .name_servers
                .iter()
                .any(|s| s.parse::<IpAddr>().is_ok_and(|ip| ip == dns))
        })
}

fn lacks_original(content: &str) -> bool {
    is_managed(content) && content.lines().any(|l| l.trim() == NO_ORIGINAL_MARKER)
}

fn managed_content(dns: IpAddr, search_domains: &[String], no_original: bool) -> String {
    let mut content = format!("{MANAGED_BY_MARKER}\n");
    if no_original {
        content.push_str(NO_ORIGINAL_MARKER);
        content.push('\n');
    }
    content.push_str(&format!("nameserver {dns}\n"));
    if !search_domains.is_empty() {
        content.push_str(&format!("search {}\n", search_domains.join(" ")));
    }
    content
}

fn original_content(config: &DnsConfig) -> String {
    let mut content = String::new();
    if !config.domain.is_empty() {
        content.push_str(&format!("domain {}\n", config.domain));
    }
    if !config.search_domains.is_empty() {
        content.push_str(&format!("search {}\n", config.search_domains.join(" ")));
    }
    for server in &config.name_servers {
        content.push_str(&format!("nameserver {server}\n"));
    }
    if !config.options.is_empty() {
        content.push_str(&format!("options {}\n", config.options));
    }
    content
}
