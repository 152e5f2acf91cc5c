//! File-based `/etc/resolver/` overrides (macOS).
//!
//! Every overridden name gets a file `/etc/resolver/<name>` containing
//! exactly `nameserver <dns>`. The files carry no other marker, so teardown
//! selects them by that directive: files naming another resolver are left
//! alone.
//!
//! Discovery goes through `networksetup`, falling back to the scoped block
//! of `scutil --dns` when the service has no explicit servers.

use std::fs::{self, File};
use std::io::{self, Write};
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use crate::backend::DnsBackend;
use crate::config::ChangeRequest;
use crate::error::{DnsChangeError, Result};
use crate::exec::{CommandRunner, run_checked};
use crate::interface::service_for_device;
use crate::model::{DiscoveryReport, DnsConfig, InstallReport, RemoveReport, ResolvedInterface};
use crate::names::OverrideNameSet;
use crate::network::NetworkIdentity;

/// Default macOS resolver directory.
const DEFAULT_RESOLVER_DIR: &str = "/etc/resolver";

const NETWORKSETUP: &str = "networksetup";
const SCUTIL: &str = "scutil";
const IFCONFIG: &str = "ifconfig";
const LOOPBACK: &str = "lo0";

const NO_DNS_SERVERS: &str = "There aren't any DNS Servers set on";
const NO_SEARCH_DOMAINS: &str = "There aren't any Search Domains set on";
const SCOPED_QUERIES: &str = "DNS configuration (for scoped queries)";

/// One file found in the resolver directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverFile {
    pub name: String,
    pub content: String,
}

/// Manages `/etc/resolver/<name>` files and reads service DNS settings.
///
/// # Permissions
///
/// `/etc/resolver/` and `ifconfig lo0 alias` require root. The caller must
/// handle elevation.
///
/// # Example
///
/// ```rust,ignore
/// use dnschange::{ResolverDirBackend, SystemRunner};
///
/// let backend = ResolverDirBackend::new(SystemRunner::new());
/// ```
pub struct ResolverDirBackend<R> {
    runner: R,
    resolver_dir: PathBuf,
    config: DnsConfig,
}

impl<R: CommandRunner> ResolverDirBackend<R> {
    /// Creates a backend targeting the default `/etc/resolver` directory.
    #[must_use]
    pub fn new(runner: R) -> Self {
        Self::with_dir(runner, DEFAULT_RESOLVER_DIR)
    }

    /// Creates a backend targeting a custom directory (useful for testing).
    #[must_use]
    pub fn with_dir(runner: R, resolver_dir: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            resolver_dir: resolver_dir.into(),
            config: DnsConfig::default(),
        }
    }

    /// Returns the resolver directory path.
    #[must_use]
    pub fn resolver_dir(&self) -> &Path {
        &self.resolver_dir
    }

    /// Lists names whose resolver file points at `dns`.
    ///
    /// Returns an empty vec if the directory does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`DnsChangeError::Io`] if the directory cannot be read.
    pub fn overrides_for(&self, dns: IpAddr) -> Result<Vec<String>> {
        let files = self.scan()?;
        Ok(artifacts_to_remove(&files, dns)
            .into_iter()
            .map(|f| f.name.clone())
            .collect())
    }

    fn scan(&self) -> Result<Vec<ResolverFile>> {
        if !self.resolver_dir.exists() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in fs::read_dir(&self.resolver_dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            match fs::read_to_string(&path) {
                Ok(content) => files.push(ResolverFile {
                    name: name.to_string(),
                    content,
                }),
                Err(e) => tracing::debug!(
                    path = %path.display(),
                    error = %e,
                    "Skipping unreadable resolver file"
                ),
            }
        }
        Ok(files)
    }

    fn write_override(&self, name: &str, dns: IpAddr) -> io::Result<()> {
        if name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "name is not a valid resolver file name",
            ));
        }
        let mut file = File::create(self.resolver_dir.join(name))?;
        file.write_all(override_content(dns).as_bytes())?;
        file.sync_all()
    }

    fn search_domains_for(&self, service: &str) -> Result<Vec<String>> {
        let output = self.runner.run(NETWORKSETUP, &["-getsearchdomains", service])?;
        if output.combined().contains(NO_SEARCH_DOMAINS) {
            return Ok(Vec::new());
        }
        if !output.success {
            return Err(DnsChangeError::tool(
                NETWORKSETUP,
                format!("-getsearchdomains {service}: {}", output.combined().trim()),
            ));
        }
        Ok(non_empty_lines(&output.stdout))
    }

    fn alias(&self, dns: IpAddr, action: &str) -> Result<()> {
        let ip = dns.to_string();
        let args: Vec<&str> = match dns {
            IpAddr::V4(_) => vec![LOOPBACK, action, ip.as_str()],
            IpAddr::V6(_) => vec![LOOPBACK, "inet6", ip.as_str(), action],
        };
        run_checked(&self.runner, IFCONFIG, &args)?;
        Ok(())
    }
}

impl<R: CommandRunner> DnsBackend for ResolverDirBackend<R> {
    type Config = DnsConfig;

    fn resolve_interface(&mut self, identity: &NetworkIdentity) -> Result<ResolvedInterface> {
        let output = run_checked(&self.runner, NETWORKSETUP, &["-listnetworkserviceorder"])?;
        let service = service_for_device(&output.stdout, &identity.device)?;
        tracing::debug!(device = %identity.device, service = %service, "Resolved network service");
        Ok(ResolvedInterface {
            device: identity.device.clone(),
            handle: service,
        })
    }

    fn discover(&mut self, iface: &ResolvedInterface) -> Result<DiscoveryReport> {
        let mut report = DiscoveryReport::default();
        let output = self.runner.run(NETWORKSETUP, &["-getdnsservers", &iface.handle])?;

        let mut config = if output.combined().contains(NO_DNS_SERVERS) {
            tracing::debug!(
                service = %iface.handle,
                "No DNS servers set on service, reading scoped resolver configuration"
            );
            let scutil = run_checked(&self.runner, SCUTIL, &["--dns"])?;
            parse_scoped_dns(&scutil.stdout, &iface.device).unwrap_or_else(|| {
                report.push(DnsChangeError::missing(
                    "resolver",
                    format!("scoped queries for {}", iface.device),
                ));
                DnsConfig::default()
            })
        } else if output.success {
            let mut config = DnsConfig {
                name_servers: non_empty_lines(&output.stdout),
                ..DnsConfig::default()
            };
            match self.search_domains_for(&iface.handle) {
                Ok(domains) => config.search_domains = domains,
                Err(e) => report.push(e),
            }
            config
        } else {
            report.push(DnsChangeError::tool(
                NETWORKSETUP,
                format!("-getdnsservers {}: {}", iface.handle, output.combined().trim()),
            ));
            DnsConfig::default()
        };

        if config.name_servers.is_empty() {
            report.push(DnsChangeError::missing("nameserver", iface.handle.clone()));
        }
        config.if_name.clone_from(&iface.handle);

        tracing::info!(
            service = %iface.handle,
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
        if !self.resolver_dir.exists() {
            fs::create_dir_all(&self.resolver_dir)?;
        }

        let mut report = InstallReport::default();
        for name in names.iter() {
            match self.write_override(name, request.dns) {
                Ok(()) => {
                    tracing::info!(
                        domain = %name,
                        dns = %request.dns,
                        "Registered macOS DNS resolver"
                    );
                    report.installed.push(name.to_string());
                }
                Err(source) => {
                    tracing::warn!(domain = %name, error = %source, "Failed to write resolver file");
                    report.failed.push(DnsChangeError::ArtifactWriteFailed {
                        name: name.to_string(),
                        source,
                    });
                }
            }
        }
        Ok(report)
    }

    fn remove_overrides(&mut self, dns: IpAddr, _original: Option<&DnsConfig>) -> Result<RemoveReport> {
        let files = self.scan()?;
        let mut report = RemoveReport::default();

        for file in artifacts_to_remove(&files, dns) {
            match fs::remove_file(self.resolver_dir.join(&file.name)) {
                Ok(()) => {
                    tracing::info!(domain = %file.name, "Unregistered macOS DNS resolver");
                    report.removed.push(file.name.clone());
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    tracing::debug!(domain = %file.name, "Resolver file already gone");
                }
                Err(source) => {
                    tracing::warn!(domain = %file.name, error = %source, "Failed to remove resolver file");
                    report.failed.push(DnsChangeError::ArtifactRemoveFailed {
                        name: file.name.clone(),
                        source,
                    });
                }
            }
        }

        if report.removed.is_empty() && report.failed.is_empty() {
            tracing::debug!(dns = %dns, "No resolver files to remove");
        }
        Ok(report)
    }

    fn add_loopback_alias(&mut self, dns: IpAddr) -> Result<()> {
        self.alias(dns, "alias")
    }

    fn remove_loopback_alias(&mut self, dns: IpAddr) -> Result<()> {
        self.alias(dns, "-alias")
    }
}

// ---------------------------------------------------------------------------
// Parsing and selection helpers
// ---------------------------------------------------------------------------

/// Resolver file content: exactly one `nameserver` directive.
#[must_use]
pub fn override_content(dns: IpAddr) -> String {
    format!("nameserver {dns}\n")
}

/// Selects the files that redirect to `dns`.
///
/// A file matches when one of its lines is `nameserver <dns>` with nothing
/// else on it. Files naming other resolvers are never selected.
#[must_use]
pub fn artifacts_to_remove(files: &[ResolverFile], dns: IpAddr) -> Vec<&ResolverFile> {
    files
        .iter()
        .filter(|f| f.content.lines().any(|line| names_resolver(line, dns)))
        .collect()
}

fn names_resolver(line: &str, dns: IpAddr) -> bool {
    let mut tokens = line.split_whitespace();
    tokens.next() == Some("nameserver")
        && tokens.next().and_then(|t| t.parse::<IpAddr>().ok()) == Some(dns)
        && tokens.next().is_none()
}

/// Extracts the resolver block for `device` from the scoped-queries section
/// of `scutil --dns`.
///
/// ```text
/// DNS configuration (for scoped queries)
///
/// resolver #1
///   search domain[0] : lan
///   nameserver[0] : 192.168.1.1
///   if_index : 6 (en0)
///   flags    : Scoped, Request A records
///   reach    : 0x00020002 (Reachable,Directly Reachable Address)
/// ```
///
/// Returns `None` if the section or a block for `device` is absent.
#[must_use]
pub fn parse_scoped_dns(output: &str, device: &str) -> Option<DnsConfig> {
    let mut block: Option<DnsConfig> = None;

    for line in output
        .lines()
        .skip_while(|l| !l.contains(SCOPED_QUERIES))
        .skip(1)
    {
        let line = line.trim();
        let new_section = line.starts_with("DNS configuration");
        if line.starts_with("resolver #") || new_section {
            if let Some(done) = block.take().filter(|b| block_is_for(b, device)) {
                return Some(done);
            }
            if new_section {
                return None;
            }
            block = Some(DnsConfig::default());
            continue;
        }

        let Some(config) = block.as_mut() else {
            continue;
        };
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let (key, value) = (key.trim(), value.trim().to_string());
        if key.starts_with("nameserver") {
            config.name_servers.push(value);
        } else if key.starts_with("search domain") {
            config.search_domains.push(value);
        } else if key.starts_with("domain") {
            config.domain = value;
        } else if key.starts_with("if_index") {
            config.if_index = value;
        } else if key.starts_with("flags") {
            config.flags = value;
        } else if key.starts_with("reach") {
            config.reach = value;
        } else if key.starts_with("options") {
            config.options = value;
        }
    }

    block.filter(|b| block_is_for(b, device))
}

/// `if_index : 6 (en0)` names the device in parentheses.
fn block_is_for(block: &DnsConfig, device: &str) -> bool {
    block
        .if_index
        .split_once('(')
        .and_then(|(_, rest)| rest.strip_suffix(')'))
        .is_some_and(|name| name.trim() == device)
}

fn non_empty_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}
