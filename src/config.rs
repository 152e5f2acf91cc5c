//! Override request configuration.

use std::net::IpAddr;

use crate::error::{DnsChangeError, Result};

/// Parameters for a single [`DnsSession::change`](crate::DnsSession::change).
///
/// # Example
///
/// ```
/// use dnschange::ChangeRequest;
///
/// let request = ChangeRequest::new("10.0.0.2".parse().unwrap())
///     .with_domains(["corp.example"])
///     .with_peers(["host1"])
///     .with_internal("internal.example")
///     .with_api("api.corp.example");
///
/// assert_eq!(request.domains, vec!["corp.example"]);
/// assert_eq!(request.internal, "internal.example");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRequest {
    /// Resolver that overridden names are redirected to.
    pub dns: IpAddr,

    /// Zones redirected as a whole (e.g. `"corp.example"`).
    pub domains: Vec<String>,

    /// Short peer host names. Each is qualified with [`internal`](Self::internal)
    /// and with every search domain of the active interface.
    pub peers: Vec<String>,

    /// Internal zone the peers live in. Empty disables that qualification.
    pub internal: String,

    /// Controlling service endpoint. When it is a host name rather than an
    /// IP literal, backends that support it keep it resolving through the
    /// original name servers.
    pub api: String,
}

impl ChangeRequest {
    /// Creates a request with no domains, peers, internal zone or api endpoint.
    #[must_use]
    pub const fn new(dns: IpAddr) -> Self {
        Self {
            dns,
            domains: Vec::new(),
            peers: Vec::new(),
            internal: String::new(),
            api: String::new(),
        }
    }

    /// Sets the redirected zones.
    #[must_use]
    pub fn with_domains<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.domains = domains.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the peer host names.
    #[must_use]
    pub fn with_peers<I, S>(mut self, peers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.peers = peers.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the internal zone.
    #[must_use]
    pub fn with_internal(mut self, internal: impl Into<String>) -> Self {
        self.internal = internal.into();
        self
    }

    /// Sets the controlling service endpoint.
    #[must_use]
    pub fn with_api(mut self, api: impl Into<String>) -> Self {
        self.api = api.into();
        self
    }

    /// Checks the values that end up as single names in override artifacts.
    ///
    /// Zones and peers are validated per artifact during installation; the
    /// resolver address, the internal zone and the api endpoint are checked
    /// up front because every artifact depends on them.
    ///
    /// # Errors
    ///
    /// [`DnsChangeError::InvalidConfig`] naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.dns.is_unspecified() || self.dns.is_multicast() {
            return Err(DnsChangeError::InvalidConfig(format!(
                "dns: {} is not a unicast resolver address",
                self.dns
            )));
        }
        for (field, value) in [("internal", &self.internal), ("api", &self.api)] {
            if value.chars().any(|c| c == '/' || c == '\\' || c.is_whitespace()) {
                return Err(DnsChangeError::InvalidConfig(format!(
                    "{field}: {value:?} is not a host or zone name"
                )));
            }
        }
        Ok(())
    }

    /// Returns the api endpoint if it needs a forwarding rule: non-empty and
    /// not an IP literal.
    #[must_use]
    pub fn api_host(&self) -> Option<&str> {
        let api = self.api.trim();
        if api.is_empty() || api.parse::<IpAddr>().is_ok() {
            None
        } else {
            Some(api)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dns() -> IpAddr {
        "10.0.0.2".parse().unwrap()
    }

    #[test]
    fn new_sets_defaults() {
        let r = ChangeRequest::new(dns());
        assert_eq!(r.dns, dns());
        assert!(r.domains.is_empty());
        assert!(r.peers.is_empty());
        assert!(r.internal.is_empty());
        assert!(r.api.is_empty());
    }

    #[test]
    fn validate_rejects_unusable_values() {
        let ok = ChangeRequest::new(dns())
            .with_domains(["corp.example"])
            .with_internal("internal.example")
            .with_api("api.corp.example");
        assert!(ok.validate().is_ok());

        for bad in [
            ChangeRequest::new("0.0.0.0".parse().unwrap()),
            ChangeRequest::new(dns()).with_internal("internal/example"),
            ChangeRequest::new(dns()).with_api("https://api.corp.example/v1"),
            ChangeRequest::new(dns()).with_api("api corp"),
        ] {
            assert!(
                matches!(bad.validate(), Err(DnsChangeError::InvalidConfig(_))),
                "{bad:?}"
            );
        }
    }

    #[test]
    fn api_host_skips_ip_literals() {
        let r = ChangeRequest::new(dns()).with_api("198.51.100.9");
        assert_eq!(r.api_host(), None);

        let r = ChangeRequest::new(dns()).with_api("api.corp.example");
        assert_eq!(r.api_host(), Some("api.corp.example"));

        assert_eq!(ChangeRequest::new(dns()).api_host(), None);
    }
}
