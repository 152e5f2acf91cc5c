//! DNS override lifecycle.
//!
//! A [`DnsSession`] owns one backend and walks it through
//! Idle → Active → Idle. The pristine configuration is captured exactly once
//! per lifecycle: `change` is refused while overrides are active, because
//! rediscovering then would observe our own redirect instead of the
//! original servers.

use std::net::IpAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::backend::DnsBackend;
use crate::config::ChangeRequest;
use crate::error::{DnsChangeError, Result};
use crate::model::{ChangeReport, DnsInfo, RemoveReport, ResolvedInterface};
use crate::names::OverrideNameSet;
use crate::network::NetworkLookup;

/// Captured state of an active override.
#[derive(Debug, Clone)]
pub struct ActiveOverride<C> {
    pub dns: IpAddr,
    pub interface: ResolvedInterface,
    /// Configuration discovered before anything was installed.
    pub original: C,
    pub names: OverrideNameSet,
}

#[derive(Debug)]
enum State<C> {
    Idle,
    Active(ActiveOverride<C>),
}

struct Inner<B: DnsBackend> {
    backend: B,
    state: State<B::Config>,
}

/// Redirects DNS for a set of names and restores it on teardown.
///
/// All operations take `&self` and are serialized by an internal lock, so a
/// status handler calling [`get_dns`](Self::get_dns) cannot interleave with
/// [`change`](Self::change) or [`restore_dns`](Self::restore_dns).
///
/// # Example
///
/// ```rust,ignore
/// use dnschange::{ChangeRequest, DnsSession, RouteCommandLookup, SystemRunner, platform_backend};
///
/// let session = DnsSession::new(
///     platform_backend(SystemRunner::new()),
///     RouteCommandLookup::new(SystemRunner::new()),
/// );
/// let dns = "10.0.0.2".parse()?;
/// session.change(&ChangeRequest::new(dns).with_domains(["corp.example"]))?;
/// // ...
/// session.restore_dns(dns)?;
/// ```
pub struct DnsSession<B: DnsBackend, P> {
    inner: Mutex<Inner<B>>,
    network: P,
}

impl<B: DnsBackend, P: NetworkLookup> DnsSession<B, P> {
    pub const fn new(backend: B, network: P) -> Self {
        Self {
            inner: Mutex::new(Inner {
                backend,
                state: State::Idle,
            }),
            network,
        }
    }

    /// Installs overrides for `request`.
    ///
    /// Fails before touching the system if the session is already active,
    /// the request is invalid, the default route is unknown, or the
    /// interface cannot be resolved.
    /// Once installation has been attempted the session is Active even if
    /// some artifacts failed; check [`ChangeReport::is_complete`] and always
    /// pair with [`restore_dns`](Self::restore_dns).
    ///
    /// # Errors
    ///
    /// [`DnsChangeError::SessionActive`], [`DnsChangeError::InvalidConfig`],
    /// [`DnsChangeError::InterfaceNotFound`],
    /// [`DnsChangeError::GatewayUnavailable`], or a backend error that
    /// prevented discovery or installation from starting.
    pub fn change(&self, request: &ChangeRequest) -> Result<ChangeReport> {
        let mut inner = self.lock();
        if let State::Active(active) = &inner.state {
            tracing::warn!(active = %active.dns, requested = %request.dns, "DNS override already active");
            return Err(DnsChangeError::SessionActive { dns: active.dns });
        }
        request.validate()?;

        if crate::util::is_elevated() == Some(false) {
            tracing::warn!("Not running as root, DNS changes will likely be refused");
        }

        let identity = self.network.identity()?;
        let interface = inner.backend.resolve_interface(&identity)?;
        let discovery = inner.backend.discover(&interface)?;
        let original = inner.backend.config().clone();

        let alias_error = inner.backend.add_loopback_alias(request.dns).err();
        if let Some(e) = &alias_error {
            tracing::warn!(dns = %request.dns, error = %e, "Failed to add loop-back alias");
        }

        let names = OverrideNameSet::compute(
            &request.domains,
            &request.peers,
            &request.internal,
            &inner.backend.current_search_domains(),
        );

        let install = inner.backend.install_overrides(request, &names);
        inner.state = State::Active(ActiveOverride {
            dns: request.dns,
            interface: interface.clone(),
            original,
            names,
        });
        let install = install?;

        tracing::info!(
            dns = %request.dns,
            interface = %interface.handle,
            installed = install.installed.len(),
            failed = install.failed.len(),
            "DNS override active"
        );
        Ok(ChangeReport {
            interface: Some(interface),
            discovery,
            alias_error,
            install,
        })
    }

    /// Rediscovers the current name servers and search domains.
    ///
    /// Reflects whatever the platform reports right now, including an active
    /// override. The snapshot taken by [`change`](Self::change) is untouched.
    ///
    /// # Errors
    ///
    /// Route, interface resolution or discovery failure.
    pub fn get_dns(&self) -> Result<DnsInfo> {
        let mut inner = self.lock();
        let identity = self.network.identity()?;
        let interface = inner.backend.resolve_interface(&identity)?;
        inner.backend.discover(&interface)?;
        Ok(DnsInfo {
            name_servers: inner.backend.current_name_servers(),
            search_domains: inner.backend.current_search_domains(),
        })
    }

    /// Removes every override pointing at `dns` and the loop-back alias.
    ///
    /// Works from Idle as well, so leftovers from a crashed process can be
    /// cleaned up. Running it twice is harmless.
    ///
    /// # Errors
    ///
    /// A backend error that prevented scanning or restoring the override
    /// store. Alias removal failures are only logged.
    pub fn restore_dns(&self, dns: IpAddr) -> Result<RemoveReport> {
        let mut inner = self.lock();
        let inner = &mut *inner;

        let original = match &inner.state {
            State::Active(active) if active.dns == dns => Some(&active.original),
            _ => None,
        };
        let report = inner.backend.remove_overrides(dns, original)?;

        if let Err(e) = inner.backend.remove_loopback_alias(dns) {
            tracing::debug!(dns = %dns, error = %e, "Loop-back alias not removed");
        }

        if matches!(&inner.state, State::Active(active) if active.dns == dns) {
            inner.state = State::Idle;
        }
        tracing::info!(
            dns = %dns,
            removed = report.removed.len(),
            failed = report.failed.len(),
            "DNS override removed"
        );
        Ok(report)
    }

    /// Returns `true` while overrides installed by this session are active.
    pub fn is_active(&self) -> bool {
        matches!(self.lock().state, State::Active(_))
    }

    /// Snapshot of the active override, if any.
    pub fn active(&self) -> Option<ActiveOverride<B::Config>> {
        match &self.lock().state {
            State::Active(active) => Some(active.clone()),
            State::Idle => None,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<B>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ResolverDirBackend;
    use crate::exec::CommandOutput;
    use crate::network::{InterfaceAddrs, StaticLookup};
    use crate::testing::ScriptedRunner;

    fn network() -> StaticLookup {
        StaticLookup::new(
            "192.168.1.1".parse().unwrap(),
            vec![InterfaceAddrs::new("en0", vec!["192.168.1.20/24".parse().unwrap()])],
        )
    }

    fn runner() -> ScriptedRunner {
        let runner = ScriptedRunner::new();
        runner
            .respond(
                "networksetup -listnetworkserviceorder",
                CommandOutput::ok("(1) Wi-Fi\n(Hardware Port: Wi-Fi, Device: en0)\n"),
            )
            .respond("networksetup -getdnsservers Wi-Fi", CommandOutput::ok("192.168.1.1\n"))
            .respond("networksetup -getsearchdomains Wi-Fi", CommandOutput::ok("lan\n"))
            .respond("ifconfig lo0 alias 10.0.0.2", CommandOutput::ok(""))
            .respond("ifconfig lo0 -alias 10.0.0.2", CommandOutput::ok(""));
        runner
    }

    fn dns() -> IpAddr {
        "10.0.0.2".parse().unwrap()
    }

    #[test]
    fn change_then_restore_walks_the_state_machine() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner();
        let session = DnsSession::new(ResolverDirBackend::with_dir(runner.clone(), dir.path()), network());
        let request = ChangeRequest::new(dns())
            .with_domains(["corp.example"])
            .with_peers(["host1"])
            .with_internal("internal.example");

        let report = session.change(&request).unwrap();
        assert!(report.is_complete());
        assert!(session.is_active());

        let active = session.active().unwrap();
        assert_eq!(active.original.name_servers, vec!["192.168.1.1"]);
        assert!(active.names.contains("host1.lan"));
        assert!(dir.path().join("host1.lan").exists());

        assert!(matches!(
            session.change(&request),
            Err(DnsChangeError::SessionActive { .. })
        ));

        let removed = session.restore_dns(dns()).unwrap();
        assert_eq!(removed.removed.len(), 3);
        assert!(!session.is_active());
        assert!(runner.calls().contains(&"ifconfig lo0 -alias 10.0.0.2".to_string()));
    }

    #[test]
    fn unresolved_interface_installs_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new();
        runner.respond(
            "networksetup -listnetworkserviceorder",
            CommandOutput::ok("(Hardware Port: Ethernet, Device: en5)\n"),
        );
        let session = DnsSession::new(ResolverDirBackend::with_dir(runner.clone(), dir.path()), network());

        let err = session
            .change(&ChangeRequest::new(dns()).with_domains(["corp.example"]))
            .unwrap_err();
        assert!(matches!(err, DnsChangeError::InterfaceNotFound { .. }));
        assert!(!session.is_active());
        assert_eq!(fs_entries(dir.path()), 0);
        assert!(!runner.calls().iter().any(|c| c.starts_with("ifconfig")));
    }

    #[test]
    fn invalid_request_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner();
        let session = DnsSession::new(ResolverDirBackend::with_dir(runner.clone(), dir.path()), network());

        let err = session
            .change(&ChangeRequest::new(dns()).with_domains(["corp.example"]).with_internal("a/b"))
            .unwrap_err();
        assert!(matches!(err, DnsChangeError::InvalidConfig(_)));
        assert!(runner.calls().is_empty());
        assert_eq!(fs_entries(dir.path()), 0);
        assert!(!session.is_active());
    }

    #[test]
    fn alias_failure_is_reported_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner();
        runner.respond("ifconfig lo0 alias 10.0.0.2", CommandOutput::failed(1, "permission denied"));
        let session = DnsSession::new(ResolverDirBackend::with_dir(runner, dir.path()), network());

        let report = session
            .change(&ChangeRequest::new(dns()).with_domains(["corp.example"]))
            .unwrap();
        assert!(report.alias_error.is_some());
        assert!(!report.is_complete());
        assert!(dir.path().join("corp.example").exists());
    }

    #[test]
    fn restore_twice_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner();
        let session = DnsSession::new(ResolverDirBackend::with_dir(runner, dir.path()), network());
        session
            .change(&ChangeRequest::new(dns()).with_domains(["corp.example"]))
            .unwrap();

        assert_eq!(session.restore_dns(dns()).unwrap().removed.len(), 1);
        assert!(session.restore_dns(dns()).unwrap().removed.is_empty());
        assert_eq!(fs_entries(dir.path()), 0);
    }

    #[test]
    fn get_dns_does_not_touch_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner();
        let session = DnsSession::new(ResolverDirBackend::with_dir(runner.clone(), dir.path()), network());
        session.change(&ChangeRequest::new(dns())).unwrap();

        runner.respond("networksetup -getdnsservers Wi-Fi", CommandOutput::ok("10.0.0.2\n"));
        let info = session.get_dns().unwrap();
        assert_eq!(info.name_servers, vec!["10.0.0.2"]);
        assert_eq!(info.search_domains, vec!["lan"]);
        assert_eq!(session.active().unwrap().original.name_servers, vec!["192.168.1.1"]);
    }

    fn fs_entries(dir: &std::path::Path) -> usize {
        std::fs::read_dir(dir).map_or(0, Iterator::count)
    }
}
