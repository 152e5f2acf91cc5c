//! Platform DNS override backends.
//!
//! Each backend implements the whole [`DnsBackend`] contract on its own:
//!
//! | Backend | Mechanism | Platform |
//! |---|---|---|
//! | [`ResolverDirBackend`] | one `/etc/resolver/<name>` file per name | macOS |
//! | [`NrptBackend`] | Name Resolution Policy Table rules in the registry | Windows |
//! | [`ResolvConfBackend`] | rewrite of `/etc/resolv.conf` | Linux and other Unix |
//!
//! The resolver-directory and NRPT backends compile everywhere so they can be
//! exercised against fakes; the `resolv.conf` backend is Unix only.
//! [`PlatformBackend`] picks the one for the build target.

use std::fmt;
use std::net::IpAddr;

use crate::config::ChangeRequest;
use crate::error::Result;
use crate::model::{DiscoveryReport, InstallReport, RemoveReport, ResolvedInterface};
use crate::names::OverrideNameSet;
use crate::network::NetworkIdentity;

pub mod nrpt;
#[cfg(unix)]
pub mod resolv_conf;
pub mod resolver_dir;

pub use nrpt::NrptBackend;
#[cfg(unix)]
pub use resolv_conf::ResolvConfBackend;
pub use resolver_dir::ResolverDirBackend;

/// Capability contract every platform backend implements.
pub trait DnsBackend {
    /// Retained configuration record produced by [`discover`](Self::discover).
    type Config: Clone + fmt::Debug;

    /// Maps the network identity to the handle later calls are scoped to.
    ///
    /// # Errors
    ///
    /// [`InterfaceNotFound`](crate::DnsChangeError::InterfaceNotFound) if no
    /// interface matches.
    fn resolve_interface(&mut self, identity: &NetworkIdentity) -> Result<ResolvedInterface>;

    /// Reads the live DNS configuration of `iface`, replacing the retained
    /// record wholesale. Missing fields are reported, not fatal.
    ///
    /// # Errors
    ///
    /// Only when the configuration source cannot be consulted at all.
    fn discover(&mut self, iface: &ResolvedInterface) -> Result<DiscoveryReport>;

    /// Last discovered configuration.
    fn config(&self) -> &Self::Config;

    fn current_name_servers(&self) -> Vec<String>;

    fn current_search_domains(&self) -> Vec<String>;

    /// Installs overrides for `names` pointing at `request.dns`.
    ///
    /// Individual artifact failures land in the report; nothing already
    /// written is rolled back.
    ///
    /// # Errors
    ///
    /// Only when installation could not start (e.g. the override store is
    /// unreachable).
    fn install_overrides(
        &mut self,
        request: &ChangeRequest,
        names: &OverrideNameSet,
    ) -> Result<InstallReport>;

    /// Removes every artifact of ours that targets `dns`. `original` is the
    /// snapshot captured when the overrides were installed, if this process
    /// installed them.
    ///
    /// Finding nothing to remove is success.
    ///
    /// # Errors
    ///
    /// Only when the override store cannot be scanned or restored.
    fn remove_overrides(
        &mut self,
        dns: IpAddr,
        original: Option<&Self::Config>,
    ) -> Result<RemoveReport>;

    /// Makes `dns` locally routable, if the mechanism needs it.
    ///
    /// # Errors
    ///
    /// Tool failure.
    fn add_loopback_alias(&mut self, _dns: IpAddr) -> Result<()> {
        Ok(())
    }

    /// Undoes [`add_loopback_alias`](Self::add_loopback_alias).
    ///
    /// # Errors
    ///
    /// Tool failure.
    fn remove_loopback_alias(&mut self, _dns: IpAddr) -> Result<()> {
        Ok(())
    }
}

/// Backend for the build target.
#[cfg(target_os = "macos")]
pub type PlatformBackend = ResolverDirBackend<crate::exec::SystemRunner>;

/// Backend for the build target.
#[cfg(windows)]
pub type PlatformBackend =
    NrptBackend<crate::registry::WindowsRegistry, crate::exec::SystemRunner>;

/// Backend for the build target.
#[cfg(all(unix, not(target_os = "macos")))]
pub type PlatformBackend = ResolvConfBackend;

/// Creates the backend for the build target with default paths.
#[cfg(target_os = "macos")]
#[must_use]
pub fn platform_backend(runner: crate::exec::SystemRunner) -> PlatformBackend {
    ResolverDirBackend::new(runner)
}

/// Creates the backend for the build target with default paths.
#[cfg(windows)]
#[must_use]
pub fn platform_backend(runner: crate::exec::SystemRunner) -> PlatformBackend {
    NrptBackend::new(crate::registry::WindowsRegistry::new(), runner)
}

/// Creates the backend for the build target with default paths.
#[cfg(all(unix, not(target_os = "macos")))]
#[must_use]
pub fn platform_backend(_runner: crate::exec::SystemRunner) -> PlatformBackend {
    ResolvConfBackend::new()
}
