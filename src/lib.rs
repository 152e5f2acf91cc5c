//! # dnschange
//!
//! Redirect DNS resolution for selected names to an alternate resolver and
//! put everything back on teardown.
//!
//! A VPN-style client typically runs a resolver on a private address and
//! wants the OS to send only a few names there: corporate zones, peer host
//! names, and the peer names qualified with the local search domains. This
//! crate discovers the active interface and its current DNS configuration,
//! installs per-name overrides with the platform's native mechanism, and
//! removes exactly those overrides again.
//!
//! | Platform | Mechanism |
//! |---|---|
//! | macOS | one `/etc/resolver/<name>` file per name, plus a `lo0` alias |
//! | Windows | Name Resolution Policy Table rules in the registry |
//! | Linux / other Unix | `/etc/resolv.conf` rewrite with a backup |
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use dnschange::{ChangeRequest, DnsSession, RouteCommandLookup, SystemRunner, platform_backend};
//!
//! let session = DnsSession::new(
//!     platform_backend(SystemRunner::new()),
//!     RouteCommandLookup::new(SystemRunner::new()),
//! );
//!
//! let dns = "10.0.0.2".parse()?;
//! let report = session.change(
//!     &ChangeRequest::new(dns)
//!         .with_domains(["corp.example"])
//!         .with_peers(["host1"])
//!         .with_internal("internal.example"),
//! )?;
//! if !report.is_complete() {
//!     eprintln!("partial override: {report:?}");
//! }
//!
//! // On shutdown.
//! session.restore_dns(dns)?;
//! ```
//!
//! ## Crash recovery
//!
//! Teardown does not depend on in-memory state. Every artifact carries a
//! marker (the resolver address in a resolver file, a comment on an NRPT
//! rule, a header line in `resolv.conf`), so a fresh process can call
//! [`DnsSession::restore_dns`] with the same address and clean up after a
//! crashed one.
//!
//! ## Testing without root
//!
//! External tools go through [`CommandRunner`] and the registry through
//! [`Registry`]; [`MemoryRegistry`], [`StaticLookup`] and
//! [`ResolverDirBackend::with_dir`] let the whole lifecycle run against
//! fakes and temporary directories.
//!
//! ## Permissions
//!
//! Installing overrides needs root (or an elevated token on Windows). The
//! caller is responsible for privilege elevation.

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod config;
pub mod error;
pub mod exec;
pub mod interface;
pub mod model;
pub mod names;
pub mod network;
pub mod registry;
pub mod session;
pub mod util;

#[cfg(test)]
mod testing;

pub use backend::nrpt::PolicyRule;
#[cfg(unix)]
pub use backend::ResolvConfBackend;
pub use backend::{DnsBackend, NrptBackend, PlatformBackend, ResolverDirBackend, platform_backend};
pub use config::ChangeRequest;
pub use error::{DnsChangeError, Result};
pub use exec::{CommandOutput, CommandRunner, SystemRunner};
pub use model::{
    ChangeReport, DiscoveryReport, DnsConfig, DnsInfo, InstallReport, InterfaceConfig,
    RemoveReport, ResolvedInterface,
};
pub use names::OverrideNameSet;
pub use network::{InterfaceAddrs, NetworkIdentity, NetworkLookup, RouteCommandLookup, StaticLookup};
#[cfg(windows)]
pub use registry::WindowsRegistry;
pub use registry::{MemoryRegistry, RegValue, Registry};
pub use session::{ActiveOverride, DnsSession};
