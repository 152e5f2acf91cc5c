//! Error types.

use std::net::IpAddr;

use thiserror::Error;

/// Result alias for DNS override operations.
pub type Result<T> = std::result::Result<T, DnsChangeError>;

/// Errors returned by DNS override operations.
#[derive(Debug, Error)]
pub enum DnsChangeError {
    /// Filesystem I/O failed (typically `PermissionDenied` on `/etc`).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No network interface matched the requested identifier.
    ///
    /// Every later step is scoped to the resolved interface, so this aborts
    /// the whole operation.
    #[error("network interface not found: {interface}")]
    InterfaceNotFound {
        /// Device name or gateway address that was looked up.
        interface: String,
    },

    /// An external configuration tool could not be spawned, exited with a
    /// failure status, or timed out.
    #[error("`{tool}` failed: {reason}")]
    ToolInvocationFailed {
        /// Program name.
        tool: String,
        /// Exit status, spawn error, or timeout description.
        reason: String,
    },

    /// An expected value was absent from tool output or the registry.
    #[error("missing `{field}` in {origin}")]
    FieldParseMissing {
        /// Field or registry value name.
        field: String,
        /// Where the value was expected (tool or key path).
        origin: String,
    },

    /// One override artifact could not be created or written.
    #[error("failed to write override for {name}: {source}")]
    ArtifactWriteFailed {
        /// Name the override was meant for.
        name: String,
        /// Underlying failure.
        #[source]
        source: std::io::Error,
    },

    /// One override artifact could not be deleted.
    #[error("failed to remove override {name}: {source}")]
    ArtifactRemoveFailed {
        /// Artifact file name or rule key.
        name: String,
        /// Underlying failure.
        #[source]
        source: std::io::Error,
    },

    /// Registry access failed.
    #[error("registry error at {path}: {source}")]
    Registry {
        /// Key path below `HKEY_LOCAL_MACHINE`.
        path: String,
        /// Underlying failure.
        #[source]
        source: std::io::Error,
    },

    /// The default gateway could not be determined.
    #[error("default gateway unavailable: {0}")]
    GatewayUnavailable(String),

    /// `change` was called while overrides are already active.
    #[error("DNS override already active for {dns}")]
    SessionActive {
        /// Resolver the active overrides point at.
        dns: IpAddr,
    },

    /// Managed configuration is present but neither a backup nor a captured
    /// original is available to restore from.
    #[error("cannot restore original DNS configuration: {0}")]
    RestoreUnavailable(String),

    /// Invalid configuration values.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl DnsChangeError {
    /// Returns `true` if the underlying I/O error is `PermissionDenied`.
    #[must_use]
    pub fn is_permission_denied(&self) -> bool {
        match self {
            Self::Io(e)
            | Self::ArtifactWriteFailed { source: e, .. }
            | Self::ArtifactRemoveFailed { source: e, .. }
            | Self::Registry { source: e, .. } => {
                e.kind() == std::io::ErrorKind::PermissionDenied
            }
            _ => false,
        }
    }

    pub(crate) fn tool(tool: &str, reason: impl Into<String>) -> Self {
        Self::ToolInvocationFailed {
            tool: tool.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn missing(field: &str, origin: impl Into<String>) -> Self {
        Self::FieldParseMissing {
            field: field.to_string(),
            origin: origin.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn permission_denied_is_detected_through_wrappers() {
        let err = DnsChangeError::ArtifactWriteFailed {
            name: "corp.example".into(),
            source: io::Error::from(io::ErrorKind::PermissionDenied),
        };
        assert!(err.is_permission_denied());
        assert!(!DnsChangeError::tool("scutil", "exit status 1").is_permission_denied());
    }

    #[test]
    fn display_names_the_tool() {
        let err = DnsChangeError::tool("networksetup", "timed out after 5s");
        assert_eq!(err.to_string(), "`networksetup` failed: timed out after 5s");
    }
}
