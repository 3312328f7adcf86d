//! Error types for the VM host control plane
//!
//! Provides structured error types for the rack controller RPC coordinator,
//! the NUMA accountant, the pod inventory and the REST surface.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for the control plane
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Metrics registration error: {0}")]
    Metrics(#[from] prometheus::Error),

    // =========================================================================
    // Rack Controller RPC Errors
    // =========================================================================
    /// A single-target pod call failed with a classified, human readable reason
    #[error("{0}")]
    PodProblem(String),

    /// A remote failure that matched no known kind, passed through unchanged
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("Rack controller not connected: {ident}")]
    ClientNotConnected { ident: String },

    #[error("Operation cancelled: {operation}")]
    Cancelled { operation: String },

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    // =========================================================================
    // Inventory Errors
    // =========================================================================
    #[error("Pod not found: {pod_id}")]
    PodNotFound { pod_id: u64 },

    #[error("Virtual machine not found: {vm_id}")]
    VirtualMachineNotFound { vm_id: u64 },

    #[error("Invalid virtual machine {identifier}: {reason}")]
    InvalidVirtualMachine { identifier: String, reason: String },

    #[error("Invalid snapshot for pod {pod_id}: {reason}")]
    InvalidSnapshot { pod_id: u64, reason: String },

    // =========================================================================
    // Accounting Errors
    // =========================================================================
    #[error("Pinned core {core} claimed by both {first} and {second}")]
    PinnedCoreConflict {
        core: u32,
        first: String,
        second: String,
    },

    #[error("Invalid core list '{input}': {reason}")]
    CoreListParse { input: String, reason: String },

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Remote(remote) => remote.is_transient(),
            Error::ClientNotConnected { .. } | Error::Cancelled { .. } => true,
            _ => false,
        }
    }

    /// Check if re-invoking the same operation could succeed.
    ///
    /// Nothing in this crate retries on its own; this is a hint for callers
    /// that apply their own retry policy.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Error::Configuration(_)
                | Error::PodProblem(_)
                | Error::InvalidVirtualMachine { .. }
                | Error::InvalidSnapshot { .. }
                | Error::PinnedCoreConflict { .. }
                | Error::CoreListParse { .. }
                | Error::JsonParse(_)
                | Error::YamlParse(_)
        )
    }
}

/// Result type alias for the control plane
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Remote Errors
// =============================================================================

/// A failure reported by (or while talking to) a rack controller.
///
/// The first five variants travel over the wire as
/// `{"kind": "...", "message": "..."}`; `Timeout` and `Transport` are raised
/// locally by the calling side.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message")]
pub enum RemoteError {
    /// The driver attempted the operation and reported a specific failure
    #[error("{0}")]
    ActionFailure(String),

    /// The driver type does not support the requested operation
    #[error("{0}")]
    NotImplemented(String),

    /// The receiving rack controller does not know the pod type
    #[error("Unknown pod type: {0}")]
    UnknownDriverType(String),

    /// The driver could not satisfy the requested resources
    #[error("Invalid resources: {0}")]
    InvalidResources(String),

    /// Any other driver-side failure
    #[error("{0}")]
    Unhandled(String),

    /// The call did not settle within its time bound (milliseconds)
    #[error("Call timed out after {0} ms")]
    Timeout(u64),

    #[error("Transport failure: {0}")]
    Transport(String),
}

impl RemoteError {
    /// Whether the failure came from the channel rather than the driver
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Timeout(_) | RemoteError::Transport(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_retryable() {
        let transient = Error::Remote(RemoteError::Timeout(120_000));
        assert!(transient.is_retryable());
        assert!(transient.is_transient());

        let problem = Error::PodProblem("Unable to compose machine because: boom".into());
        assert!(!problem.is_retryable());
        assert!(!problem.is_transient());

        let driver = Error::Remote(RemoteError::Unhandled("kaboom".into()));
        assert!(driver.is_retryable());
        assert!(!driver.is_transient());
    }

    #[test]
    fn test_remote_error_wire_format() {
        let err = RemoteError::NotImplemented("compose".into());
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"kind": "NotImplemented", "message": "compose"})
        );

        let parsed: RemoteError = serde_json::from_str(
            r#"{"kind": "UnknownDriverType", "message": "virsh2"}"#,
        )
        .unwrap();
        assert_eq!(parsed, RemoteError::UnknownDriverType("virsh2".into()));
    }

    #[test]
    fn test_remote_passthrough_display() {
        let err: Error = RemoteError::Unhandled("driver exploded".into()).into();
        assert_eq!(err.to_string(), "driver exploded");
    }
}
