//! Error types for the registration layer.

use thiserror::Error;

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// The outcomes of a registry call other than success.
///
/// The lifecycle engine depends on this four-way split, not on the wire
/// encoding behind it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Network failure, timeout or server-side error. Retry with backoff.
    #[error("registry unreachable: {0}")]
    Unreachable(String),

    /// The registry refused the request (malformed payload, version
    /// conflict, duplicate). Retrying the same request will not help.
    #[error("registry rejected request ({status:?}): {reason}")]
    Rejected { status: Option<u16>, reason: String },

    /// The registry no longer holds our node while we pushed a resource.
    #[error("node not registered")]
    NodeNotRegistered,

    /// The registry dropped our node; the heartbeat had nothing to extend.
    #[error("node registration expired")]
    NodeExpired,
}

impl RegistryError {
    /// Returns true for failures worth retrying against the same registry.
    pub fn is_transient(&self) -> bool {
        matches!(self, RegistryError::Unreachable(_))
    }

    /// Returns true when the registration session is gone and only a full
    /// re-registration can recover.
    pub fn is_session_lost(&self) -> bool {
        matches!(
            self,
            RegistryError::NodeNotRegistered | RegistryError::NodeExpired
        )
    }

    /// Returns true for refusals that must not be blindly retried.
    pub fn is_rejection(&self) -> bool {
        matches!(self, RegistryError::Rejected { .. })
    }
}

/// Errors returned by the engine handle.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine task has stopped.
    #[error("lifecycle engine is not running")]
    Stopped,

    /// Starting mDNS failed.
    #[error("discovery error: {0}")]
    Discovery(String),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<mdns_sd::Error> for EngineError {
    fn from(e: mdns_sd::Error) -> Self {
        EngineError::Discovery(e.to_string())
    }
}
