//! Error types.
//!
//! Caller misuse (`InvalidName`, `DuplicateEndpoint`) is returned before
//! anything touches the wire. Remote failures and timeouts are only ever the
//! outcome of awaiting a call.

use crate::config::ConfigError;
use crate::wire::SerializedError;
use std::time::Duration;
use thiserror::Error;

/// Result type for endpoint operations.
pub type RpcResult<T> = Result<T, RpcError>;

/// Errors surfaced by an [`Endpoint`](crate::Endpoint).
#[derive(Debug, Error)]
pub enum RpcError {
    /// Endpoint or event name was empty.
    #[error("invalid name: names must be non-empty strings")]
    InvalidName,

    /// A handler is already registered under this name.
    #[error("endpoint \"{0}\" is already registered")]
    DuplicateEndpoint(String),

    /// The peer's handler failed, or the peer has no such endpoint.
    #[error("remote error: {0}")]
    Remote(SerializedError),

    /// No matching response arrived in time.
    #[error("RPC \"{name}\" timed out after {}ms", .timeout.as_millis())]
    Timeout { name: String, timeout: Duration },

    /// The transport refused the request.
    #[error("channel unavailable while sending \"{0}\"")]
    ChannelUnavailable(String),

    /// The endpoint was closed while the call was outstanding.
    #[error("endpoint closed before \"{0}\" was answered")]
    Closed(String),

    /// Outstanding call limit reached.
    #[error("too many pending requests (limit {0})")]
    TooManyPending(usize),

    /// Endpoint created outside a tokio runtime.
    #[error("no tokio runtime available to run handlers")]
    NoRuntime,

    /// Invalid endpoint configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Typed payload could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RpcError {
    /// True for local timeouts.
    pub fn is_timeout(&self) -> bool {
        matches!(self, RpcError::Timeout { .. })
    }

    /// True for any error reported by the peer.
    pub fn is_remote(&self) -> bool {
        matches!(self, RpcError::Remote(_))
    }

    /// True if the peer reported that the endpoint does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RpcError::Remote(e) if e.is_not_found())
    }

    /// The peer's error data, if this is a remote error.
    pub fn remote(&self) -> Option<&SerializedError> {
        match self {
            RpcError::Remote(e) => Some(e),
            _ => None,
        }
    }
}
