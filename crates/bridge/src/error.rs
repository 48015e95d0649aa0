//! Error types for the bridge crate.

use protocol::ProtocolError;
use thiserror::Error;

use crate::target::TargetId;

/// Bridge error type.
///
/// Session-level failures (authentication, unreachable backend, backend
/// errors) are not errors in this sense: the session controller absorbs them
/// into state transitions and notices. This type covers the calls that can
/// be refused outright.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The target's access policy forbids interactive sessions.
    #[error("interactive access is not allowed for target {target_id}")]
    AccessDenied {
        /// The refused target.
        target_id: TargetId,
    },

    /// No target with this id exists in the inventory.
    #[error("unknown target: {0}")]
    UnknownTarget(TargetId),

    /// The channel endpoint could not be derived.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// The inventory service could not be reached or answered with an error.
    #[error("inventory request failed: {0}")]
    Inventory(#[from] reqwest::Error),

    /// Encoding or decoding a channel message failed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Result type alias for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;
