//! Wire message definitions for the session channel.
//!
//! Every message is a single JSON object carried in one text frame.
//! Client messages are tagged by `action`, backend messages by `type`.

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::error::Result;

/// Default remote shell port used when a target does not name one.
pub const DEFAULT_REMOTE_PORT: u16 = 22;

// ============================================================================
// Client -> Backend
// ============================================================================

/// Messages sent from the bridge to the remote execution backend.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Start the remote session. Sent exactly once per channel, right after
    /// the channel becomes writable.
    Connect(ConnectRequest),
    /// Raw keystroke or paste chunk typed by the user.
    Input {
        /// Bytes exactly as produced by the rendering surface.
        data: String,
    },
    /// Ask the backend to end the remote session before the channel closes.
    Disconnect,
}

/// Payload of the `connect` action.
///
/// The password is wiped when the request is dropped. The encoded frame is
/// owned by the transport once it is sent and is not wiped.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectRequest {
    /// Network address of the target.
    pub host: String,
    /// Remote shell port.
    pub port: u16,
    /// Login name.
    pub username: String,
    /// Login secret.
    pub password: String,
}

impl std::fmt::Debug for ClientMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientMessage::Connect(req) => f.debug_tuple("Connect").field(req).finish(),
            ClientMessage::Input { data } => f
                .debug_struct("Input")
                .field("len", &data.len())
                .finish(),
            ClientMessage::Disconnect => f.write_str("Disconnect"),
        }
    }
}

impl std::fmt::Debug for ConnectRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectRequest")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Zeroize for ConnectRequest {
    fn zeroize(&mut self) {
        self.password.zeroize();
    }
}

impl Drop for ConnectRequest {
    fn drop(&mut self) {
        self.zeroize();
    }
}

impl ClientMessage {
    /// Build a `connect` message.
    pub fn connect(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        ClientMessage::Connect(ConnectRequest {
            host: host.into(),
            port,
            username: username.into(),
            password: password.into(),
        })
    }

    /// Build an `input` message.
    pub fn input(data: impl Into<String>) -> Self {
        ClientMessage::Input { data: data.into() }
    }

    /// Short name used in log fields.
    pub fn action(&self) -> &'static str {
        match self {
            ClientMessage::Connect(_) => "connect",
            ClientMessage::Input { .. } => "input",
            ClientMessage::Disconnect => "disconnect",
        }
    }

    /// Serialize to the JSON text sent over the channel.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a client message. Used by backends and test harnesses.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

// ============================================================================
// Backend -> Client
// ============================================================================

/// Explicit failure category attached to a backend `error` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// The supplied credentials were rejected.
    Auth,
    /// The backend could not reach the target.
    Network,
    /// Anything else.
    Other,
}

/// Messages sent from the backend to the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendMessage {
    /// Handshake with the target succeeded.
    Connected {
        /// Optional human-readable banner.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// Raw remote session output.
    Output {
        /// Bytes to render verbatim.
        data: String,
    },
    /// Handshake or runtime failure.
    Error {
        /// Human-readable description, shown to the user as-is.
        message: String,
        /// Failure category. Older backends omit it.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        kind: Option<ErrorKind>,
    },
    /// The backend ended the remote session cleanly.
    Disconnected {
        /// Optional reason.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl BackendMessage {
    /// Short name used in log fields.
    pub fn kind_name(&self) -> &'static str {
        match self {
            BackendMessage::Connected { .. } => "connected",
            BackendMessage::Output { .. } => "output",
            BackendMessage::Error { .. } => "error",
            BackendMessage::Disconnected { .. } => "disconnected",
        }
    }

    /// Parse one text frame.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Serialize to JSON. Used by backends and test harnesses.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
