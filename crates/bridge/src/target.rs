//! Remote endpoints eligible for interactive sessions.

use std::fmt;

use protocol::DEFAULT_REMOTE_PORT;
use serde::{Deserialize, Serialize};

/// Login name offered when the inventory does not name one.
pub const DEFAULT_USER: &str = "root";

/// Unique identifier of a target, as assigned by the inventory service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetId(String);

impl TargetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TargetId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for TargetId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Read-only snapshot of a remote endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Unique identifier.
    pub id: TargetId,
    /// Name shown in titles and notices.
    pub display_name: String,
    /// Network address handed to the backend.
    pub address: String,
    /// Remote shell port.
    pub port: u16,
    /// Username pre-filled in the credential prompt.
    pub default_user: String,
    /// Access policy: interactive sessions are refused when false.
    pub interactive_access_allowed: bool,
}

impl Target {
    /// Create a target with interactive access allowed, the default port and
    /// the default user. The display name starts out as the id.
    pub fn new(id: impl Into<TargetId>, address: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            display_name: id.to_string(),
            id,
            address: address.into(),
            port: DEFAULT_REMOTE_PORT,
            default_user: DEFAULT_USER.to_string(),
            interactive_access_allowed: true,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub fn with_default_user(mut self, user: impl Into<String>) -> Self {
        self.default_user = user.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_interactive_access(mut self, allowed: bool) -> Self {
        self.interactive_access_allowed = allowed;
        self
    }

    /// `name (address)` label used for prompt and window titles.
    pub fn label(&self) -> String {
        format!("{} ({})", self.display_name, self.address)
    }
}
