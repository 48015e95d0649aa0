//! In-memory credential cache.
//!
//! Credentials live only in process memory. They are never written to disk
//! and never logged; the secret is wiped when the last copy is dropped.

use std::collections::HashMap;
use std::fmt;

use zeroize::Zeroizing;

use crate::target::TargetId;

/// Login secret. `Debug` never shows the content.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(Zeroizing<String>);

impl Secret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(Zeroizing::new(secret.into()))
    }

    /// Borrow the plain secret. Only the `connect` message needs this.
    pub fn expose(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret(*** {} bytes ***)", self.0.len())
    }
}

/// Username and secret accepted from the prompt or reused from the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub secret: Secret,
}

impl Credential {
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: Secret::new(secret),
        }
    }

    /// Both fields must be non-empty for a credential to be usable.
    pub fn is_complete(&self) -> bool {
        !self.username.is_empty() && !self.secret.is_empty()
    }
}

/// Last-accepted credential per target.
///
/// At most one entry per target; entries for different targets are
/// independent keys.
#[derive(Debug, Default)]
pub struct CredentialCache {
    entries: HashMap<TargetId, Credential>,
}

impl CredentialCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, target_id: &TargetId) -> Option<&Credential> {
        self.entries.get(target_id)
    }

    /// Store a credential, replacing any previous entry for the target.
    pub fn put(&mut self, target_id: TargetId, credential: Credential) {
        tracing::debug!(target_id = %target_id, username = %credential.username, "Caching credential");
        self.entries.insert(target_id, credential);
    }

    /// Remove the entry for a target. No-op if absent.
    pub fn invalidate(&mut self, target_id: &TargetId) {
        if self.entries.remove(target_id).is_some() {
            tracing::debug!(target_id = %target_id, "Evicted cached credential");
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
