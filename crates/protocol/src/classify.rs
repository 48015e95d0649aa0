//! Classification of backend `error` messages.
//!
//! Backends that send an explicit [`ErrorKind`] are trusted as-is. For
//! backends that only send free text, the message is matched
//! case-insensitively against a list of authentication markers.

use crate::messages::ErrorKind;

/// Markers used when a backend omits `kind`.
pub const DEFAULT_AUTH_MARKERS: &[&str] = &["authentication", "authentifizierung"];

/// Decides whether a backend error was caused by rejected credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorClassifier {
    /// Lowercased markers.
    markers: Vec<String>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_AUTH_MARKERS.iter().copied())
    }
}

impl ErrorClassifier {
    /// Create a classifier from a list of markers. Empty markers are skipped.
    pub fn new<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            markers: markers
                .into_iter()
                .map(|m| m.as_ref().trim().to_lowercase())
                .filter(|m| !m.is_empty())
                .collect(),
        }
    }

    /// Resolve the effective kind of an `error` message.
    pub fn classify(&self, message: &str, kind: Option<ErrorKind>) -> ErrorKind {
        if let Some(kind) = kind {
            return kind;
        }

        let lowered = message.to_lowercase();
        if self.markers.iter().any(|m| lowered.contains(m.as_str())) {
            ErrorKind::Auth
        } else {
            ErrorKind::Other
        }
    }

    /// Shorthand for `classify(..) == ErrorKind::Auth`.
    pub fn is_auth_failure(&self, message: &str, kind: Option<ErrorKind>) -> bool {
        self.classify(message, kind) == ErrorKind::Auth
    }
}
