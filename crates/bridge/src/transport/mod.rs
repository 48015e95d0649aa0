//! Transport channel to the remote execution backend.
//!
//! A channel is one duplex, message-framed connection per session. Opening
//! returns a handle immediately; readiness, messages, errors and closure are
//! reported later as [`ChannelEvent`]s tagged with the channel's
//! [`ChannelKey`] and delivered through the controller's event queue.

pub mod websocket;

use std::fmt;

use protocol::ClientMessage;
use url::Url;

use crate::error::{BridgeError, Result};
use crate::target::TargetId;

pub use websocket::{WebSocketChannel, WebSocketChannelFactory};

/// Well-known path of the session endpoint on the dashboard origin.
pub const DEFAULT_ENDPOINT_PATH: &str = "/ws/ssh";

/// Identifies one channel instance.
///
/// Generations are never reused, so events from a channel that was replaced
/// or closed no longer match the session and are dropped.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelKey {
    pub target_id: TargetId,
    pub generation: u64,
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.target_id, self.generation)
    }
}

/// Asynchronous events reported by a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The underlying connection is ready to write.
    Opened,
    /// One text frame from the backend, not yet decoded.
    Message(String),
    /// The connection failed.
    Error(String),
    /// The connection closed.
    Closed {
        code: Option<u16>,
        reason: String,
    },
}

/// Handle to an open (or opening) channel.
pub trait TransportChannel {
    /// Whether the underlying connection accepts writes.
    fn is_ready(&self) -> bool;

    /// Enqueue a message. Returns `false` without raising when the channel is
    /// not ready.
    fn send(&mut self, message: &ClientMessage) -> bool;

    /// Close the channel. Idempotent and valid in every state, including
    /// before the connection completed.
    fn close(&mut self);
}

/// Creates channels.
pub trait ChannelFactory {
    fn open(&mut self, key: ChannelKey, endpoint: &Url) -> Box<dyn TransportChannel>;
}

/// Derive the session endpoint from the dashboard base URL:
/// `http` becomes `ws`, `https` becomes `wss`, and the path is replaced by
/// the well-known endpoint path.
pub fn session_endpoint(base: &Url, path: &str) -> Result<Url> {
    let scheme = match base.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(BridgeError::InvalidEndpoint(format!(
                "unsupported scheme '{}' in {}",
                other, base
            )))
        }
    };

    if !path.starts_with('/') {
        return Err(BridgeError::InvalidEndpoint(format!(
            "endpoint path must start with '/', got {}",
            path
        )));
    }

    let mut url = base.clone();
    url.set_scheme(scheme)
        .map_err(|_| BridgeError::InvalidEndpoint(format!("cannot use scheme {} for {}", scheme, base)))?;
    url.set_path(path);
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}
