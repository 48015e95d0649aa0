//! Interactive session lifecycle.
//!
//! One [`SessionController`] owns every session, keyed by target. All
//! asynchronous completions (channel events, prompt answers, timers) reach it
//! as [`Event`]s through a single queue, so session state is only ever
//! touched from one place.

mod controller;

use std::fmt;
use std::time::Duration;

use protocol::ErrorKind;

use crate::prompt::{PromptOutcome, PromptTicket};
use crate::target::TargetId;
use crate::transport::{ChannelEvent, ChannelKey};

pub use controller::{ControllerSettings, OpenOutcome, SessionController, DEFAULT_HANDSHAKE_TIMEOUT};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Created, nothing in flight. Also reached when the prompt is cancelled.
    Idle,
    /// Waiting for the user to answer the credential prompt.
    AwaitingCredentials,
    /// Channel opened, waiting for the backend's `connected`.
    Connecting,
    /// Remote shell attached.
    Open,
    /// User requested close, teardown in progress.
    Closing,
    /// Terminal state after close or remote disconnect.
    Closed,
    /// Terminal state after an unrecoverable error.
    Failed,
}

impl ConnectionState {
    /// States in which a new open for the same target focuses the existing
    /// session instead of starting another.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            ConnectionState::AwaitingCredentials
                | ConnectionState::Connecting
                | ConnectionState::Open
                | ConnectionState::Closing
        )
    }

    /// States in which nothing more will happen without a new open.
    pub fn is_finished(self) -> bool {
        matches!(
            self,
            ConnectionState::Idle | ConnectionState::Closed | ConnectionState::Failed
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::AwaitingCredentials => "awaiting credentials",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
            ConnectionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Why a session ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionFailure {
    /// The channel errored or closed before the remote shell attached.
    TransportUnavailable { cause: String },
    /// The backend reported a non-authentication error.
    BackendReported { message: String, kind: ErrorKind },
    /// The backend never answered the `connect` message.
    HandshakeTimedOut { after: Duration },
}

impl fmt::Display for SessionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionFailure::TransportUnavailable { cause } => {
                write!(f, "backend unreachable: {}", cause)
            }
            SessionFailure::BackendReported { message, .. } => f.write_str(message),
            SessionFailure::HandshakeTimedOut { after } => {
                write!(f, "no response from backend after {}s", after.as_secs())
            }
        }
    }
}

/// User-facing notifications emitted by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    /// An open for an already active session brought it to the front.
    Focused,
    /// A channel was opened for `username@address`.
    Connecting { username: String, address: String },
    /// The remote shell attached.
    Connected { banner: Option<String> },
    /// The backend rejected the credential; the prompt is shown again.
    AuthenticationFailed { message: String },
    Failed(SessionFailure),
    /// The remote side ended an open session.
    Disconnected { reason: Option<String> },
    /// The user closed the session.
    Closed,
}

/// Receives notices for the frontend.
pub trait Notifier {
    fn notify(&mut self, target_id: &TargetId, notice: Notice);
}

/// Schedules handshake deadlines.
///
/// When the deadline passes the implementation must deliver
/// [`Event::HandshakeTimeout`] with the same key. Deadlines for channels that
/// are gone by then are ignored by the controller.
pub trait Timer {
    fn arm(&mut self, key: ChannelKey, after: Duration);

    /// Cancel the deadline for `key`. No-op if it already fired or was never
    /// armed.
    fn disarm(&mut self, key: &ChannelKey);
}

/// Input to the controller's event loop.
#[derive(Debug)]
pub enum Event {
    /// The user closed the session's surface.
    CloseRequested { target_id: TargetId },
    /// The credential prompt was answered.
    PromptResolved {
        ticket: PromptTicket,
        outcome: PromptOutcome,
    },
    /// Keystrokes typed into the session's surface.
    Input { target_id: TargetId, data: String },
    /// The viewport changed size.
    Resized { target_id: TargetId },
    /// Something happened on a channel.
    Channel { key: ChannelKey, event: ChannelEvent },
    /// A handshake deadline passed.
    HandshakeTimeout { key: ChannelKey },
    /// Forget the cached credential for a target.
    ClearCredentials { target_id: TargetId },
}
