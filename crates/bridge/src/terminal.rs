//! Terminal surface adapter.
//!
//! The rendering surface is an external widget. The adapter connects it to
//! the transport channel while a session is open: keystrokes become `input`
//! messages and `output` messages are written verbatim. Keystrokes reach the
//! controller as `Input` events; the adapter decides whether they go out.

use protocol::ClientMessage;

use crate::transport::TransportChannel;

/// Size of the rendering surface in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub cols: u16,
    pub rows: u16,
}

impl Default for Dimensions {
    fn default() -> Self {
        Self { cols: 80, rows: 24 }
    }
}

/// Screen-buffer widget that renders remote output.
pub trait TerminalSurface {
    /// Render bytes as received from the remote session.
    fn write(&mut self, data: &str);

    /// Re-fit the surface to its container and report the new size.
    fn fit(&mut self) -> Dimensions;
}

/// Connects one surface to one session's channel.
pub struct TerminalAdapter {
    surface: Box<dyn TerminalSurface>,
    wired: bool,
}

impl TerminalAdapter {
    pub fn new(surface: Box<dyn TerminalSurface>) -> Self {
        Self {
            surface,
            wired: false,
        }
    }

    pub fn wire(&mut self) {
        self.wired = true;
    }

    /// Disconnect from the channel. Safe to call any number of times.
    /// Returns whether the adapter was wired.
    pub fn unwire(&mut self) -> bool {
        std::mem::replace(&mut self.wired, false)
    }

    pub fn is_wired(&self) -> bool {
        self.wired
    }

    /// Forward a keystroke chunk as one `input` message.
    ///
    /// Returns `false` when the chunk was dropped because the adapter is not
    /// wired or the channel cannot be written.
    pub fn forward_input(&self, data: &str, channel: &mut dyn TransportChannel) -> bool {
        if !self.wired {
            tracing::trace!("Dropping input, adapter not wired");
            return false;
        }
        if !channel.is_ready() {
            tracing::debug!("Dropping input, channel not ready");
            return false;
        }
        channel.send(&ClientMessage::input(data))
    }

    /// Write an `output` payload to the surface. Dropped when not wired.
    pub fn render_output(&mut self, data: &str) -> bool {
        if !self.wired {
            tracing::trace!(len = data.len(), "Dropping output, adapter not wired");
            return false;
        }
        self.surface.write(data);
        true
    }

    /// Viewport changed: re-fit locally. Nothing is sent to the backend.
    pub fn refit(&mut self) -> Dimensions {
        self.surface.fit()
    }
}

impl std::fmt::Debug for TerminalAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminalAdapter")
            .field("wired", &self.wired)
            .finish_non_exhaustive()
    }
}
