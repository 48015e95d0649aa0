//! # labshell session bridge
//!
//! Client side of interactive remote sessions for the homelab dashboard:
//! the user picks a target, supplies credentials, and gets a live terminal
//! whose keystrokes and output travel over a duplex channel to a remote
//! execution backend.
//!
//! ## Overview
//!
//! - **Session controller**: per-target lifecycle, from credential prompt
//!   through `connected` to close, with at most one session per target
//! - **Credential cache**: last accepted credential per target, in memory
//!   only, evicted when the backend rejects it
//! - **Transport**: WebSocket channel per session, events posted to one queue
//! - **Terminal adapter**: wires the rendering surface to the channel while
//!   the session is open
//! - **Inventory**: targets and their access policy from the dashboard
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                    Session Controller                      │
//! │   registry: TargetId -> Session     CredentialCache        │
//! ├──────────────┬──────────────┬──────────────┬───────────────┤
//! │ Credential   │  Terminal    │  Notifier    │  Timer        │
//! │ Prompt       │  Adapter     │              │               │
//! └──────┬───────┴──────┬───────┴──────────────┴───────┬───────┘
//!        │              │                              │
//!        │       ┌──────▼──────────┐                   │
//!        │       │ TransportChannel│  (WebSocket task) │
//!        │       └──────┬──────────┘                   │
//!        │              │ ChannelEvent                 │
//!        ▼              ▼                              ▼
//! ┌────────────────────────────────────────────────────────────┐
//! │                        Event queue                         │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bridge::{Config, ConsoleSession, InventoryClient, TargetId};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default()?;
//!     let client = InventoryClient::new(
//!         &config.base_url()?,
//!         &config.dashboard.inventory_path,
//!         config.request_timeout(),
//!     )?;
//!     let inventory = client.fetch().await?;
//!
//!     let id = TargetId::new("srv1");
//!     let target = inventory.require(&id)?.clone();
//!     let session = ConsoleSession::new(config.controller_settings()?, target);
//!     let state = session.run().await?;
//!     println!("session ended: {}", state);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod credentials;
pub mod error;
pub mod inventory;
pub mod logging;
pub mod prompt;
pub mod runtime;
pub mod session;
pub mod target;
pub mod terminal;
pub mod transport;
pub mod ui;

pub use config::{Config, ConfigError};
pub use credentials::{Credential, CredentialCache, Secret};
pub use error::{BridgeError, Result};
pub use inventory::{Inventory, InventoryClient};
pub use prompt::{CredentialPrompt, FormKey, PromptForm, PromptOutcome, PromptTicket};
pub use runtime::{event_queue, EventQueue, EventSender, TokioTimer};
pub use session::{
    ConnectionState, ControllerSettings, Event, Notice, Notifier, OpenOutcome, SessionController,
    SessionFailure, Timer,
};
pub use target::{Target, TargetId};
pub use terminal::{Dimensions, TerminalAdapter, TerminalSurface};
pub use transport::{
    session_endpoint, ChannelEvent, ChannelFactory, ChannelKey, TransportChannel,
    WebSocketChannel, WebSocketChannelFactory,
};
pub use ui::{ConsoleSession, MenuAction};
