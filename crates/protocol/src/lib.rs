//! # labshell protocol
//!
//! Message definitions for the duplex channel between the session bridge
//! and the remote execution backend.
//!
//! ## Overview
//!
//! - **Messages**: `connect`/`input`/`disconnect` actions sent by the client,
//!   `connected`/`output`/`error`/`disconnected` records sent by the backend
//! - **Classification**: deciding whether a backend error means the
//!   credentials were rejected
//! - **Errors**: decode and encode failures
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{BackendMessage, ClientMessage, ErrorClassifier};
//!
//! let hello = ClientMessage::connect("10.0.0.5", 22, "root", "pw");
//! let text = hello.to_json().unwrap();
//! assert!(text.contains("\"action\":\"connect\""));
//!
//! let reply = BackendMessage::from_json(r#"{"type":"error","message":"Authentication failed"}"#).unwrap();
//! if let BackendMessage::Error { message, kind } = reply {
//!     assert!(ErrorClassifier::default().is_auth_failure(&message, kind));
//! }
//! ```

pub mod classify;
pub mod error;
pub mod messages;

pub use classify::{ErrorClassifier, DEFAULT_AUTH_MARKERS};
pub use error::{ProtocolError, Result};
pub use messages::{BackendMessage, ClientMessage, ConnectRequest, ErrorKind, DEFAULT_REMOTE_PORT};
