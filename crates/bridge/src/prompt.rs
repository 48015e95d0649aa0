//! Credential prompt coordination.
//!
//! The session controller never blocks on the prompt. It calls
//! [`CredentialPrompt::request`] with a [`PromptTicket`] and later receives
//! the answer as a `PromptResolved` event carrying the same ticket. A ticket
//! that no longer matches the session's pending prompt is ignored.
//!
//! [`PromptForm`] is the frontend-independent model of the prompt dialog:
//! the username is pre-filled from the target, Enter submits, Escape
//! cancels, and an empty field turns a submission into a cancellation.

use std::fmt;

use zeroize::Zeroizing;

use crate::credentials::Credential;
use crate::target::{Target, TargetId};

/// Identifies one prompt request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PromptTicket {
    pub target_id: TargetId,
    pub attempt: u64,
}

impl fmt::Display for PromptTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.target_id, self.attempt)
    }
}

/// Result of a prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptOutcome {
    Submitted(Credential),
    Cancelled,
}

/// Presents the credential prompt to the user.
pub trait CredentialPrompt {
    /// Show the prompt for `target`. The answer must be delivered back to
    /// the controller tagged with `ticket`.
    fn request(&mut self, ticket: PromptTicket, target: &Target);

    /// Withdraw a pending prompt because the session went away.
    fn dismiss(&mut self, ticket: &PromptTicket);
}

/// Field of the prompt form that receives typed characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptField {
    Username,
    Secret,
}

/// Keys understood by the prompt form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormKey {
    Char(char),
    Backspace,
    Tab,
    Enter,
    Escape,
}

/// Editable credential dialog.
pub struct PromptForm {
    title: String,
    username: String,
    secret: Zeroizing<String>,
    focus: PromptField,
}

impl fmt::Debug for PromptForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PromptForm")
            .field("title", &self.title)
            .field("username", &self.username)
            .field("focus", &self.focus)
            .finish_non_exhaustive()
    }
}

impl PromptForm {
    /// Create the form for a target. The cursor starts in the secret field
    /// because the username is usually right.
    pub fn new(target: &Target) -> Self {
        Self {
            title: target.label(),
            username: target.default_user.clone(),
            secret: Zeroizing::new(String::new()),
            focus: PromptField::Secret,
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// One `*` per secret character.
    pub fn masked_secret(&self) -> String {
        "*".repeat(self.secret.chars().count())
    }

    pub fn focus(&self) -> PromptField {
        self.focus
    }

    /// Apply a key. Returns the outcome once the form is finished.
    pub fn handle_key(&mut self, key: FormKey) -> Option<PromptOutcome> {
        match key {
            FormKey::Char(c) => {
                self.field_mut().push(c);
                None
            }
            FormKey::Backspace => {
                self.field_mut().pop();
                None
            }
            FormKey::Tab => {
                self.focus = match self.focus {
                    PromptField::Username => PromptField::Secret,
                    PromptField::Secret => PromptField::Username,
                };
                None
            }
            FormKey::Enter => Some(self.submit()),
            FormKey::Escape => Some(PromptOutcome::Cancelled),
        }
    }

    fn submit(&mut self) -> PromptOutcome {
        let username = self.username.trim();
        if username.is_empty() || self.secret.is_empty() {
            tracing::debug!(title = %self.title, "Prompt submitted with an empty field");
            return PromptOutcome::Cancelled;
        }
        PromptOutcome::Submitted(Credential::new(username, self.secret.as_str()))
    }

    fn field_mut(&mut self) -> &mut String {
        match self.focus {
            PromptField::Username => &mut self.username,
            PromptField::Secret => &mut *self.secret,
        }
    }
}
