//! Local terminal frontend.
//!
//! Runs interactive sessions for one target in the current terminal. The
//! terminal is put in raw mode and acts as the rendering surface; the
//! credential prompt is a one-line form drawn in place; status notices are
//! printed as highlighted lines between remote output. When a session ends
//! a menu offers to reconnect with the cached credential, forget it, clear
//! the screen or quit.

use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;
use std::time::Duration;

use anyhow::{Context, Result};
use crossterm::event::{self, Event as TermEvent};
use crossterm::terminal::{self, disable_raw_mode, enable_raw_mode};

use super::keys::{self, MenuAction};
use crate::prompt::{CredentialPrompt, FormKey, PromptField, PromptForm, PromptOutcome, PromptTicket};
use crate::runtime::{event_queue, EventQueue, EventSender, TokioTimer};
use crate::session::{
    ConnectionState, ControllerSettings, Event, Notice, Notifier, OpenOutcome, SessionController,
};
use crate::target::{Target, TargetId};
use crate::terminal::{Dimensions, TerminalSurface};
use crate::transport::WebSocketChannelFactory;

/// How often the key loop looks at the terminal when no events arrive.
const KEY_POLL_INTERVAL: Duration = Duration::from_millis(20);

const CLEAR_SCREEN: &[u8] = b"\x1b[2J\x1b[H";

fn emit(out: &mut dyn Write, bytes: &[u8], what: &'static str) {
    if let Err(e) = out.write_all(bytes).and_then(|_| out.flush()) {
        tracing::warn!(error = %e, what, "Failed to write to terminal");
    }
}

/// `Write` handle to the process's stdout that can be cloned into every
/// frontend component.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutWriter;

impl Write for StdoutWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stdout().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stdout().flush()
    }
}

/// Writes remote output straight to the terminal.
pub struct ConsoleSurface<W: Write> {
    out: W,
}

impl<W: Write> ConsoleSurface<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl<W: Write> TerminalSurface for ConsoleSurface<W> {
    fn write(&mut self, data: &str) {
        emit(&mut self.out, data.as_bytes(), "output");
    }

    fn fit(&mut self) -> Dimensions {
        terminal::size()
            .map(|(cols, rows)| Dimensions { cols, rows })
            .unwrap_or_default()
    }
}

#[derive(Debug)]
struct ActivePrompt {
    ticket: PromptTicket,
    form: PromptForm,
}

/// The prompt currently shown, shared between [`ConsolePrompt`] and the key
/// loop.
#[derive(Debug, Clone, Default)]
pub struct PromptSlot(Rc<RefCell<Option<ActivePrompt>>>);

impl PromptSlot {
    pub fn is_active(&self) -> bool {
        self.0.borrow().is_some()
    }

    /// Feed a key to the form. Returns the ticket and outcome once the form
    /// is finished; the slot is empty afterwards.
    pub fn handle_key(&self, key: FormKey) -> Option<(PromptTicket, PromptOutcome)> {
        let mut slot = self.0.borrow_mut();
        let outcome = slot.as_mut()?.form.handle_key(key)?;
        slot.take().map(|active| (active.ticket, outcome))
    }

    /// Redraw the form line.
    pub fn redraw(&self, out: &mut dyn Write) -> io::Result<()> {
        if let Some(active) = self.0.borrow().as_ref() {
            out.write_all(render_form(&active.form).as_bytes())?;
            out.flush()?;
        }
        Ok(())
    }

    fn show(&self, ticket: PromptTicket, form: PromptForm) {
        *self.0.borrow_mut() = Some(ActivePrompt { ticket, form });
    }

    fn withdraw(&self, ticket: &PromptTicket) -> bool {
        let mut slot = self.0.borrow_mut();
        if slot.as_ref().is_some_and(|a| &a.ticket == ticket) {
            *slot = None;
            return true;
        }
        false
    }
}

/// One-line rendering of the form. The focused field is marked with `>`.
pub fn render_form(form: &PromptForm) -> String {
    let mark = |field: PromptField| if form.focus() == field { ">" } else { " " };
    format!(
        "\r\x1b[2K{}  {}user: {}  {}password: {}",
        form.title(),
        mark(PromptField::Username),
        form.username(),
        mark(PromptField::Secret),
        form.masked_secret(),
    )
}

/// Shows the credential form in the terminal.
pub struct ConsolePrompt<W: Write> {
    slot: PromptSlot,
    out: W,
}

impl<W: Write> ConsolePrompt<W> {
    pub fn new(slot: PromptSlot, out: W) -> Self {
        Self { slot, out }
    }
}

impl<W: Write> CredentialPrompt for ConsolePrompt<W> {
    fn request(&mut self, ticket: PromptTicket, target: &Target) {
        tracing::debug!(ticket = %ticket, "Showing credential prompt");
        self.slot.show(ticket, PromptForm::new(target));
        emit(&mut self.out, b"\r\n", "prompt");
        if let Err(e) = self.slot.redraw(&mut self.out) {
            tracing::warn!(error = %e, "Failed to draw credential prompt");
        }
    }

    fn dismiss(&mut self, ticket: &PromptTicket) {
        if self.slot.withdraw(ticket) {
            emit(&mut self.out, b"\r\x1b[2K", "prompt");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Info,
    Success,
    Error,
}

impl Tone {
    fn ansi(self) -> &'static str {
        match self {
            Tone::Info => "\x1b[33m",
            Tone::Success => "\x1b[32m",
            Tone::Error => "\x1b[31m",
        }
    }
}

/// Text shown for a notice, if any.
pub fn describe(notice: &Notice) -> Option<(Tone, String)> {
    let line = match notice {
        Notice::StateChanged { .. } => return None,
        Notice::Focused => (Tone::Info, "Session is already open".to_string()),
        Notice::Connecting { username, address } => {
            (Tone::Info, format!("Connecting to {}@{}...", username, address))
        }
        Notice::Connected { banner } => (
            Tone::Success,
            banner.clone().unwrap_or_else(|| "Connected".to_string()),
        ),
        Notice::AuthenticationFailed { message } => (
            Tone::Error,
            format!("{}. Please enter your credentials again.", message),
        ),
        Notice::Failed(failure) => (Tone::Error, format!("Error: {}", failure)),
        Notice::Disconnected { reason: Some(reason) } => {
            (Tone::Info, format!("Connection closed: {}", reason))
        }
        Notice::Disconnected { reason: None } => (Tone::Info, "Connection closed".to_string()),
        Notice::Closed => (Tone::Info, "Session closed".to_string()),
    };
    Some(line)
}

fn status_line(tone: Tone, text: &str) -> String {
    format!("\r\n{}[labshell]\x1b[0m {}\r\n", tone.ansi(), text)
}

/// Keys offered once a session has ended.
pub fn menu_line() -> String {
    status_line(
        Tone::Info,
        "r: reconnect  f: forget credential  c: clear screen  q: quit",
    )
}

/// Prints notices as status lines.
pub struct ConsoleNotifier<W: Write> {
    out: W,
}

impl<W: Write> ConsoleNotifier<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl<W: Write> Notifier for ConsoleNotifier<W> {
    fn notify(&mut self, target_id: &TargetId, notice: Notice) {
        let Some((tone, text)) = describe(&notice) else {
            return;
        };
        tracing::debug!(target_id = %target_id, notice = %text, "Notice");
        emit(&mut self.out, status_line(tone, &text).as_bytes(), "notice");
    }
}

/// Raw mode for the lifetime of the guard.
pub struct RawModeGuard {
    _private: (),
}

impl RawModeGuard {
    pub fn enable() -> io::Result<Self> {
        enable_raw_mode()?;
        Ok(Self { _private: () })
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        // Best effort cleanup
        let _ = disable_raw_mode();
    }
}

/// Interactive sessions for one target in the local terminal.
///
/// The controller and its credential cache live as long as the console, so
/// reconnecting after a session ended reuses the accepted credential.
pub struct ConsoleSession<W: Write + Clone + 'static = StdoutWriter> {
    controller: SessionController,
    events: EventSender,
    queue: EventQueue,
    prompt: PromptSlot,
    target: Target,
    out: W,
    /// Finished state of the last session while the menu is shown.
    menu: Option<ConnectionState>,
}

impl ConsoleSession {
    pub fn new(settings: ControllerSettings, target: Target) -> Self {
        Self::with_output(settings, target, StdoutWriter)
    }
}

impl<W: Write + Clone + 'static> ConsoleSession<W> {
    /// Console writing everything to `out` instead of stdout.
    pub fn with_output(settings: ControllerSettings, target: Target, out: W) -> Self {
        let (events, queue) = event_queue();
        let prompt = PromptSlot::default();
        let controller = SessionController::new(
            settings,
            Box::new(WebSocketChannelFactory::new(events.clone())),
            Box::new(ConsolePrompt::new(prompt.clone(), out.clone())),
            Box::new(ConsoleNotifier::new(out.clone())),
            Box::new(TokioTimer::new(events.clone())),
        );
        Self {
            controller,
            events,
            queue,
            prompt,
            target,
            out,
            menu: None,
        }
    }

    pub fn controller(&self) -> &SessionController {
        &self.controller
    }

    /// State of the target's session, if one was opened.
    pub fn state(&self) -> Option<ConnectionState> {
        self.controller.state(&self.target.id)
    }

    /// Run sessions until the user quits. Returns the state the last session
    /// finished in.
    pub async fn run(mut self) -> Result<ConnectionState> {
        let _raw = RawModeGuard::enable().context("Failed to enable raw mode")?;
        self.open()?;

        loop {
            tokio::select! {
                event = self.queue.next() => match event {
                    Some(event) => self.handle_event(event),
                    None => break,
                },
                _ = tokio::time::sleep(KEY_POLL_INTERVAL) => {}
            }

            while event::poll(Duration::ZERO)? {
                let event = event::read()?;
                if !self.dispatch(event)? {
                    return Ok(self.last_state());
                }
            }
        }

        Ok(self.last_state())
    }

    /// Open (or reopen) the target's session.
    fn open(&mut self) -> crate::Result<OpenOutcome> {
        self.menu = None;
        let surface = Box::new(ConsoleSurface::new(self.out.clone()));
        self.controller.open(self.target.clone(), surface)
    }

    fn handle_event(&mut self, event: Event) {
        self.controller.handle(event);
        self.show_menu_if_finished();
    }

    fn show_menu_if_finished(&mut self) {
        if self.menu.is_some() {
            return;
        }
        if let Some(state) = self.state().filter(|state| state.is_finished()) {
            self.menu = Some(state);
            emit(&mut self.out, menu_line().as_bytes(), "menu");
        }
    }

    fn last_state(&self) -> ConnectionState {
        self.menu
            .or_else(|| self.state())
            .unwrap_or(ConnectionState::Closed)
    }

    /// Returns `false` once the user asked to quit.
    fn dispatch(&mut self, event: TermEvent) -> crate::Result<bool> {
        match event {
            TermEvent::Key(key) if keys::is_press(&key) => {
                if self.menu.is_some() {
                    return match keys::menu_action(&key) {
                        Some(action) => self.apply(action),
                        None => Ok(true),
                    };
                }
                if keys::is_close_chord(&key) {
                    self.controller.close(&self.target.id);
                } else if self.prompt.is_active() {
                    self.on_prompt_key(keys::form_key(&key));
                } else if let Some(data) = keys::encode_key(&key) {
                    self.controller.handle(Event::Input {
                        target_id: self.target.id.clone(),
                        data,
                    });
                }
            }
            TermEvent::Resize(_, _) => self.controller.handle(Event::Resized {
                target_id: self.target.id.clone(),
            }),
            _ => {}
        }
        self.show_menu_if_finished();
        Ok(true)
    }

    fn apply(&mut self, action: MenuAction) -> crate::Result<bool> {
        tracing::debug!(target_id = %self.target.id, action = ?action, "Menu action");
        match action {
            MenuAction::Reconnect => {
                self.open()?;
                self.show_menu_if_finished();
            }
            MenuAction::ForgetCredential => {
                self.events.post(Event::ClearCredentials {
                    target_id: self.target.id.clone(),
                });
                let line = status_line(
                    Tone::Info,
                    &format!("Credential for {} forgotten", self.target.label()),
                );
                emit(&mut self.out, line.as_bytes(), "notice");
            }
            MenuAction::ClearScreen => {
                emit(&mut self.out, CLEAR_SCREEN, "clear");
                emit(&mut self.out, menu_line().as_bytes(), "menu");
            }
            MenuAction::Quit => return Ok(false),
        }
        Ok(true)
    }

    fn on_prompt_key(&mut self, key: Option<FormKey>) {
        let Some(key) = key else {
            return;
        };
        match self.prompt.handle_key(key) {
            Some((ticket, outcome)) => {
                emit(&mut self.out, b"\r\n", "prompt");
                self.controller
                    .handle(Event::PromptResolved { ticket, outcome });
            }
            None => {
                if let Err(e) = self.prompt.redraw(&mut self.out) {
                    tracing::warn!(error = %e, "Failed to redraw credential prompt");
                }
            }
        }
    }
}
