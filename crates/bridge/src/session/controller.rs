use std::collections::HashMap;
use std::time::Duration;

use protocol::{BackendMessage, ClientMessage, ErrorClassifier, ErrorKind};
use url::Url;

use super::{ConnectionState, Event, Notice, Notifier, SessionFailure, Timer};
use crate::credentials::{Credential, CredentialCache};
use crate::error::{BridgeError, Result};
use crate::prompt::{CredentialPrompt, PromptOutcome, PromptTicket};
use crate::target::{Target, TargetId};
use crate::terminal::{TerminalAdapter, TerminalSurface};
use crate::transport::{ChannelEvent, ChannelFactory, ChannelKey, TransportChannel};

/// Time allowed between opening a channel and the backend's `connected`.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);

/// Controller settings.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// Session endpoint every channel is opened against.
    pub endpoint: Url,
    pub handshake_timeout: Duration,
    pub classifier: ErrorClassifier,
}

impl ControllerSettings {
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            classifier: ErrorClassifier::default(),
        }
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.classifier = classifier;
        self
    }
}

/// Result of [`SessionController::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    /// A new session was created and is now in the given state.
    Started(ConnectionState),
    /// A session for the target was already active and was focused instead.
    Focused(ConnectionState),
}

struct Session {
    target: Target,
    state: ConnectionState,
    adapter: TerminalAdapter,
    channel: Option<Box<dyn TransportChannel>>,
    channel_key: Option<ChannelKey>,
    credential: Option<Credential>,
    pending_prompt: Option<PromptTicket>,
    connect_sent: bool,
}

impl Session {
    fn new(target: Target, surface: Box<dyn TerminalSurface>) -> Self {
        Self {
            target,
            state: ConnectionState::Idle,
            adapter: TerminalAdapter::new(surface),
            channel: None,
            channel_key: None,
            credential: None,
            pending_prompt: None,
            connect_sent: false,
        }
    }
}

/// Owns the session registry and the credential cache.
///
/// At most one session exists per target id. Every session input is either
/// a direct call ([`open`](Self::open), [`close`](Self::close)) or an
/// [`Event`] passed to [`handle`](Self::handle).
pub struct SessionController {
    settings: ControllerSettings,
    sessions: HashMap<TargetId, Session>,
    cache: CredentialCache,
    channels: Box<dyn ChannelFactory>,
    prompt: Box<dyn CredentialPrompt>,
    notifier: Box<dyn Notifier>,
    timer: Box<dyn Timer>,
    generation: u64,
}

impl SessionController {
    pub fn new(
        settings: ControllerSettings,
        channels: Box<dyn ChannelFactory>,
        prompt: Box<dyn CredentialPrompt>,
        notifier: Box<dyn Notifier>,
        timer: Box<dyn Timer>,
    ) -> Self {
        Self {
            settings,
            sessions: HashMap::new(),
            cache: CredentialCache::new(),
            channels,
            prompt,
            notifier,
            timer,
            generation: 0,
        }
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    pub fn credentials(&self) -> &CredentialCache {
        &self.cache
    }

    /// Current state of the target's session, if one exists.
    pub fn state(&self, target_id: &TargetId) -> Option<ConnectionState> {
        self.sessions.get(target_id).map(|s| s.state)
    }

    pub fn target(&self, target_id: &TargetId) -> Option<&Target> {
        self.sessions.get(target_id).map(|s| &s.target)
    }

    /// All sessions with their states.
    pub fn sessions(&self) -> impl Iterator<Item = (&TargetId, ConnectionState)> {
        self.sessions.iter().map(|(id, s)| (id, s.state))
    }

    /// Open an interactive session, or focus the existing one.
    ///
    /// A cached credential goes straight to `Connecting`; otherwise the
    /// prompt is requested and the session waits in `AwaitingCredentials`.
    pub fn open(&mut self, target: Target, surface: Box<dyn TerminalSurface>) -> Result<OpenOutcome> {
        if !target.interactive_access_allowed {
            tracing::warn!(target_id = %target.id, "Interactive access not allowed");
            return Err(BridgeError::AccessDenied {
                target_id: target.id,
            });
        }

        if let Some(existing) = self.sessions.get(&target.id) {
            if existing.state.is_active() {
                let state = existing.state;
                tracing::info!(target_id = %target.id, state = %state, "Session already active, focusing");
                self.notifier.notify(&target.id, Notice::Focused);
                return Ok(OpenOutcome::Focused(state));
            }
        }

        let id = target.id.clone();
        tracing::info!(target_id = %id, address = %target.address, port = target.port, "Opening session");
        self.sessions.insert(id.clone(), Session::new(target, surface));

        match self.cache.get(&id).cloned() {
            Some(credential) => {
                tracing::debug!(target_id = %id, "Reusing cached credential");
                self.start_connect(&id, credential);
            }
            None => self.request_credentials(&id),
        }

        Ok(OpenOutcome::Started(
            self.state(&id).unwrap_or(ConnectionState::Idle),
        ))
    }

    /// Close a session on user request. Valid in every state; a no-op for
    /// unknown or already closed sessions.
    pub fn close(&mut self, target_id: &TargetId) {
        let Some(session) = self.sessions.get_mut(target_id) else {
            tracing::debug!(target_id = %target_id, "Close for unknown session");
            return;
        };
        if session.state == ConnectionState::Closed {
            return;
        }

        if let Some(ticket) = session.pending_prompt.take() {
            self.prompt.dismiss(&ticket);
        }

        transition(self.notifier.as_mut(), session, ConnectionState::Closing);
        if let Some(channel) = session.channel.as_mut() {
            if channel.is_ready() && !channel.send(&ClientMessage::Disconnect) {
                tracing::debug!(target_id = %target_id, "Could not send disconnect");
            }
        }
        teardown_channel(self.timer.as_mut(), session);
        transition(self.notifier.as_mut(), session, ConnectionState::Closed);
        self.notifier.notify(target_id, Notice::Closed);
    }

    /// Forget the cached credential for a target.
    pub fn clear_credentials(&mut self, target_id: &TargetId) {
        self.cache.invalidate(target_id);
    }

    /// Process one event from the queue.
    pub fn handle(&mut self, event: Event) {
        match event {
            Event::CloseRequested { target_id } => self.close(&target_id),
            Event::PromptResolved { ticket, outcome } => self.on_prompt_resolved(ticket, outcome),
            Event::Input { target_id, data } => self.on_input(&target_id, &data),
            Event::Resized { target_id } => self.on_resized(&target_id),
            Event::Channel { key, event } => self.on_channel_event(key, event),
            Event::HandshakeTimeout { key } => self.on_handshake_timeout(key),
            Event::ClearCredentials { target_id } => self.clear_credentials(&target_id),
        }
    }

    fn request_credentials(&mut self, id: &TargetId) {
        self.generation += 1;
        let Some(session) = self.sessions.get_mut(id) else {
            return;
        };
        let ticket = PromptTicket {
            target_id: id.clone(),
            attempt: self.generation,
        };
        session.pending_prompt = Some(ticket.clone());
        transition(self.notifier.as_mut(), session, ConnectionState::AwaitingCredentials);
        self.prompt.request(ticket, &session.target);
    }

    fn start_connect(&mut self, id: &TargetId, credential: Credential) {
        self.generation += 1;
        let Some(session) = self.sessions.get_mut(id) else {
            return;
        };
        let key = ChannelKey {
            target_id: id.clone(),
            generation: self.generation,
        };

        tracing::debug!(key = %key, endpoint = %self.settings.endpoint, "Opening channel");
        session.channel = Some(self.channels.open(key.clone(), &self.settings.endpoint));
        session.channel_key = Some(key.clone());
        session.connect_sent = false;

        let username = credential.username.clone();
        session.credential = Some(credential);
        transition(self.notifier.as_mut(), session, ConnectionState::Connecting);
        self.notifier.notify(
            id,
            Notice::Connecting {
                username,
                address: session.target.address.clone(),
            },
        );
        self.timer.arm(key, self.settings.handshake_timeout);
    }

    fn on_prompt_resolved(&mut self, ticket: PromptTicket, outcome: PromptOutcome) {
        let Some(session) = self.sessions.get_mut(&ticket.target_id) else {
            tracing::debug!(ticket = %ticket, "Prompt answer for unknown session");
            return;
        };
        if session.state != ConnectionState::AwaitingCredentials
            || session.pending_prompt.as_ref() != Some(&ticket)
        {
            tracing::debug!(ticket = %ticket, "Ignoring stale prompt answer");
            return;
        }
        session.pending_prompt = None;

        match outcome {
            PromptOutcome::Submitted(credential) if credential.is_complete() => {
                self.cache.put(ticket.target_id.clone(), credential.clone());
                self.start_connect(&ticket.target_id, credential);
            }
            _ => {
                tracing::info!(target_id = %ticket.target_id, "Credential prompt cancelled");
                transition(self.notifier.as_mut(), session, ConnectionState::Idle);
            }
        }
    }

    fn on_input(&mut self, id: &TargetId, data: &str) {
        let Some(session) = self.sessions.get_mut(id) else {
            return;
        };
        if session.state != ConnectionState::Open {
            tracing::trace!(target_id = %id, state = %session.state, "Dropping input");
            return;
        }
        if let Some(channel) = session.channel.as_mut() {
            session.adapter.forward_input(data, &mut **channel);
        }
    }

    fn on_resized(&mut self, id: &TargetId) {
        if let Some(session) = self.sessions.get_mut(id) {
            let dims = session.adapter.refit();
            tracing::debug!(target_id = %id, cols = dims.cols, rows = dims.rows, "Surface refitted");
        }
    }

    fn on_channel_event(&mut self, key: ChannelKey, event: ChannelEvent) {
        let Some(session) = self.sessions.get(&key.target_id) else {
            tracing::debug!(key = %key, "Channel event for unknown session");
            return;
        };
        if session.channel_key.as_ref() != Some(&key) {
            tracing::debug!(key = %key, event = ?event, "Dropping stale channel event");
            return;
        }

        let id = key.target_id;
        match event {
            ChannelEvent::Opened => self.send_connect(&id),
            ChannelEvent::Message(text) => match BackendMessage::from_json(&text) {
                Ok(message) => self.on_backend_message(&id, message),
                Err(e) => {
                    tracing::warn!(target_id = %id, error = %e, "Ignoring malformed backend message");
                }
            },
            ChannelEvent::Error(cause) => self.on_channel_lost(&id, cause.clone(), Some(cause)),
            ChannelEvent::Closed { code, reason } => {
                let cause = describe_close(code, &reason);
                let reason = (!reason.is_empty()).then_some(reason);
                self.on_channel_lost(&id, cause, reason);
            }
        }
    }

    fn send_connect(&mut self, id: &TargetId) {
        let Some(session) = self.sessions.get_mut(id) else {
            return;
        };
        if session.state != ConnectionState::Connecting || session.connect_sent {
            tracing::debug!(target_id = %id, state = %session.state, "Ignoring channel open");
            return;
        }
        let (Some(channel), Some(credential)) = (session.channel.as_mut(), session.credential.as_ref())
        else {
            return;
        };

        let message = ClientMessage::connect(
            &session.target.address,
            session.target.port,
            &credential.username,
            credential.secret.expose(),
        );
        if channel.send(&message) {
            session.connect_sent = true;
            tracing::debug!(target_id = %id, "Sent connect");
        } else {
            tracing::warn!(target_id = %id, "Channel not ready for connect");
        }
    }

    fn on_backend_message(&mut self, id: &TargetId, message: BackendMessage) {
        let Some(session) = self.sessions.get_mut(id) else {
            return;
        };
        let state = session.state;
        tracing::trace!(target_id = %id, kind = message.kind_name(), state = %state, "Backend message");

        match message {
            BackendMessage::Connected { message } => {
                if state != ConnectionState::Connecting {
                    tracing::debug!(target_id = %id, state = %state, "Ignoring connected");
                    return;
                }
                if let Some(key) = session.channel_key.as_ref() {
                    self.timer.disarm(key);
                }
                session.adapter.wire();
                transition(self.notifier.as_mut(), session, ConnectionState::Open);
                self.notifier.notify(id, Notice::Connected { banner: message });
            }
            BackendMessage::Output { data } => {
                if state != ConnectionState::Open {
                    tracing::debug!(target_id = %id, len = data.len(), "Dropping output before connected");
                    return;
                }
                session.adapter.render_output(&data);
            }
            BackendMessage::Error { message, kind } => {
                if !matches!(state, ConnectionState::Connecting | ConnectionState::Open) {
                    tracing::debug!(target_id = %id, state = %state, "Ignoring backend error");
                    return;
                }
                let kind = self.settings.classifier.classify(&message, kind);
                match kind {
                    ErrorKind::Auth => self.retry_authentication(id, message),
                    kind => self.fail(id, SessionFailure::BackendReported { message, kind }),
                }
            }
            BackendMessage::Disconnected { message } => match state {
                ConnectionState::Open => self.end_remotely(id, message),
                ConnectionState::Connecting => {
                    let message = message.unwrap_or_else(|| {
                        "backend ended the session before it was established".to_string()
                    });
                    self.fail(
                        id,
                        SessionFailure::BackendReported {
                            message,
                            kind: ErrorKind::Other,
                        },
                    );
                }
                _ => tracing::debug!(target_id = %id, state = %state, "Ignoring disconnected"),
            },
        }
    }

    fn on_channel_lost(&mut self, id: &TargetId, cause: String, reason: Option<String>) {
        match self.state(id) {
            Some(ConnectionState::Connecting) => {
                self.fail(id, SessionFailure::TransportUnavailable { cause });
            }
            Some(ConnectionState::Open) => self.end_remotely(id, reason),
            state => {
                tracing::debug!(target_id = %id, state = ?state, cause = %cause, "Ignoring channel loss");
            }
        }
    }

    fn on_handshake_timeout(&mut self, key: ChannelKey) {
        let Some(session) = self.sessions.get(&key.target_id) else {
            return;
        };
        if session.channel_key.as_ref() != Some(&key) || session.state != ConnectionState::Connecting {
            return;
        }
        let after = self.settings.handshake_timeout;
        self.fail(&key.target_id, SessionFailure::HandshakeTimedOut { after });
    }

    fn retry_authentication(&mut self, id: &TargetId, message: String) {
        self.cache.invalidate(id);
        if let Some(session) = self.sessions.get_mut(id) {
            teardown_channel(self.timer.as_mut(), session);
        }
        tracing::warn!(target_id = %id, "Authentication rejected, prompting again");
        self.notifier.notify(id, Notice::AuthenticationFailed { message });
        self.request_credentials(id);
    }

    fn fail(&mut self, id: &TargetId, failure: SessionFailure) {
        let Some(session) = self.sessions.get_mut(id) else {
            return;
        };
        tracing::warn!(target_id = %id, failure = %failure, "Session failed");
        teardown_channel(self.timer.as_mut(), session);
        transition(self.notifier.as_mut(), session, ConnectionState::Failed);
        self.notifier.notify(id, Notice::Failed(failure));
    }

    fn end_remotely(&mut self, id: &TargetId, reason: Option<String>) {
        let Some(session) = self.sessions.get_mut(id) else {
            return;
        };
        tracing::info!(target_id = %id, reason = ?reason, "Session ended by remote");
        teardown_channel(self.timer.as_mut(), session);
        transition(self.notifier.as_mut(), session, ConnectionState::Closed);
        self.notifier.notify(id, Notice::Disconnected { reason });
    }
}

fn transition(notifier: &mut dyn Notifier, session: &mut Session, to: ConnectionState) {
    let from = session.state;
    if from == to {
        return;
    }
    session.state = to;
    tracing::info!(target_id = %session.target.id, from = %from, to = %to, "Session state changed");
    notifier.notify(&session.target.id, Notice::StateChanged { from, to });
}

fn teardown_channel(timer: &mut dyn Timer, session: &mut Session) {
    session.adapter.unwire();
    if let Some(key) = session.channel_key.take() {
        timer.disarm(&key);
    }
    session.connect_sent = false;
    session.credential = None;
    if let Some(mut channel) = session.channel.take() {
        channel.close();
    }
}

fn describe_close(code: Option<u16>, reason: &str) -> String {
    match (code, reason.is_empty()) {
        (Some(code), true) => format!("channel closed (code {})", code),
        (Some(code), false) => format!("channel closed (code {}): {}", code, reason),
        (None, true) => "channel closed".to_string(),
        (None, false) => format!("channel closed: {}", reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terminal::Dimensions;
    use std::cell::RefCell;
    use std::rc::Rc;

    const ENDPOINT: &str = "ws://localhost:8000/ws/ssh";

    #[derive(Default)]
    struct Log {
        opened: Vec<(ChannelKey, Url)>,
        sent: Vec<(ChannelKey, ClientMessage)>,
        closed: Vec<ChannelKey>,
        prompts: Vec<(PromptTicket, String)>,
        dismissed: Vec<PromptTicket>,
        notices: Vec<(TargetId, Notice)>,
        timers: Vec<(ChannelKey, Duration)>,
        disarmed: Vec<ChannelKey>,
        written: Vec<String>,
        fits: usize,
    }

    type Shared = Rc<RefCell<Log>>;

    struct MockChannel {
        key: ChannelKey,
        log: Shared,
        open: bool,
    }

    impl TransportChannel for MockChannel {
        fn is_ready(&self) -> bool {
            self.open
        }

        fn send(&mut self, message: &ClientMessage) -> bool {
            if !self.open {
                return false;
            }
            self.log
                .borrow_mut()
                .sent
                .push((self.key.clone(), message.clone()));
            true
        }

        fn close(&mut self) {
            if std::mem::replace(&mut self.open, false) {
                self.log.borrow_mut().closed.push(self.key.clone());
            }
        }
    }

    struct MockFactory(Shared);

    impl ChannelFactory for MockFactory {
        fn open(&mut self, key: ChannelKey, endpoint: &Url) -> Box<dyn TransportChannel> {
            self.0
                .borrow_mut()
                .opened
                .push((key.clone(), endpoint.clone()));
            Box::new(MockChannel {
                key,
                log: self.0.clone(),
                open: true,
            })
        }
    }

    struct MockPrompt(Shared);

    impl CredentialPrompt for MockPrompt {
        fn request(&mut self, ticket: PromptTicket, target: &Target) {
            self.0
                .borrow_mut()
                .prompts
                .push((ticket, target.default_user.clone()));
        }

        fn dismiss(&mut self, ticket: &PromptTicket) {
            self.0.borrow_mut().dismissed.push(ticket.clone());
        }
    }

    struct MockNotifier(Shared);

    impl Notifier for MockNotifier {
        fn notify(&mut self, target_id: &TargetId, notice: Notice) {
            self.0
                .borrow_mut()
                .notices
                .push((target_id.clone(), notice));
        }
    }

    struct MockTimer(Shared);

    impl Timer for MockTimer {
        fn arm(&mut self, key: ChannelKey, after: Duration) {
            self.0.borrow_mut().timers.push((key, after));
        }

        fn disarm(&mut self, key: &ChannelKey) {
            self.0.borrow_mut().disarmed.push(key.clone());
        }
    }

    struct MockSurface(Shared);

    impl TerminalSurface for MockSurface {
        fn write(&mut self, data: &str) {
            self.0.borrow_mut().written.push(data.to_string());
        }

        fn fit(&mut self) -> Dimensions {
            self.0.borrow_mut().fits += 1;
            Dimensions::default()
        }
    }

    struct Harness {
        controller: SessionController,
        log: Shared,
    }

    fn harness() -> Harness {
        let log = Shared::default();
        let settings = ControllerSettings::new(Url::parse(ENDPOINT).unwrap());
        let controller = SessionController::new(
            settings,
            Box::new(MockFactory(log.clone())),
            Box::new(MockPrompt(log.clone())),
            Box::new(MockNotifier(log.clone())),
            Box::new(MockTimer(log.clone())),
        );
        Harness { controller, log }
    }

    fn srv(id: &str) -> Target {
        Target::new(id, "10.0.0.5")
    }

    fn id(id: &str) -> TargetId {
        TargetId::new(id)
    }

    impl Harness {
        fn open(&mut self, target: Target) -> Result<OpenOutcome> {
            let surface = Box::new(MockSurface(self.log.clone()));
            self.controller.open(target, surface)
        }

        fn state(&self, target: &str) -> ConnectionState {
            self.controller.state(&id(target)).unwrap()
        }

        fn last_prompt(&self) -> PromptTicket {
            self.log.borrow().prompts.last().unwrap().0.clone()
        }

        fn prompt_count(&self) -> usize {
            self.log.borrow().prompts.len()
        }

        fn answer(&mut self, username: &str, secret: &str) {
            let ticket = self.last_prompt();
            self.controller.handle(Event::PromptResolved {
                ticket,
                outcome: PromptOutcome::Submitted(Credential::new(username, secret)),
            });
        }

        fn cancel_prompt(&mut self) {
            let ticket = self.last_prompt();
            self.controller.handle(Event::PromptResolved {
                ticket,
                outcome: PromptOutcome::Cancelled,
            });
        }

        fn last_key(&self) -> ChannelKey {
            self.log.borrow().opened.last().unwrap().0.clone()
        }

        fn channel_event(&mut self, event: ChannelEvent) {
            let key = self.last_key();
            self.controller.handle(Event::Channel { key, event });
        }

        fn backend(&mut self, json: &str) {
            self.channel_event(ChannelEvent::Message(json.to_string()));
        }

        fn input(&mut self, target: &str, data: &str) {
            self.controller.handle(Event::Input {
                target_id: id(target),
                data: data.to_string(),
            });
        }

        fn sent(&self) -> Vec<ClientMessage> {
            self.log.borrow().sent.iter().map(|(_, m)| m.clone()).collect()
        }

        fn notices(&self, target: &str) -> Vec<Notice> {
            self.log
                .borrow()
                .notices
                .iter()
                .filter(|(t, _)| t.as_str() == target)
                .map(|(_, n)| n.clone())
                .collect()
        }

        /// Drive a fresh session for `target` all the way to `Open`.
        fn open_session(&mut self, target: Target, username: &str, secret: &str) {
            let name = target.id.as_str().to_string();
            self.open(target).unwrap();
            self.answer(username, secret);
            self.channel_event(ChannelEvent::Opened);
            self.backend(r#"{"type":"connected"}"#);
            assert_eq!(self.state(&name), ConnectionState::Open);
        }
    }

    // ============================================================
    // Happy path
    // ============================================================

    #[test]
    fn test_full_session_lifecycle() {
        let mut h = harness();

        let outcome = h.open(Target::new("srv1", "10.0.0.5")).unwrap();
        assert_eq!(outcome, OpenOutcome::Started(ConnectionState::AwaitingCredentials));
        assert_eq!(h.log.borrow().prompts[0].1, "root");
        assert!(h.log.borrow().opened.is_empty());

        h.answer("root", "pw");
        assert_eq!(h.state("srv1"), ConnectionState::Connecting);
        assert_eq!(h.log.borrow().opened[0].1.as_str(), ENDPOINT);
        assert_eq!(h.log.borrow().timers[0].1, DEFAULT_HANDSHAKE_TIMEOUT);

        h.channel_event(ChannelEvent::Opened);
        assert_eq!(
            h.sent(),
            vec![ClientMessage::connect("10.0.0.5", 22, "root", "pw")]
        );

        h.backend(r#"{"type":"connected","message":"Welcome"}"#);
        assert_eq!(h.state("srv1"), ConnectionState::Open);
        assert!(h.notices("srv1").contains(&Notice::Connected {
            banner: Some("Welcome".to_string())
        }));

        h.backend(r#"{"type":"output","data":"$ "}"#);
        assert_eq!(h.log.borrow().written, vec!["$ "]);

        h.input("srv1", "ls\n");
        assert_eq!(h.sent().last(), Some(&ClientMessage::input("ls\n")));

        h.controller.close(&id("srv1"));
        assert_eq!(h.state("srv1"), ConnectionState::Closed);
        assert_eq!(h.sent().last(), Some(&ClientMessage::Disconnect));
        assert_eq!(h.log.borrow().closed.len(), 1);

        let notices = h.notices("srv1");
        assert!(notices.contains(&Notice::StateChanged {
            from: ConnectionState::Open,
            to: ConnectionState::Closing,
        }));
        assert_eq!(notices.last(), Some(&Notice::Closed));
    }

    #[test]
    fn test_connect_uses_target_port() {
        let mut h = harness();
        h.open(srv("srv1").with_port(2222)).unwrap();
        h.answer("admin", "pw");
        h.channel_event(ChannelEvent::Opened);
        assert_eq!(
            h.sent(),
            vec![ClientMessage::connect("10.0.0.5", 2222, "admin", "pw")]
        );
    }

    #[test]
    fn test_cached_credential_skips_prompt() {
        let mut h = harness();
        h.open_session(srv("srv1"), "root", "pw");
        h.controller.close(&id("srv1"));

        let outcome = h.open(srv("srv1")).unwrap();
        assert_eq!(outcome, OpenOutcome::Started(ConnectionState::Connecting));
        assert_eq!(h.prompt_count(), 1);

        h.channel_event(ChannelEvent::Opened);
        assert_eq!(
            h.sent().last(),
            Some(&ClientMessage::connect("10.0.0.5", 22, "root", "pw"))
        );
    }

    #[test]
    fn test_two_targets_are_independent() {
        let mut h = harness();
        h.open_session(srv("a"), "root", "pw-a");
        h.open(srv("b")).unwrap();

        assert_eq!(h.state("a"), ConnectionState::Open);
        assert_eq!(h.state("b"), ConnectionState::AwaitingCredentials);

        h.controller.close(&id("a"));
        assert_eq!(h.state("b"), ConnectionState::AwaitingCredentials);
        assert!(h.controller.credentials().get(&id("a")).is_some());
        assert!(h.controller.credentials().get(&id("b")).is_none());
    }

    // ============================================================
    // Coalescing
    // ============================================================

    #[test]
    fn test_second_open_focuses_existing_session() {
        let mut h = harness();
        h.open(srv("srv1")).unwrap();

        let outcome = h.open(srv("srv1")).unwrap();
        assert_eq!(outcome, OpenOutcome::Focused(ConnectionState::AwaitingCredentials));
        assert_eq!(h.prompt_count(), 1);
        assert!(h.notices("srv1").contains(&Notice::Focused));
    }

    #[test]
    fn test_open_while_connecting_or_open_does_not_reconnect() {
        let mut h = harness();
        h.open(srv("srv1")).unwrap();
        h.answer("root", "pw");

        assert_eq!(
            h.open(srv("srv1")).unwrap(),
            OpenOutcome::Focused(ConnectionState::Connecting)
        );

        h.channel_event(ChannelEvent::Opened);
        h.backend(r#"{"type":"connected"}"#);
        assert_eq!(
            h.open(srv("srv1")).unwrap(),
            OpenOutcome::Focused(ConnectionState::Open)
        );
        assert_eq!(h.log.borrow().opened.len(), 1);
    }

    // ============================================================
    // Authentication retry
    // ============================================================

    #[test]
    fn test_auth_failure_reprompts_and_recovers() {
        let mut h = harness();
        h.open(Target::new("srv2", "10.0.0.6")).unwrap();
        h.answer("root", "wrong");
        h.channel_event(ChannelEvent::Opened);
        let first_key = h.last_key();
        let first_ticket = h.last_prompt();

        h.backend(r#"{"type":"error","message":"Authentication failed"}"#);

        assert_eq!(h.state("srv2"), ConnectionState::AwaitingCredentials);
        assert!(h.controller.credentials().get(&id("srv2")).is_none());
        assert_eq!(h.log.borrow().closed, vec![first_key.clone()]);
        assert_eq!(h.prompt_count(), 2);
        assert_ne!(h.last_prompt(), first_ticket);
        assert!(h.notices("srv2").contains(&Notice::AuthenticationFailed {
            message: "Authentication failed".to_string()
        }));

        h.answer("root", "right");
        let second_key = h.last_key();
        assert_ne!(second_key, first_key);
        h.channel_event(ChannelEvent::Opened);
        h.backend(r#"{"type":"connected"}"#);

        assert_eq!(h.state("srv2"), ConnectionState::Open);
        let cached = h.controller.credentials().get(&id("srv2")).unwrap();
        assert_eq!(cached.secret.expose(), "right");
    }

    #[test]
    fn test_reconnect_after_auth_failure_sends_new_secret() {
        let mut h = harness();
        h.open(srv("srv3")).unwrap();
        h.answer("u1", "p1");
        h.channel_event(ChannelEvent::Opened);
        h.backend(r#"{"type":"error","message":"Authentication failed"}"#);

        h.answer("u1", "p2");
        h.channel_event(ChannelEvent::Opened);

        assert_eq!(
            h.sent(),
            vec![
                ClientMessage::connect("10.0.0.5", 22, "u1", "p1"),
                ClientMessage::connect("10.0.0.5", 22, "u1", "p2"),
            ]
        );
        let keys: Vec<_> = h.log.borrow().sent.iter().map(|(k, _)| k.clone()).collect();
        assert_ne!(keys[0], keys[1]);
    }

    #[test]
    fn test_auth_marker_matching_is_case_insensitive() {
        let mut h = harness();
        h.open(srv("srv1")).unwrap();
        h.answer("root", "pw");
        h.backend(r#"{"type":"error","message":"SSH AUTHENTIFIZIERUNG fehlgeschlagen"}"#);
        assert_eq!(h.state("srv1"), ConnectionState::AwaitingCredentials);
    }

    #[test]
    fn test_explicit_auth_kind_wins_over_text() {
        let mut h = harness();
        h.open(srv("srv1")).unwrap();
        h.answer("root", "pw");
        h.backend(r#"{"type":"error","message":"Permission denied","kind":"auth"}"#);
        assert_eq!(h.state("srv1"), ConnectionState::AwaitingCredentials);
    }

    #[test]
    fn test_explicit_network_kind_wins_over_text() {
        let mut h = harness();
        h.open(srv("srv1")).unwrap();
        h.answer("root", "pw");
        h.backend(r#"{"type":"error","message":"authentication agent unreachable","kind":"network"}"#);
        assert_eq!(h.state("srv1"), ConnectionState::Failed);
        assert_eq!(h.prompt_count(), 1);
    }

    #[test]
    fn test_stale_events_from_replaced_channel_are_dropped() {
        let mut h = harness();
        h.open(srv("srv1")).unwrap();
        h.answer("root", "wrong");
        let old_key = h.last_key();
        h.backend(r#"{"type":"error","message":"Authentication failed"}"#);
        h.answer("root", "right");

        h.controller.handle(Event::Channel {
            key: old_key.clone(),
            event: ChannelEvent::Message(r#"{"type":"connected"}"#.to_string()),
        });
        assert_eq!(h.state("srv1"), ConnectionState::Connecting);

        h.controller.handle(Event::Channel {
            key: old_key,
            event: ChannelEvent::Error("reset".to_string()),
        });
        assert_eq!(h.state("srv1"), ConnectionState::Connecting);
    }

    // ============================================================
    // Failures
    // ============================================================

    #[test]
    fn test_unreachable_backend_fails_without_prompt() {
        let mut h = harness();
        h.open(Target::new("srv3", "10.0.0.7")).unwrap();
        h.answer("root", "pw");
        h.channel_event(ChannelEvent::Error("connection refused".to_string()));

        assert_eq!(h.state("srv3"), ConnectionState::Failed);
        assert_eq!(
            h.notices("srv3").last(),
            Some(&Notice::Failed(SessionFailure::TransportUnavailable {
                cause: "connection refused".to_string()
            }))
        );
        assert_eq!(h.prompt_count(), 1);
        assert!(h.log.borrow().sent.is_empty());
    }

    #[test]
    fn test_channel_closed_before_connected_fails() {
        let mut h = harness();
        h.open(srv("srv1")).unwrap();
        h.answer("root", "pw");
        h.channel_event(ChannelEvent::Closed {
            code: Some(1006),
            reason: String::new(),
        });

        assert_eq!(h.state("srv1"), ConnectionState::Failed);
        assert_eq!(
            h.notices("srv1").last(),
            Some(&Notice::Failed(SessionFailure::TransportUnavailable {
                cause: "channel closed (code 1006)".to_string()
            }))
        );
    }

    #[test]
    fn test_non_auth_error_fails_and_keeps_cache() {
        let mut h = harness();
        h.open(srv("srv1")).unwrap();
        h.answer("root", "pw");
        h.backend(r#"{"type":"error","message":"Host unreachable"}"#);

        assert_eq!(h.state("srv1"), ConnectionState::Failed);
        assert!(h.controller.credentials().get(&id("srv1")).is_some());
        assert_eq!(h.log.borrow().closed.len(), 1);
        assert!(h.notices("srv1").contains(&Notice::Failed(
            SessionFailure::BackendReported {
                message: "Host unreachable".to_string(),
                kind: ErrorKind::Other,
            }
        )));
    }

    #[test]
    fn test_disconnected_while_connecting_fails() {
        let mut h = harness();
        h.open(srv("srv1")).unwrap();
        h.answer("root", "pw");
        h.backend(r#"{"type":"disconnected"}"#);
        assert_eq!(h.state("srv1"), ConnectionState::Failed);
    }

    #[test]
    fn test_handshake_timeout_fails_connecting_session() {
        let mut h = harness();
        h.open(srv("srv1")).unwrap();
        h.answer("root", "pw");
        let key = h.last_key();

        h.controller.handle(Event::HandshakeTimeout { key });

        assert_eq!(h.state("srv1"), ConnectionState::Failed);
        assert_eq!(h.log.borrow().closed.len(), 1);
        assert_eq!(
            h.notices("srv1").last(),
            Some(&Notice::Failed(SessionFailure::HandshakeTimedOut {
                after: DEFAULT_HANDSHAKE_TIMEOUT
            }))
        );
    }

    #[test]
    fn test_handshake_timer_disarmed_when_connected() {
        let mut h = harness();
        h.open_session(srv("srv1"), "root", "pw");
        let key = h.last_key();
        assert_eq!(h.log.borrow().disarmed, vec![key.clone()]);

        h.controller.close(&id("srv1"));
        assert_eq!(h.log.borrow().disarmed, vec![key.clone(), key]);
    }

    #[test]
    fn test_handshake_timer_disarmed_on_auth_retry() {
        let mut h = harness();
        h.open(srv("srv1")).unwrap();
        h.answer("root", "wrong");
        let first_key = h.last_key();
        h.channel_event(ChannelEvent::Opened);
        h.backend(r#"{"type":"error","message":"Authentication failed"}"#);

        assert_eq!(h.log.borrow().disarmed, vec![first_key]);
    }

    #[test]
    fn test_handshake_timeout_after_open_is_ignored() {
        let mut h = harness();
        h.open_session(srv("srv1"), "root", "pw");
        let key = h.last_key();
        h.controller.handle(Event::HandshakeTimeout { key });
        assert_eq!(h.state("srv1"), ConnectionState::Open);
    }

    #[test]
    fn test_reopen_after_failure_starts_fresh_session() {
        let mut h = harness();
        h.open(srv("srv1")).unwrap();
        h.answer("root", "pw");
        h.backend(r#"{"type":"error","message":"Host unreachable"}"#);

        let outcome = h.open(srv("srv1")).unwrap();
        assert_eq!(outcome, OpenOutcome::Started(ConnectionState::Connecting));
        assert_eq!(h.log.borrow().opened.len(), 2);
    }

    #[test]
    fn test_access_denied_creates_no_session() {
        let mut h = harness();
        let err = h
            .open(srv("nas").with_interactive_access(false))
            .unwrap_err();

        assert!(matches!(err, BridgeError::AccessDenied { .. }));
        assert!(h.controller.state(&id("nas")).is_none());
        assert_eq!(h.prompt_count(), 0);
    }

    // ============================================================
    // Prompt
    // ============================================================

    #[test]
    fn test_prompt_cancel_returns_to_idle() {
        let mut h = harness();
        h.open(srv("srv1")).unwrap();
        h.cancel_prompt();

        assert_eq!(h.state("srv1"), ConnectionState::Idle);
        assert!(h.log.borrow().opened.is_empty());
        assert!(h.controller.credentials().is_empty());

        let outcome = h.open(srv("srv1")).unwrap();
        assert_eq!(outcome, OpenOutcome::Started(ConnectionState::AwaitingCredentials));
        assert_eq!(h.prompt_count(), 2);
    }

    #[test]
    fn test_incomplete_credential_is_a_cancel() {
        let mut h = harness();
        h.open(srv("srv1")).unwrap();
        h.answer("root", "");
        assert_eq!(h.state("srv1"), ConnectionState::Idle);
        assert!(h.controller.credentials().is_empty());
    }

    #[test]
    fn test_close_dismisses_prompt_and_ignores_late_answer() {
        let mut h = harness();
        h.open(srv("srv1")).unwrap();
        let ticket = h.last_prompt();

        h.controller.close(&id("srv1"));
        assert_eq!(h.log.borrow().dismissed, vec![ticket]);

        h.answer("root", "pw");
        assert_eq!(h.state("srv1"), ConnectionState::Closed);
        assert!(h.log.borrow().opened.is_empty());
        assert!(h.controller.credentials().is_empty());
    }

    // ============================================================
    // Message handling
    // ============================================================

    #[test]
    fn test_output_before_connected_is_dropped() {
        let mut h = harness();
        h.open(srv("srv1")).unwrap();
        h.answer("root", "pw");
        h.channel_event(ChannelEvent::Opened);
        h.backend(r#"{"type":"output","data":"early"}"#);
        assert!(h.log.borrow().written.is_empty());
        assert_eq!(h.state("srv1"), ConnectionState::Connecting);
    }

    #[test]
    fn test_malformed_message_changes_nothing() {
        let mut h = harness();
        h.open_session(srv("srv1"), "root", "pw");
        h.backend("not json");
        h.backend(r#"{"type":"telemetry"}"#);
        assert_eq!(h.state("srv1"), ConnectionState::Open);
    }

    #[test]
    fn test_remote_disconnect_closes_session() {
        let mut h = harness();
        h.open_session(srv("srv1"), "root", "pw");
        h.backend(r#"{"type":"disconnected","message":"logout"}"#);

        assert_eq!(h.state("srv1"), ConnectionState::Closed);
        assert_eq!(
            h.notices("srv1").last(),
            Some(&Notice::Disconnected {
                reason: Some("logout".to_string())
            })
        );

        h.backend(r#"{"type":"output","data":"late"}"#);
        assert!(h.log.borrow().written.is_empty());
    }

    #[test]
    fn test_channel_error_while_open_closes_session() {
        let mut h = harness();
        h.open_session(srv("srv1"), "root", "pw");
        h.channel_event(ChannelEvent::Error("reset by peer".to_string()));
        assert_eq!(h.state("srv1"), ConnectionState::Closed);
    }

    #[test]
    fn test_message_after_close_is_dropped() {
        let mut h = harness();
        h.open_session(srv("srv1"), "root", "pw");
        let key = h.last_key();
        h.controller.close(&id("srv1"));

        h.controller.handle(Event::Channel {
            key,
            event: ChannelEvent::Message(r#"{"type":"output","data":"x"}"#.to_string()),
        });
        assert!(h.log.borrow().written.is_empty());
    }

    #[test]
    fn test_input_outside_open_is_dropped() {
        let mut h = harness();
        h.open(srv("srv1")).unwrap();
        h.answer("root", "pw");
        h.channel_event(ChannelEvent::Opened);
        h.input("srv1", "early");

        assert_eq!(h.sent().len(), 1);

        h.backend(r#"{"type":"connected"}"#);
        h.controller.close(&id("srv1"));
        h.input("srv1", "late");
        assert_eq!(h.sent().last(), Some(&ClientMessage::Disconnect));
    }

    #[test]
    fn test_resize_refits_locally() {
        let mut h = harness();
        h.open_session(srv("srv1"), "root", "pw");
        let sent_before = h.sent().len();

        h.controller.handle(Event::Resized {
            target_id: id("srv1"),
        });

        assert_eq!(h.log.borrow().fits, 1);
        assert_eq!(h.sent().len(), sent_before);
    }

    // ============================================================
    // Close and cache management
    // ============================================================

    #[test]
    fn test_close_is_idempotent() {
        let mut h = harness();
        h.open_session(srv("srv1"), "root", "pw");
        h.controller.close(&id("srv1"));
        h.controller.handle(Event::CloseRequested {
            target_id: id("srv1"),
        });

        assert_eq!(h.log.borrow().closed.len(), 1);
        let closes = h
            .notices("srv1")
            .iter()
            .filter(|n| **n == Notice::Closed)
            .count();
        assert_eq!(closes, 1);
    }

    #[test]
    fn test_close_after_remote_disconnect_is_noop() {
        let mut h = harness();
        h.open_session(srv("srv1"), "root", "pw");
        h.backend(r#"{"type":"disconnected"}"#);
        let notices_before = h.notices("srv1").len();

        h.controller.close(&id("srv1"));
        h.controller.close(&id("srv1"));

        assert_eq!(h.state("srv1"), ConnectionState::Closed);
        assert_eq!(h.log.borrow().closed.len(), 1);
        assert_eq!(h.notices("srv1").len(), notices_before);
        assert_eq!(h.sent().len(), 1);
    }

    #[test]
    fn test_disconnected_after_close_is_dropped() {
        let mut h = harness();
        h.open_session(srv("srv1"), "root", "pw");
        h.controller.close(&id("srv1"));
        let notices_before = h.notices("srv1").len();

        h.backend(r#"{"type":"disconnected","message":"bye"}"#);
        h.channel_event(ChannelEvent::Closed {
            code: Some(1000),
            reason: String::new(),
        });

        assert_eq!(h.state("srv1"), ConnectionState::Closed);
        assert_eq!(h.notices("srv1").len(), notices_before);
        assert_eq!(h.log.borrow().closed.len(), 1);
    }

    #[test]
    fn test_close_unknown_session_is_noop() {
        let mut h = harness();
        h.controller.close(&id("ghost"));
        assert!(h.log.borrow().notices.is_empty());
    }

    #[test]
    fn test_clear_credentials_event() {
        let mut h = harness();
        h.open_session(srv("srv1"), "root", "pw");
        h.controller.handle(Event::ClearCredentials {
            target_id: id("srv1"),
        });
        assert!(h.controller.credentials().is_empty());
    }

}
