//! Event queue plumbing between async tasks and the session controller.
//!
//! Channel tasks, timers and the frontend post [`Event`]s through an
//! [`EventSender`]; the owner of the [`SessionController`] drains the
//! [`EventQueue`] on one task.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::session::{Event, SessionController, Timer};
use crate::transport::ChannelKey;

/// Cloneable handle for posting events.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<Event>,
}

impl EventSender {
    /// Post an event. Returns `false` once the queue is gone.
    pub fn post(&self, event: Event) -> bool {
        if self.tx.send(event).is_err() {
            tracing::trace!("Event queue closed, dropping event");
            return false;
        }
        true
    }
}

/// Receiving end of the event queue.
#[derive(Debug)]
pub struct EventQueue {
    rx: mpsc::UnboundedReceiver<Event>,
}

impl EventQueue {
    pub async fn next(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    pub fn try_next(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }
}

pub fn event_queue() -> (EventSender, EventQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { tx }, EventQueue { rx })
}

/// Arms handshake deadlines on the tokio timer wheel.
///
/// At most one deadline runs per target; arming a new one aborts the old.
#[derive(Debug)]
pub struct TokioTimer {
    events: EventSender,
    pending: HashMap<ChannelKey, JoinHandle<()>>,
}

impl TokioTimer {
    pub fn new(events: EventSender) -> Self {
        Self {
            events,
            pending: HashMap::new(),
        }
    }

    /// Deadlines that have neither fired nor been disarmed.
    pub fn pending(&self) -> usize {
        self.pending.values().filter(|h| !h.is_finished()).count()
    }
}

impl Timer for TokioTimer {
    fn arm(&mut self, key: ChannelKey, after: Duration) {
        self.pending.retain(|pending, handle| {
            if pending.target_id != key.target_id {
                return true;
            }
            handle.abort();
            false
        });

        let events = self.events.clone();
        let fired = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            events.post(Event::HandshakeTimeout { key: fired });
        });
        self.pending.insert(key, handle);
    }

    fn disarm(&mut self, key: &ChannelKey) {
        if let Some(handle) = self.pending.remove(key) {
            handle.abort();
            tracing::trace!(key = %key, "Handshake deadline disarmed");
        }
    }
}

impl Drop for TokioTimer {
    fn drop(&mut self) {
        for handle in self.pending.values() {
            handle.abort();
        }
    }
}

/// Feed queued events to the controller until `done` holds or every sender
/// is dropped.
pub async fn run_until<F>(controller: &mut SessionController, queue: &mut EventQueue, mut done: F)
where
    F: FnMut(&SessionController) -> bool,
{
    while !done(controller) {
        match queue.next().await {
            Some(event) => controller.handle(event),
            None => break,
        }
    }
}
