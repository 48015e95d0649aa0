//! WebSocket transport channel.
//!
//! Each channel runs one task that owns the socket. Outgoing messages are
//! queued to the task; everything the socket reports is posted to the
//! controller's event queue as [`ChannelEvent`]s.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use protocol::ClientMessage;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::{ChannelEvent, ChannelFactory, ChannelKey, TransportChannel};
use crate::runtime::EventSender;
use crate::session::Event;

/// Opens [`WebSocketChannel`]s that report to one event queue.
#[derive(Debug, Clone)]
pub struct WebSocketChannelFactory {
    events: EventSender,
}

impl WebSocketChannelFactory {
    pub fn new(events: EventSender) -> Self {
        Self { events }
    }
}

impl ChannelFactory for WebSocketChannelFactory {
    fn open(&mut self, key: ChannelKey, endpoint: &Url) -> Box<dyn TransportChannel> {
        Box::new(WebSocketChannel::connect(
            key,
            endpoint.clone(),
            self.events.clone(),
        ))
    }
}

/// Handle to a channel task.
///
/// Must be created inside a tokio runtime.
#[derive(Debug)]
pub struct WebSocketChannel {
    key: ChannelKey,
    outgoing: mpsc::UnboundedSender<String>,
    ready: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl WebSocketChannel {
    /// Start connecting. Returns immediately; the outcome arrives as an
    /// `Opened` or `Error` event.
    pub fn connect(key: ChannelKey, endpoint: Url, events: EventSender) -> Self {
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let ready = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();

        tokio::spawn(run_channel(
            key.clone(),
            endpoint,
            outgoing_rx,
            ready.clone(),
            cancel.clone(),
            events,
        ));

        Self {
            key,
            outgoing,
            ready,
            cancel,
        }
    }

    pub fn key(&self) -> &ChannelKey {
        &self.key
    }
}

impl TransportChannel for WebSocketChannel {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn send(&mut self, message: &ClientMessage) -> bool {
        if !self.is_ready() {
            tracing::debug!(key = %self.key, action = message.action(), "Channel not ready, message dropped");
            return false;
        }
        let text = match message.to_json() {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "Failed to encode message");
                return false;
            }
        };
        self.outgoing.send(text).is_ok()
    }

    fn close(&mut self) {
        if !self.cancel.is_cancelled() {
            tracing::debug!(key = %self.key, "Closing channel");
        }
        self.ready.store(false, Ordering::SeqCst);
        self.cancel.cancel();
    }
}

impl Drop for WebSocketChannel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_channel(
    key: ChannelKey,
    endpoint: Url,
    mut outgoing: mpsc::UnboundedReceiver<String>,
    ready: Arc<AtomicBool>,
    cancel: CancellationToken,
    events: EventSender,
) {
    let post = |event: ChannelEvent| {
        events.post(Event::Channel {
            key: key.clone(),
            event,
        });
    };

    let connected = tokio::select! {
        _ = cancel.cancelled() => {
            tracing::debug!(key = %key, "Channel closed before connecting");
            return;
        }
        result = connect_async(endpoint.as_str()) => result,
    };

    let stream = match connected {
        Ok((stream, _response)) => stream,
        Err(e) => {
            tracing::warn!(key = %key, endpoint = %endpoint, error = %e, "Channel connect failed");
            post(ChannelEvent::Error(e.to_string()));
            return;
        }
    };

    tracing::debug!(key = %key, endpoint = %endpoint, "Channel connected");
    ready.store(true, Ordering::SeqCst);
    post(ChannelEvent::Opened);

    let (mut sink, mut source) = stream.split();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                // Flush what was queued before close, e.g. a final disconnect.
                while let Ok(text) = outgoing.try_recv() {
                    if sink.send(WsMessage::Text(text)).await.is_err() {
                        break;
                    }
                }
                let _ = sink.send(WsMessage::Close(None)).await;
                break;
            }
            Some(text) = outgoing.recv() => {
                if let Err(e) = sink.send(WsMessage::Text(text)).await {
                    tracing::warn!(key = %key, error = %e, "Channel write failed");
                    ready.store(false, Ordering::SeqCst);
                    post(ChannelEvent::Error(e.to_string()));
                    break;
                }
            }
            frame = source.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => post(ChannelEvent::Message(text)),
                Some(Ok(WsMessage::Close(frame))) => {
                    let (code, reason) = match frame {
                        Some(frame) => (Some(u16::from(frame.code)), frame.reason.to_string()),
                        None => (None, String::new()),
                    };
                    tracing::debug!(key = %key, code = ?code, reason = %reason, "Channel closed by peer");
                    ready.store(false, Ordering::SeqCst);
                    post(ChannelEvent::Closed { code, reason });
                    break;
                }
                Some(Ok(WsMessage::Binary(data))) => {
                    tracing::debug!(key = %key, len = data.len(), "Ignoring binary frame");
                }
                // ping/pong are answered by tungstenite
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(key = %key, error = %e, "Channel read failed");
                    ready.store(false, Ordering::SeqCst);
                    post(ChannelEvent::Error(e.to_string()));
                    break;
                }
                None => {
                    ready.store(false, Ordering::SeqCst);
                    post(ChannelEvent::Closed {
                        code: None,
                        reason: String::new(),
                    });
                    break;
                }
            }
        }
    }

    ready.store(false, Ordering::SeqCst);
    tracing::debug!(key = %key, "Channel task finished");
}
