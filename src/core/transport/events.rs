//! Typed publish/subscribe for transport events.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;

use super::base::TransportError;
use super::messages::ServerMessage;

/// Events emitted by a [`SessionTransport`](super::SessionTransport).
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The socket opened (initially or after a reconnect)
    Connected,
    /// A control message arrived
    Message(ServerMessage),
    /// A binary audio frame arrived
    AudioData(Bytes),
    /// The socket closed
    Disconnected {
        code: Option<u16>,
        reason: String,
    },
    /// A transport-level failure
    Error(TransportError),
    /// A reconnection attempt was scheduled
    Reconnecting { attempt: u32, delay: Duration },
    /// Reconnection gave up; terminal for this session
    ReconnectFailed { attempts: u32 },
}

/// Discriminant of [`TransportEvent`] used as the subscription key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportEventKind {
    Connected,
    Message,
    AudioData,
    Disconnected,
    Error,
    Reconnecting,
    ReconnectFailed,
}

impl TransportEvent {
    pub fn kind(&self) -> TransportEventKind {
        match self {
            TransportEvent::Connected => TransportEventKind::Connected,
            TransportEvent::Message(_) => TransportEventKind::Message,
            TransportEvent::AudioData(_) => TransportEventKind::AudioData,
            TransportEvent::Disconnected { .. } => TransportEventKind::Disconnected,
            TransportEvent::Error(_) => TransportEventKind::Error,
            TransportEvent::Reconnecting { .. } => TransportEventKind::Reconnecting,
            TransportEvent::ReconnectFailed { .. } => TransportEventKind::ReconnectFailed,
        }
    }
}

/// Handler invoked for each matching event.
pub type EventHandler = Arc<dyn Fn(&TransportEvent) + Send + Sync>;

struct Entry {
    id: u64,
    kind: TransportEventKind,
    handler: EventHandler,
}

#[derive(Default)]
struct Registry {
    next_id: AtomicU64,
    entries: Mutex<Vec<Entry>>,
}

/// Multi-subscriber event bus.
///
/// Handlers for the same kind run in subscription order. `emit` snapshots the
/// handler list first, so a handler may subscribe or unsubscribe without
/// deadlocking.
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Registry>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for events of `kind`.
    ///
    /// The returned [`Subscription`] removes the handler when
    /// [`unsubscribe`](Subscription::unsubscribe) is called or it is dropped.
    #[must_use = "dropping a Subscription unsubscribes the handler"]
    pub fn subscribe<F>(&self, kind: TransportEventKind, handler: F) -> Subscription
    where
        F: Fn(&TransportEvent) + Send + Sync + 'static,
    {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry.entries.lock().push(Entry {
            id,
            kind,
            handler: Arc::new(handler),
        });
        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Deliver `event` to every handler subscribed to its kind.
    pub fn emit(&self, event: &TransportEvent) {
        let kind = event.kind();
        let handlers: Vec<EventHandler> = self
            .registry
            .entries
            .lock()
            .iter()
            .filter(|e| e.kind == kind)
            .map(|e| e.handler.clone())
            .collect();

        for handler in handlers {
            handler(event);
        }
    }

    /// Number of handlers registered for `kind`.
    pub fn subscriber_count(&self, kind: TransportEventKind) -> usize {
        self.registry
            .entries
            .lock()
            .iter()
            .filter(|e| e.kind == kind)
            .count()
    }
}

/// Handle to a registered handler.
pub struct Subscription {
    id: u64,
    registry: Weak<Registry>,
}

impl Subscription {
    /// Remove the handler. Safe to call more than once.
    pub fn unsubscribe(&self) {
        if let Some(registry) = self.registry.upgrade() {
            let removed = {
                let mut entries = registry.entries.lock();
                entries
                    .iter()
                    .position(|e| e.id == self.id)
                    .map(|index| entries.remove(index))
            };
            drop(removed);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
