//! In-memory transport pair.
//!
//! Both ends share one link. A value sent on one end is handed, synchronously
//! and in registration order, to every listener on the other end. Closing
//! either end closes the link for both.

use crate::transport::{ListenerId, MessageListener, Transport};
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

#[derive(Default)]
struct Side {
    listeners: RwLock<Vec<(ListenerId, MessageListener)>>,
    sent: AtomicU64,
}

struct Link {
    sides: [Side; 2],
    open: AtomicBool,
    next_listener: AtomicU64,
}

/// One end of an in-memory channel.
#[derive(Clone)]
pub struct MemoryTransport {
    link: Arc<Link>,
    side: usize,
}

impl MemoryTransport {
    /// Create two connected ends.
    pub fn pair() -> (Self, Self) {
        let link = Arc::new(Link {
            sides: [Side::default(), Side::default()],
            open: AtomicBool::new(true),
            next_listener: AtomicU64::new(0),
        });
        (
            Self {
                link: link.clone(),
                side: 0,
            },
            Self { link, side: 1 },
        )
    }

    /// Close the link. Later sends on either end return `false`.
    pub fn close(&self) {
        self.link.open.store(false, Ordering::Release);
    }

    /// Whether the link is still open.
    pub fn is_open(&self) -> bool {
        self.link.open.load(Ordering::Acquire)
    }

    /// Number of values successfully sent from this end.
    pub fn messages_sent(&self) -> u64 {
        self.link.sides[self.side].sent.load(Ordering::Relaxed)
    }

    /// Number of listeners registered on this end.
    pub fn listener_count(&self) -> usize {
        self.link.sides[self.side].listeners.read().len()
    }

    fn peer(&self) -> &Side {
        &self.link.sides[1 - self.side]
    }
}

impl Transport for MemoryTransport {
    fn send(&self, message: Value) -> bool {
        if !self.is_open() {
            trace!(side = self.side, "Send on closed memory link");
            return false;
        }
        self.link.sides[self.side].sent.fetch_add(1, Ordering::Relaxed);

        // Snapshot so listeners can send or (un)subscribe re-entrantly
        let listeners: Vec<MessageListener> = self
            .peer()
            .listeners
            .read()
            .iter()
            .map(|(_, l)| l.clone())
            .collect();

        for listener in listeners {
            listener(&message);
        }
        true
    }

    fn subscribe(&self, listener: MessageListener) -> ListenerId {
        let id = ListenerId::new(self.link.next_listener.fetch_add(1, Ordering::Relaxed));
        self.link.sides[self.side]
            .listeners
            .write()
            .push((id, listener));
        id
    }

    fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.link.sides[self.side].listeners.write();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }
}
