//! Transport adapter.
//!
//! The engine only needs three things from the channel: send a value, and
//! add or remove a listener for received values. Delivery order is whatever
//! the channel provides (FIFO per direction); nothing here buffers or retries.

use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Callback invoked for every value received from the peer.
pub type MessageListener = Arc<dyn Fn(&Value) + Send + Sync>;

/// Handle for removing a listener from a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// One end of a bidirectional message channel.
///
/// Implementations must not call listeners while holding locks that
/// `send`, `subscribe`, or `unsubscribe` also take: listeners routinely send
/// replies from inside the callback.
pub trait Transport: Send + Sync {
    /// Send a value to the peer.
    ///
    /// Returns `false` if the channel is unavailable (closed, peer gone).
    /// Failure is never reported any other way.
    fn send(&self, message: Value) -> bool;

    /// Register a listener for values received from the peer.
    fn subscribe(&self, listener: MessageListener) -> ListenerId;

    /// Remove a listener. Returns `false` if it was not registered.
    fn unsubscribe(&self, id: ListenerId) -> bool;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn send(&self, message: Value) -> bool {
        (**self).send(message)
    }

    fn subscribe(&self, listener: MessageListener) -> ListenerId {
        (**self).subscribe(listener)
    }

    fn unsubscribe(&self, id: ListenerId) -> bool {
        (**self).unsubscribe(id)
    }
}
