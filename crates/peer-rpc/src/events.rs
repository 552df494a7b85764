//! # Event Channel
//!
//! Named publish/subscribe over the same transport as RPC. Subscriptions
//! live in their own table, so an event and an endpoint may share a name.
//!
//! Delivery is synchronous, in subscription order, inside the inbound
//! message callback. Subscriber panics are not caught here: events have no
//! reply path to carry an error back.

use crate::error::{RpcError, RpcResult};
use crate::token::RemovalToken;
use crate::transport::Transport;
use crate::wire::{Message, Notification};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};

/// Event subscriber callback. Receives `Value::Null` when the event has no data.
pub type EventHandler = Arc<dyn Fn(&Value) + Send + Sync>;

struct Subscriber {
    id: u64,
    handler: EventHandler,
    once: bool,
}

#[derive(Default)]
struct SubscriberTable {
    subscribers: Mutex<HashMap<String, Vec<Subscriber>>>,
    next_id: AtomicU64,
}

impl SubscriberTable {
    fn remove_id(&self, name: &str, id: u64) -> bool {
        let mut subscribers = self.subscribers.lock();
        let Some(list) = subscribers.get_mut(name) else {
            return false;
        };
        let before = list.len();
        list.retain(|s| s.id != id);
        let removed = list.len() != before;
        if list.is_empty() {
            subscribers.remove(name);
        }
        removed
    }
}

fn same_handler(a: &EventHandler, b: &EventHandler) -> bool {
    // Compare data pointers only; vtable addresses are not stable
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

/// Pub/sub half of an endpoint.
pub struct EventChannel {
    transport: Arc<dyn Transport>,
    table: Arc<SubscriberTable>,
}

impl EventChannel {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            table: Arc::new(SubscriberTable::default()),
        }
    }

    /// Send a notification to the peer. Returns the transport's send result.
    ///
    /// An empty name is never sent, since no subscriber can listen for it.
    pub fn emit(&self, name: &str, data: Option<Value>) -> bool {
        if name.is_empty() {
            warn!("Event with empty name not sent");
            return false;
        }

        let value = match Message::Notification(Notification::new(name, data)).to_value() {
            Ok(value) => value,
            Err(e) => {
                warn!(name = name, error = %e, "Failed to encode notification");
                return false;
            }
        };

        let sent = self.transport.send(value);
        if sent {
            debug!(name = name, "Event emitted");
        } else {
            warn!(name = name, "Event dropped (channel unavailable)");
        }
        sent
    }

    /// Subscribe to every occurrence of `name`.
    pub fn on(&self, name: &str, handler: EventHandler) -> RpcResult<RemovalToken> {
        self.subscribe(name, handler, false)
    }

    /// Subscribe to the next occurrence of `name` only.
    pub fn once(&self, name: &str, handler: EventHandler) -> RpcResult<RemovalToken> {
        self.subscribe(name, handler, true)
    }

    /// Remove the most recently added subscription of `handler` to `name`.
    ///
    /// Other subscribers to the same name are unaffected.
    pub fn off(&self, name: &str, handler: &EventHandler) -> bool {
        let mut subscribers = self.table.subscribers.lock();
        let Some(list) = subscribers.get_mut(name) else {
            return false;
        };
        let Some(pos) = list.iter().rposition(|s| same_handler(&s.handler, handler)) else {
            return false;
        };
        list.remove(pos);
        if list.is_empty() {
            subscribers.remove(name);
        }
        debug!(name = name, "Event subscription removed");
        true
    }

    /// Number of subscriptions for `name`.
    pub fn listener_count(&self, name: &str) -> usize {
        self.table
            .subscribers
            .lock()
            .get(name)
            .map_or(0, Vec::len)
    }

    /// Deliver an inbound notification to local subscribers.
    ///
    /// `once` subscriptions are removed before any handler runs, so a handler
    /// that emits re-entrantly cannot trigger them a second time.
    pub fn dispatch(&self, notification: &Notification) -> usize {
        let handlers: Vec<EventHandler> = {
            let mut subscribers = self.table.subscribers.lock();
            let Some(list) = subscribers.get_mut(&notification.name) else {
                trace!(name = %notification.name, "Event with no subscribers");
                return 0;
            };
            let handlers = list.iter().map(|s| s.handler.clone()).collect();
            list.retain(|s| !s.once);
            if list.is_empty() {
                subscribers.remove(&notification.name);
            }
            handlers
        };

        let data = notification.data.as_ref().unwrap_or(&Value::Null);
        trace!(
            name = %notification.name,
            subscribers = handlers.len(),
            "Dispatching event"
        );
        for handler in &handlers {
            handler(data);
        }
        handlers.len()
    }

    fn subscribe(&self, name: &str, handler: EventHandler, once: bool) -> RpcResult<RemovalToken> {
        if name.is_empty() {
            return Err(RpcError::InvalidName);
        }

        let id = self.table.next_id.fetch_add(1, Ordering::Relaxed);
        self.table
            .subscribers
            .lock()
            .entry(name.to_string())
            .or_default()
            .push(Subscriber { id, handler, once });
        debug!(name = name, once = once, "Event subscription added");

        let weak: Weak<SubscriberTable> = Arc::downgrade(&self.table);
        let owned = name.to_string();
        Ok(RemovalToken::new(name, move || {
            if let Some(table) = weak.upgrade() {
                table.remove_id(&owned, id);
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTransport;
    use serde_json::json;

    fn channel() -> (EventChannel, MemoryTransport) {
        let (a, b) = MemoryTransport::pair();
        (EventChannel::new(Arc::new(a)), b)
    }

    fn recording() -> (EventHandler, Arc<Mutex<Vec<Value>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler: EventHandler = Arc::new(move |v: &Value| sink.lock().push(v.clone()));
        (handler, seen)
    }

    #[test]
    fn test_emit_sends_notification() {
        let (events, peer) = channel();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        peer.subscribe(Arc::new(move |v: &Value| sink.lock().push(v.clone())));

        assert!(events.emit("tick", Some(json!(1))));
        assert_eq!(*seen.lock(), vec![json!({"kind": "N", "name": "tick", "data": 1})]);
    }

    #[test]
    fn test_emit_on_closed_channel() {
        let (events, peer) = channel();
        peer.close();
        assert!(!events.emit("tick", None));
    }

    #[test]
    fn test_fan_out_in_order() {
        let (events, _peer) = channel();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            let _ = events
                .on("tick", Arc::new(move |_: &Value| order.lock().push(i)))
                .unwrap();
        }

        assert_eq!(events.dispatch(&Notification::new("tick", None)), 3);
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_once_fires_once() {
        let (events, _peer) = channel();
        let (handler, seen) = recording();
        let _ = events.once("tick", handler).unwrap();

        events.dispatch(&Notification::new("tick", Some(json!(1))));
        events.dispatch(&Notification::new("tick", Some(json!(2))));
        assert_eq!(*seen.lock(), vec![json!(1)]);
        assert_eq!(events.listener_count("tick"), 0);
    }

    #[test]
    fn test_off_only_affects_that_subscriber() {
        let (events, _peer) = channel();
        let (h1, seen1) = recording();
        let (h2, seen2) = recording();
        let _ = events.on("tick", h1.clone()).unwrap();
        let _ = events.on("tick", h2).unwrap();

        assert!(events.off("tick", &h1));
        assert!(!events.off("tick", &h1));
        events.dispatch(&Notification::new("tick", Some(json!("x"))));

        assert!(seen1.lock().is_empty());
        assert_eq!(*seen2.lock(), vec![json!("x")]);
    }

    #[test]
    fn test_removal_token() {
        let (events, _peer) = channel();
        let (handler, seen) = recording();
        let token = events.on("tick", handler).unwrap();

        assert!(token.remove());
        assert_eq!(events.listener_count("tick"), 0);
        events.dispatch(&Notification::new("tick", None));
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_missing_data_is_null() {
        let (events, _peer) = channel();
        let (handler, seen) = recording();
        let _ = events.on("tick", handler).unwrap();
        events.dispatch(&Notification::new("tick", None));
        assert_eq!(*seen.lock(), vec![Value::Null]);
    }

    #[test]
    fn test_empty_name_rejected() {
        let (events, _peer) = channel();
        let (handler, _) = recording();
        assert!(matches!(events.on("", handler), Err(RpcError::InvalidName)));
    }

    #[test]
    fn test_emit_empty_name_sends_nothing() {
        let (events, peer) = channel();
        let (handler, seen) = recording();
        peer.subscribe(handler);

        assert!(!events.emit("", Some(json!(1))));
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_handler_may_subscribe_reentrantly() {
        let events = Arc::new(channel().0);
        let inner = events.clone();
        let _ = events
            .once(
                "first",
                Arc::new(move |_: &Value| {
                    let _ = inner.on("second", Arc::new(|_: &Value| {}));
                }),
            )
            .unwrap();

        events.dispatch(&Notification::new("first", None));
        assert_eq!(events.listener_count("second"), 1);
    }
}
