//! # Endpoint
//!
//! One side of the conversation. An endpoint wraps a transport, installs a
//! single inbound listener, and routes every received value by its `kind`:
//!
//! ```text
//!                 ┌─────────────── Endpoint ───────────────┐
//!   transport ──→ │ classify ──Q──→ registry ──→ spawn handler ──→ reply R
//!                 │          ──R──→ pending store ──→ settle act()
//!                 │          ──N──→ event channel ──→ subscribers
//!                 │          ──?──→ ignored
//!                 └────────────────────────────────────────┘
//! ```
//!
//! Both sides are symmetric: either may `act`, `add`, `emit` and `on`.

use crate::config::{ActOptions, EndpointConfig};
use crate::correlation::{IdGenerator, RandomIdGenerator};
use crate::error::{RpcError, RpcResult};
use crate::events::{EventChannel, EventHandler};
use crate::pending::{PendingGuard, PendingRequestStore, PendingSnapshot};
use crate::registry::{EndpointRegistry, Handler, SyncHandler, TypedHandler};
use crate::token::RemovalToken;
use crate::transport::{ListenerId, Transport};
use crate::wire::{Message, Request, Response, SerializedError};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, trace, warn};

struct EndpointInner {
    transport: Arc<dyn Transport>,
    config: EndpointConfig,
    ids: Arc<dyn IdGenerator>,
    registry: EndpointRegistry,
    pending: PendingRequestStore,
    events: EventChannel,
    listener: Mutex<Option<ListenerId>>,
    closed: AtomicBool,
    in_flight: AtomicUsize,
    runtime: Handle,
}

/// A reserved call slot, released on drop.
struct InFlightSlot<'a>(&'a AtomicUsize);

impl Drop for InFlightSlot<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl EndpointInner {
    fn handle_inbound(&self, value: &Value) {
        let Some(message) = Message::classify(value) else {
            trace!("Ignoring value that is not an RPC message");
            return;
        };
        trace!(
            name = message.name(),
            correlation_id = ?message.correlation_id(),
            "Inbound message"
        );

        match message {
            Message::Request(request) => self.handle_request(request),
            Message::Response(response) => {
                self.pending.complete(response);
            }
            Message::Notification(notification) => {
                self.events.dispatch(&notification);
            }
        }
    }

    fn handle_request(&self, mut request: Request) {
        let data = std::mem::take(&mut request.data);
        let Some(future) = self.registry.dispatch(&request.name, data) else {
            debug!(
                correlation_id = %request.correlation_id,
                name = %request.name,
                "No handler registered for request"
            );
            let error = SerializedError::not_found(&request.name);
            send_reply(self.transport.as_ref(), Response::failure(&request, error));
            return;
        };

        debug!(
            correlation_id = %request.correlation_id,
            name = %request.name,
            "Dispatching request"
        );

        // Each request runs on its own task so a slow handler never blocks
        // the ones behind it.
        let transport = self.transport.clone();
        self.runtime.spawn(async move {
            let response = match AssertUnwindSafe(future).catch_unwind().await {
                Ok(Ok(data)) => Response::success(&request, data),
                Ok(Err(err)) => {
                    debug!(
                        correlation_id = %request.correlation_id,
                        name = %request.name,
                        error = %err,
                        "Handler returned an error"
                    );
                    Response::failure(&request, SerializedError::from_anyhow(&err))
                }
                Err(panic) => {
                    let error = SerializedError::from_panic(panic.as_ref());
                    warn!(
                        correlation_id = %request.correlation_id,
                        name = %request.name,
                        panic = %error.message,
                        "Handler panicked"
                    );
                    Response::failure(&request, error)
                }
            };
            send_reply(transport.as_ref(), response);
        });
    }

    /// Reserve a call slot against `max_pending`.
    fn reserve_slot(&self) -> RpcResult<InFlightSlot<'_>> {
        let in_flight = self.in_flight.fetch_add(1, Ordering::AcqRel);
        let slot = InFlightSlot(&self.in_flight);
        match self.config.max_pending {
            Some(limit) if in_flight >= limit => Err(RpcError::TooManyPending(limit)),
            _ => Ok(slot),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn detach(&self) -> bool {
        match self.listener.lock().take() {
            Some(id) => self.transport.unsubscribe(id),
            None => false,
        }
    }
}

impl Drop for EndpointInner {
    fn drop(&mut self) {
        if let Some(id) = self.listener.get_mut().take() {
            self.transport.unsubscribe(id);
        }
    }
}

/// Best effort: there is nobody to report a failed reply to.
fn send_reply(transport: &dyn Transport, response: Response) {
    let correlation_id = response.correlation_id.clone();
    let value = match Message::Response(response).to_value() {
        Ok(value) => value,
        Err(e) => {
            warn!(correlation_id = %correlation_id, error = %e, "Failed to encode reply");
            return;
        }
    };
    if !transport.send(value) {
        warn!(correlation_id = %correlation_id, "Reply dropped (channel unavailable)");
    }
}

/// Builder for [`Endpoint`].
pub struct EndpointBuilder {
    transport: Arc<dyn Transport>,
    config: EndpointConfig,
    ids: Arc<dyn IdGenerator>,
    runtime: Option<Handle>,
}

impl EndpointBuilder {
    pub fn config(mut self, config: EndpointConfig) -> Self {
        self.config = config;
        self
    }

    pub fn id_generator(mut self, ids: impl IdGenerator + 'static) -> Self {
        self.ids = Arc::new(ids);
        self
    }

    /// Runtime that runs request handlers. Defaults to the current one.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Validate the configuration and attach to the transport.
    pub fn build(self) -> RpcResult<Endpoint> {
        self.config.validate()?;
        let runtime = match self.runtime {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|_| RpcError::NoRuntime)?,
        };

        let inner = Arc::new(EndpointInner {
            events: EventChannel::new(self.transport.clone()),
            transport: self.transport,
            config: self.config,
            ids: self.ids,
            registry: EndpointRegistry::new(),
            pending: PendingRequestStore::new(),
            listener: Mutex::new(None),
            closed: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            runtime,
        });

        // The listener holds a weak reference; the transport must not keep
        // the endpoint alive.
        let weak = Arc::downgrade(&inner);
        let id = inner.transport.subscribe(Arc::new(move |value: &Value| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_inbound(value);
            }
        }));
        *inner.listener.lock() = Some(id);

        debug!(
            listener = %id,
            default_act_timeout_ms = inner.config.default_act_timeout.as_millis() as u64,
            "Endpoint attached to transport"
        );

        Ok(Endpoint { inner })
    }
}

/// Request/response and event endpoint over one transport.
///
/// Cheap to clone; clones share registries and pending requests.
#[derive(Clone)]
pub struct Endpoint {
    inner: Arc<EndpointInner>,
}

impl Endpoint {
    /// Attach to `transport`. Must be called inside a tokio runtime.
    pub fn new(transport: impl Transport + 'static, config: EndpointConfig) -> RpcResult<Self> {
        Self::builder(transport).config(config).build()
    }

    pub fn builder(transport: impl Transport + 'static) -> EndpointBuilder {
        EndpointBuilder {
            transport: Arc::new(transport),
            config: EndpointConfig::default(),
            ids: Arc::new(RandomIdGenerator),
            runtime: None,
        }
    }

    // =========================================================================
    // REQUEST / RESPONSE
    // =========================================================================

    /// Call `name` on the peer with the configured default timeout.
    pub async fn act(&self, name: &str, data: Value) -> RpcResult<Value> {
        self.act_with(name, data, ActOptions::default()).await
    }

    /// Call `name` on the peer.
    ///
    /// Resolves with the handler's result, or fails with
    /// [`RpcError::Remote`] (handler error or unknown endpoint) or
    /// [`RpcError::Timeout`]. A response arriving after the timeout is
    /// ignored. Fails with [`RpcError::Closed`] without sending anything once
    /// the endpoint is closed.
    pub async fn act_with(&self, name: &str, data: Value, options: ActOptions) -> RpcResult<Value> {
        if name.is_empty() {
            return Err(RpcError::InvalidName);
        }

        let inner = &self.inner;
        if inner.is_closed() {
            return Err(RpcError::Closed(name.to_string()));
        }
        let _slot = inner.reserve_slot()?;

        let timeout = options.timeout.unwrap_or(inner.config.default_act_timeout);
        let correlation_id = inner.ids.next_id();
        let value = Message::Request(Request::new(correlation_id.clone(), name, data)).to_value()?;

        // Register before sending: the reply may arrive inside `send`.
        let rx = inner.pending.register(correlation_id.clone(), name, timeout);
        let _guard = PendingGuard::new(&inner.pending, correlation_id.clone());

        // close() may have run cancel_all before the entry existed
        if inner.is_closed() {
            return Err(RpcError::Closed(name.to_string()));
        }

        if !inner.transport.send(value) {
            inner.pending.cancel(&correlation_id);
            warn!(correlation_id = %correlation_id, name = name, "Request not sent (channel unavailable)");
            return Err(RpcError::ChannelUnavailable(name.to_string()));
        }

        debug!(correlation_id = %correlation_id, name = name, "Sent request");

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => response.into_result().map_err(RpcError::Remote),
            // Sender dropped without settling: endpoint closed
            Ok(Err(_)) => Err(RpcError::Closed(name.to_string())),
            Err(_) => {
                inner.pending.expire(&correlation_id);
                Err(RpcError::Timeout {
                    name: name.to_string(),
                    timeout,
                })
            }
        }
    }

    /// Typed wrapper over [`act`](Self::act).
    pub async fn call<Req, Resp>(&self, name: &str, request: &Req) -> RpcResult<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let data = serde_json::to_value(request)?;
        let value = self.act(name, data).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Register an async handler for requests named `name`.
    pub fn add(&self, name: &str, handler: impl Handler) -> RpcResult<RemovalToken> {
        self.inner.registry.add(name, handler)
    }

    /// Register a synchronous handler.
    pub fn add_sync<F>(&self, name: &str, handler: F) -> RpcResult<RemovalToken>
    where
        F: Fn(Value) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.add(name, SyncHandler::new(handler))
    }

    /// Register a handler with typed request and response payloads.
    ///
    /// A request whose data does not deserialize into `Req` is answered with
    /// an error.
    pub fn add_typed<F, Req, Resp, Fut>(&self, name: &str, handler: F) -> RpcResult<RemovalToken>
    where
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
        Fut: Future<Output = anyhow::Result<Resp>> + Send + 'static,
    {
        self.add(name, TypedHandler::new(handler))
    }

    // =========================================================================
    // EVENTS
    // =========================================================================

    /// Send an event to the peer. Returns the transport's send result, or
    /// `false` without sending for an empty name.
    pub fn emit(&self, name: &str, data: impl Into<Option<Value>>) -> bool {
        self.inner.events.emit(name, data.into())
    }

    /// Subscribe to every occurrence of event `name`.
    pub fn on<F>(&self, name: &str, handler: F) -> RpcResult<RemovalToken>
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.inner.events.on(name, Arc::new(handler))
    }

    /// Subscribe to the next occurrence of event `name` only.
    pub fn once<F>(&self, name: &str, handler: F) -> RpcResult<RemovalToken>
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.inner.events.once(name, Arc::new(handler))
    }

    /// Like [`on`](Self::on), keeping the handler's identity for [`off`](Self::off).
    pub fn on_shared(&self, name: &str, handler: EventHandler) -> RpcResult<RemovalToken> {
        self.inner.events.on(name, handler)
    }

    /// Like [`once`](Self::once), keeping the handler's identity for [`off`](Self::off).
    pub fn once_shared(&self, name: &str, handler: EventHandler) -> RpcResult<RemovalToken> {
        self.inner.events.once(name, handler)
    }

    /// Remove a subscription made with `on_shared`/`once_shared`.
    pub fn off(&self, name: &str, handler: &EventHandler) -> bool {
        self.inner.events.off(name, handler)
    }

    // =========================================================================
    // LIFECYCLE / INTROSPECTION
    // =========================================================================

    /// Stop listening on the transport and fail all outstanding calls with
    /// [`RpcError::Closed`]. The transport itself stays open for the peer.
    ///
    /// Returns the number of calls cancelled.
    pub fn close(&self) -> usize {
        self.inner.closed.store(true, Ordering::SeqCst);
        let detached = self.inner.detach();
        let cancelled = self.inner.pending.cancel_all();
        debug!(detached = detached, cancelled = cancelled, "Endpoint closed");
        cancelled
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Number of calls awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.pending_count()
    }

    /// Request statistics.
    pub fn stats(&self) -> PendingSnapshot {
        self.inner.pending.stats().snapshot()
    }

    /// Names with a registered handler, sorted.
    pub fn endpoint_names(&self) -> Vec<String> {
        self.inner.registry.names()
    }

    pub fn has_endpoint(&self, name: &str) -> bool {
        self.inner.registry.contains(name)
    }

    /// Number of local subscriptions to event `name`.
    pub fn listener_count(&self, name: &str) -> usize {
        self.inner.events.listener_count(name)
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.inner.config
    }
}
