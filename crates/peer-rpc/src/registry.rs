//! Endpoint registry: one handler per request name.
//!
//! The registry only maps names to handlers. Answering "not found" and
//! sending replies is the engine's job.

use crate::error::{RpcError, RpcResult};
use crate::token::RemovalToken;
use anyhow::Context;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

/// Future returned by a handler.
pub type HandlerFuture = BoxFuture<'static, anyhow::Result<Value>>;

/// Something that can answer a request.
///
/// Implemented for any `Fn(Value) -> impl Future<Output = anyhow::Result<Value>>`.
pub trait Handler: Send + Sync + 'static {
    fn call(&self, data: Value) -> HandlerFuture;
}

impl<F, Fut> Handler for F
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    fn call(&self, data: Value) -> HandlerFuture {
        Box::pin(self(data))
    }
}

/// Adapts a synchronous function.
///
/// The function runs when the returned future is first polled, not when
/// `call` is invoked, so a panic surfaces inside the dispatch task.
pub struct SyncHandler<F>(Arc<F>);

impl<F> SyncHandler<F>
where
    F: Fn(Value) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self(Arc::new(f))
    }
}

impl<F> Handler for SyncHandler<F>
where
    F: Fn(Value) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    fn call(&self, data: Value) -> HandlerFuture {
        let f = self.0.clone();
        Box::pin(async move { f(data) })
    }
}

/// Adapts a handler with typed request and response payloads.
pub struct TypedHandler<F, Req, Resp, Fut> {
    f: Arc<F>,
    _marker: PhantomData<fn(Req) -> (Resp, Fut)>,
}

impl<F, Req, Resp, Fut> TypedHandler<F, Req, Resp, Fut>
where
    F: Fn(Req) -> Fut,
    Fut: Future<Output = anyhow::Result<Resp>>,
{
    pub fn new(f: F) -> Self {
        Self {
            f: Arc::new(f),
            _marker: PhantomData,
        }
    }
}

impl<F, Req, Resp, Fut> Handler for TypedHandler<F, Req, Resp, Fut>
where
    F: Fn(Req) -> Fut + Send + Sync + 'static,
    Req: DeserializeOwned + Send + 'static,
    Resp: Serialize + Send + 'static,
    Fut: Future<Output = anyhow::Result<Resp>> + Send + 'static,
{
    fn call(&self, data: Value) -> HandlerFuture {
        let f = self.f.clone();
        Box::pin(async move {
            let request: Req =
                serde_json::from_value(data).context("invalid request payload")?;
            let response = f(request).await?;
            serde_json::to_value(response).context("response payload is not serializable")
        })
    }
}

struct Entry {
    id: u64,
    handler: Arc<dyn Handler>,
}

#[derive(Default)]
struct RegistryInner {
    handlers: RwLock<HashMap<String, Entry>>,
    next_id: AtomicU64,
}

impl RegistryInner {
    fn remove(&self, name: &str, id: u64) -> bool {
        let mut handlers = self.handlers.write();
        match handlers.get(name) {
            Some(entry) if entry.id == id => {
                handlers.remove(name);
                debug!(name = name, "Endpoint removed");
                true
            }
            _ => false,
        }
    }
}

/// Maps request names to handlers for one endpoint.
#[derive(Clone, Default)]
pub struct EndpointRegistry {
    inner: Arc<RegistryInner>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `name`.
    ///
    /// Fails with [`RpcError::InvalidName`] for an empty name and
    /// [`RpcError::DuplicateEndpoint`] if the name is taken.
    pub fn add(&self, name: &str, handler: impl Handler) -> RpcResult<RemovalToken> {
        self.add_arc(name, Arc::new(handler))
    }

    /// Register an already shared handler.
    pub fn add_arc(&self, name: &str, handler: Arc<dyn Handler>) -> RpcResult<RemovalToken> {
        if name.is_empty() {
            return Err(RpcError::InvalidName);
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut handlers = self.inner.handlers.write();
            if handlers.contains_key(name) {
                return Err(RpcError::DuplicateEndpoint(name.to_string()));
            }
            handlers.insert(name.to_string(), Entry { id, handler });
        }
        debug!(name = name, "Endpoint registered");

        let weak: Weak<RegistryInner> = Arc::downgrade(&self.inner);
        let owned = name.to_string();
        Ok(RemovalToken::new(name, move || {
            if let Some(inner) = weak.upgrade() {
                inner.remove(&owned, id);
            }
        }))
    }

    /// Start the handler for `name`, or `None` if nothing is registered.
    ///
    /// The handler is invoked lazily inside the returned future.
    pub fn dispatch(&self, name: &str, data: Value) -> Option<HandlerFuture> {
        let handler = self.handler(name)?;
        Some(Box::pin(async move { handler.call(data).await }))
    }

    /// Look up the handler for `name`.
    pub fn handler(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.inner
            .handlers
            .read()
            .get(name)
            .map(|entry| entry.handler.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.handlers.read().contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.handlers.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.inner.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    async fn echo(data: Value) -> anyhow::Result<Value> {
        Ok(data)
    }

    #[tokio::test]
    async fn test_add_and_dispatch() {
        let registry = EndpointRegistry::new();
        let _token = registry.add("echo", echo).unwrap();

        let result = registry.dispatch("echo", json!({"a": 1})).unwrap().await;
        assert_eq!(result.unwrap(), json!({"a": 1}));
        assert!(registry.dispatch("missing", Value::Null).is_none());
    }

    #[test]
    fn test_empty_name_rejected() {
        let registry = EndpointRegistry::new();
        assert!(matches!(registry.add("", echo), Err(RpcError::InvalidName)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_duplicate_rejected() {
        let registry = EndpointRegistry::new();
        let _token = registry.add("echo", echo).unwrap();
        match registry.add("echo", echo) {
            Err(RpcError::DuplicateEndpoint(name)) => assert_eq!(name, "echo"),
            other => panic!("expected duplicate error, got {:?}", other.map(|_| ())),
        }
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_reregister_after_removal() {
        let registry = EndpointRegistry::new();
        let token = registry.add("echo", echo).unwrap();
        assert!(token.remove());
        assert!(!registry.contains("echo"));

        let _second = registry.add("echo", echo).unwrap();
        assert!(registry.contains("echo"));
    }

    #[test]
    fn test_stale_token_does_not_remove_new_handler() {
        let registry = EndpointRegistry::new();
        let first = registry.add("echo", echo).unwrap();
        first.remove();
        let _second = registry.add("echo", echo).unwrap();

        // Already used; must not touch the new registration
        assert!(!first.remove());
        assert!(registry.contains("echo"));
    }

    #[test]
    fn test_names_sorted() {
        let registry = EndpointRegistry::new();
        let _b = registry.add("b", echo).unwrap();
        let _a = registry.add("a", echo).unwrap();
        assert_eq!(registry.names(), vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_sync_handler() {
        let registry = EndpointRegistry::new();
        let _token = registry
            .add(
                "double",
                SyncHandler::new(|data: Value| {
                    let n = data.as_i64().ok_or_else(|| anyhow::anyhow!("not a number"))?;
                    Ok(json!(n * 2))
                }),
            )
            .unwrap();

        let ok = registry.dispatch("double", json!(21)).unwrap().await;
        assert_eq!(ok.unwrap(), json!(42));

        let err = registry.dispatch("double", json!("x")).unwrap().await;
        assert_eq!(err.unwrap_err().to_string(), "not a number");
    }

    #[derive(Deserialize)]
    struct Add {
        a: i64,
        b: i64,
    }

    #[tokio::test]
    async fn test_typed_handler() {
        let registry = EndpointRegistry::new();
        let _token = registry
            .add(
                "add",
                TypedHandler::new(|req: Add| async move { Ok::<_, anyhow::Error>(req.a + req.b) }),
            )
            .unwrap();

        let ok = registry.dispatch("add", json!({"a": 2, "b": 3})).unwrap().await;
        assert_eq!(ok.unwrap(), json!(5));

        let err = registry.dispatch("add", json!({"a": 2})).unwrap().await;
        assert!(err
            .unwrap_err()
            .to_string()
            .contains("invalid request payload"));
    }
}
