//! # peer-rpc - Request/Response and Events over One Channel
//!
//! Turns a raw bidirectional message channel between two processes into:
//!
//! - correlated request/response calls with per-call timeouts and
//!   exactly-once settlement (`act` / `add`), and
//! - a named publish/subscribe event layer (`emit` / `on` / `once` / `off`),
//!
//! multiplexed over the same channel without interfering with each other.
//!
//! ```text
//! ┌──────────────┐                          ┌──────────────┐
//! │  Endpoint A  │   Request  (kind "Q") →  │  Endpoint B  │
//! │              │ ← Response (kind "R")    │              │
//! │              │ ↔ Notification ("N")     │              │
//! └──────┬───────┘                          └──────┬───────┘
//!        └────────────── Transport ────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use peer_rpc::{Endpoint, EndpointConfig, MemoryTransport};
//! use serde_json::{json, Value};
//!
//! # async fn demo() -> Result<(), peer_rpc::RpcError> {
//! let (a, b) = MemoryTransport::pair();
//! let client = Endpoint::new(a, EndpointConfig::default())?;
//! let server = Endpoint::new(b, EndpointConfig::default())?;
//!
//! let _echo = server.add("echo", |data: Value| async move { Ok(data) })?;
//! assert_eq!(client.act("echo", json!(42)).await?, json!(42));
//! # Ok(())
//! # }
//! ```

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod config;
pub mod correlation;
pub mod endpoint;
pub mod error;
pub mod events;
pub mod memory;
pub mod pending;
pub mod registry;
pub mod token;
pub mod transport;
pub mod wire;

// Re-export main types
pub use config::{ActOptions, ConfigError, EndpointConfig, DEFAULT_ACT_TIMEOUT};
pub use correlation::{CorrelationId, IdGenerator, RandomIdGenerator, SequentialIdGenerator};
pub use endpoint::{Endpoint, EndpointBuilder};
pub use error::{RpcError, RpcResult};
pub use events::{EventChannel, EventHandler};
pub use memory::MemoryTransport;
pub use pending::{PendingRequestStore, PendingSnapshot, PendingStats};
pub use registry::{EndpointRegistry, Handler, HandlerFuture, SyncHandler, TypedHandler};
pub use token::RemovalToken;
pub use transport::{ListenerId, MessageListener, Transport};
pub use wire::{
    is_notification, is_request, is_response, Message, Notification, Request, Response,
    SerializedError,
};
