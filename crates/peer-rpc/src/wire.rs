//! Wire protocol.
//!
//! Three message shapes share one channel, told apart by the `kind` field:
//!
//! | kind | shape        | fields                                     |
//! |------|--------------|--------------------------------------------|
//! | `Q`  | Request      | `correlationId`, `name`, `data`            |
//! | `R`  | Response     | `correlationId`, `name`, `data`, `error?`  |
//! | `N`  | Notification | `name`, `data?`                            |
//!
//! The channel may carry traffic that does not belong to us, so inbound
//! values are checked with the `is_*` guards before any typed access.

use crate::correlation::CorrelationId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::fmt;

/// Name of the discriminator field.
pub const KIND_FIELD: &str = "kind";

/// Discriminator values.
pub mod kind {
    pub const REQUEST: &str = "Q";
    pub const RESPONSE: &str = "R";
    pub const NOTIFICATION: &str = "N";
}

/// A message exchanged over the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Message {
    #[serde(rename = "Q")]
    Request(Request),
    #[serde(rename = "R")]
    Response(Response),
    #[serde(rename = "N")]
    Notification(Notification),
}

/// Correlated call to a named endpoint on the peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub correlation_id: CorrelationId,
    pub name: String,
    #[serde(default)]
    pub data: Value,
}

/// Reply to exactly one [`Request`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub correlation_id: CorrelationId,
    pub name: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<SerializedError>,
}

/// One-way event. Never answered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Message {
    /// Validate an inbound value and convert it to a typed message.
    ///
    /// Returns `None` for anything that is not one of our three shapes.
    pub fn classify(value: &Value) -> Option<Self> {
        if !(is_request(value) || is_response(value) || is_notification(value)) {
            return None;
        }
        serde_json::from_value(value.clone()).ok()
    }

    /// Encode for the transport.
    pub fn to_value(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }

    /// Endpoint or event name carried by the message.
    pub fn name(&self) -> &str {
        match self {
            Message::Request(r) => &r.name,
            Message::Response(r) => &r.name,
            Message::Notification(n) => &n.name,
        }
    }

    /// Correlation id, present only on requests and responses.
    pub fn correlation_id(&self) -> Option<&CorrelationId> {
        match self {
            Message::Request(r) => Some(&r.correlation_id),
            Message::Response(r) => Some(&r.correlation_id),
            Message::Notification(_) => None,
        }
    }
}

impl Request {
    pub fn new(correlation_id: CorrelationId, name: impl Into<String>, data: Value) -> Self {
        Self {
            correlation_id,
            name: name.into(),
            data,
        }
    }
}

impl Response {
    /// Successful reply to `request`.
    pub fn success(request: &Request, data: Value) -> Self {
        Self {
            correlation_id: request.correlation_id.clone(),
            name: request.name.clone(),
            data,
            error: None,
        }
    }

    /// Failed reply to `request`.
    pub fn failure(request: &Request, error: SerializedError) -> Self {
        Self {
            correlation_id: request.correlation_id.clone(),
            name: request.name.clone(),
            data: Value::Null,
            error: Some(error),
        }
    }

    /// Split into the caller-facing outcome.
    pub fn into_result(self) -> Result<Value, SerializedError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.data),
        }
    }
}

impl Notification {
    pub fn new(name: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }
}

fn has_kind(value: &Value, expected: &str) -> bool {
    value.get(KIND_FIELD).and_then(Value::as_str) == Some(expected)
}

fn has_string(value: &Value, field: &str) -> bool {
    value.get(field).map(Value::is_string).unwrap_or(false)
}

fn valid_error_field(value: &Value) -> bool {
    match value.get("error") {
        None | Some(Value::Null) => true,
        Some(err) => has_string(err, "message"),
    }
}

fn valid_optional_string(value: &Value, field: &str) -> bool {
    matches!(value.get(field), None | Some(Value::Null) | Some(Value::String(_)))
}

/// True if `value` has the shape of a [`Request`].
pub fn is_request(value: &Value) -> bool {
    has_kind(value, kind::REQUEST) && has_string(value, "correlationId") && has_string(value, "name")
}

/// True if `value` has the shape of a [`Response`].
pub fn is_response(value: &Value) -> bool {
    has_kind(value, kind::RESPONSE)
        && has_string(value, "correlationId")
        && has_string(value, "name")
        && valid_error_field(value)
        && value.get("error").map_or(true, |err| {
            valid_optional_string(err, "name") && valid_optional_string(err, "stack")
        })
}

/// True if `value` has the shape of a [`Notification`].
pub fn is_notification(value: &Value) -> bool {
    has_kind(value, kind::NOTIFICATION) && has_string(value, "name")
}

/// Error data carried across the wire.
///
/// Only strings survive the trip; the peer gets the message, an optional
/// type name, and an optional stack or cause chain as inert text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

/// Name given to the "no such endpoint" error.
pub const NOT_FOUND_ERROR_NAME: &str = "NotFoundError";

/// Name given to errors produced from a handler panic.
pub const PANIC_ERROR_NAME: &str = "Panic";

impl SerializedError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            name: None,
            stack: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Reply for a request whose endpoint is not registered.
    pub fn not_found(endpoint: &str) -> Self {
        Self::new(format!("RPC \"{}\" not found.", endpoint)).with_name(NOT_FOUND_ERROR_NAME)
    }

    /// Convert a handler error.
    ///
    /// A `SerializedError` returned through `anyhow` is passed on as is, so
    /// handlers can choose the `name` the peer sees. Otherwise the display
    /// text becomes the message and the cause chain becomes the stack.
    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        if let Some(inner) = err.downcast_ref::<SerializedError>() {
            return inner.clone();
        }

        let mut error = Self::new(err.to_string()).with_name("Error");
        let causes: Vec<String> = err.chain().skip(1).map(ToString::to_string).collect();
        if !causes.is_empty() {
            error.stack = Some(format!("Caused by:\n    {}", causes.join("\n    ")));
        }
        error
    }

    /// Convert a panic payload caught at the handler boundary.
    ///
    /// String payloads (the usual `panic!("...")`) become the message verbatim.
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "handler panicked".to_string()
        };
        Self::new(message).with_name(PANIC_ERROR_NAME)
    }

    /// True if this is the peer's "no such endpoint" reply.
    pub fn is_not_found(&self) -> bool {
        self.name.as_deref() == Some(NOT_FOUND_ERROR_NAME)
    }
}

impl fmt::Display for SerializedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{}: {}", name, self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for SerializedError {}
