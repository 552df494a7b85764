//! Correlation IDs for request/response matching.
//!
//! The default generator uses 128 random bits (UUID v4), which needs no shared
//! counter between call sites. A sequential generator is available for
//! deterministic ids in logs and tests.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Correlation ID linking one request to its one matching response.
///
/// Ids received from the peer are opaque strings; only ids generated locally
/// are guaranteed to have a particular shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generate a new random correlation ID (UUID v4, simple hex form).
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the id, returning the underlying string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for CorrelationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for CorrelationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<Uuid> for CorrelationId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid.simple().to_string())
    }
}

impl AsRef<str> for CorrelationId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Source of correlation ids for one endpoint.
///
/// Two calls on the same generator never return equal ids. No ordering is
/// required.
pub trait IdGenerator: Send + Sync {
    /// Produce the next id.
    fn next_id(&self) -> CorrelationId;
}

/// Random 128-bit ids. This is the default.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomIdGenerator;

impl IdGenerator for RandomIdGenerator {
    fn next_id(&self) -> CorrelationId {
        CorrelationId::new()
    }
}

/// Strictly increasing ids of the form `<prefix><n>`.
///
/// Backed by an atomic counter, so two calls landing at the same instant
/// still receive distinct values.
#[derive(Debug, Default)]
pub struct SequentialIdGenerator {
    prefix: String,
    counter: AtomicU64,
}

impl SequentialIdGenerator {
    /// Create a generator starting at 1 with no prefix.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a generator whose ids start with `prefix`.
    ///
    /// Useful when both sides log ids and should not be confused.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: AtomicU64::new(0),
        }
    }
}

impl IdGenerator for SequentialIdGenerator {
    fn next_id(&self) -> CorrelationId {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        CorrelationId(format!("{}{}", self.prefix, n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_new_correlation_id() {
        let id1 = CorrelationId::new();
        let id2 = CorrelationId::new();
        assert_ne!(id1, id2);
        assert_eq!(id1.as_str().len(), 32);
    }

    #[test]
    fn test_correlation_id_is_plain_string_on_wire() {
        let id = CorrelationId::from("abc");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"abc\"");
        let parsed: CorrelationId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_random_generator_unique() {
        let gen = RandomIdGenerator;
        let ids: HashSet<_> = (0..1000).map(|_| gen.next_id()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_sequential_generator_prefix() {
        let gen = SequentialIdGenerator::with_prefix("a-");
        assert_eq!(gen.next_id().as_str(), "a-1");
        assert_eq!(gen.next_id().as_str(), "a-2");
    }

    #[test]
    fn test_sequential_generator_concurrent_unique() {
        let gen = Arc::new(SequentialIdGenerator::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let gen = gen.clone();
                std::thread::spawn(move || (0..250).map(|_| gen.next_id()).collect::<Vec<_>>())
            })
            .collect();

        let mut all = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(all.insert(id));
            }
        }
        assert_eq!(all.len(), 1000);
    }
}
