//! Pending request store.
//!
//! Maps correlation IDs to callers waiting on a response. Every exit path
//! (response, timeout, cancellation) removes the entry from the map first,
//! and only the path that actually removed it may settle the caller. A late
//! or duplicate response therefore finds nothing and is dropped.
//!
//! Flow:
//! 1. `act` generates a CorrelationId
//! 2. `act` calls `register()` to get a oneshot receiver
//! 3. `act` sends the request with that CorrelationId
//! 4. The inbound listener calls `complete()` with the response
//! 5. `act` awaits the receiver or times out and calls `expire()`

use crate::correlation::CorrelationId;
use crate::wire::Response;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// A request waiting for its response.
struct PendingRequest {
    /// Channel to hand the response to the caller
    sender: oneshot::Sender<Response>,
    /// When the request was registered
    created_at: Instant,
    /// Endpoint name (for logging)
    name: String,
    /// Timeout for this request
    timeout: Duration,
}

/// Statistics for the pending request store
#[derive(Debug, Default)]
pub struct PendingStats {
    /// Total requests registered
    pub total_registered: AtomicU64,
    /// Total requests settled by a response
    pub total_completed: AtomicU64,
    /// Total requests timed out
    pub total_timeouts: AtomicU64,
    /// Total requests cancelled (send failure, dropped caller, close)
    pub total_cancelled: AtomicU64,
    /// Responses that matched no pending request
    pub total_late: AtomicU64,
}

/// Snapshot of [`PendingStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingSnapshot {
    pub registered: u64,
    pub completed: u64,
    pub timeouts: u64,
    pub cancelled: u64,
    pub late: u64,
}

impl PendingStats {
    pub fn snapshot(&self) -> PendingSnapshot {
        PendingSnapshot {
            registered: self.total_registered.load(Ordering::Relaxed),
            completed: self.total_completed.load(Ordering::Relaxed),
            timeouts: self.total_timeouts.load(Ordering::Relaxed),
            cancelled: self.total_cancelled.load(Ordering::Relaxed),
            late: self.total_late.load(Ordering::Relaxed),
        }
    }
}

/// Outstanding requests of one endpoint.
#[derive(Default)]
pub struct PendingRequestStore {
    /// Map of correlation ID to pending request
    pending: DashMap<CorrelationId, PendingRequest>,
    /// Statistics
    stats: PendingStats,
}

impl PendingRequestStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending request and get a receiver for its response.
    pub fn register(
        &self,
        correlation_id: CorrelationId,
        name: &str,
        timeout: Duration,
    ) -> oneshot::Receiver<Response> {
        let (tx, rx) = oneshot::channel();

        let request = PendingRequest {
            sender: tx,
            created_at: Instant::now(),
            name: name.to_string(),
            timeout,
        };

        debug!(
            correlation_id = %correlation_id,
            name = name,
            timeout_ms = timeout.as_millis() as u64,
            "Registered pending request"
        );

        self.pending.insert(correlation_id, request);
        self.stats.total_registered.fetch_add(1, Ordering::Relaxed);

        rx
    }

    /// Settle the request matching `response`.
    ///
    /// Returns false if no request with that id is pending (already settled,
    /// timed out, or never ours).
    pub fn complete(&self, response: Response) -> bool {
        let Some((correlation_id, pending)) = self.pending.remove(&response.correlation_id) else {
            self.stats.total_late.fetch_add(1, Ordering::Relaxed);
            warn!(
                correlation_id = %response.correlation_id,
                name = %response.name,
                "Response for unknown or expired correlation ID"
            );
            return false;
        };

        let response_time = pending.created_at.elapsed();
        match pending.sender.send(response) {
            Ok(()) => {
                self.stats.total_completed.fetch_add(1, Ordering::Relaxed);
                debug!(
                    correlation_id = %correlation_id,
                    name = pending.name,
                    response_time_ms = response_time.as_millis() as u64,
                    "Completed pending request"
                );
                true
            }
            Err(_) => {
                // Caller stopped waiting between removal and send
                self.stats.total_cancelled.fetch_add(1, Ordering::Relaxed);
                debug!(
                    correlation_id = %correlation_id,
                    name = pending.name,
                    "Pending request receiver dropped"
                );
                false
            }
        }
    }

    /// Remove a request whose timer fired.
    ///
    /// Returns false if a response already settled it.
    pub fn expire(&self, correlation_id: &CorrelationId) -> bool {
        let Some((_, request)) = self.pending.remove(correlation_id) else {
            return false;
        };
        self.stats.total_timeouts.fetch_add(1, Ordering::Relaxed);
        warn!(
            correlation_id = %correlation_id,
            name = request.name,
            elapsed_ms = request.created_at.elapsed().as_millis() as u64,
            timeout_ms = request.timeout.as_millis() as u64,
            "Pending request timed out"
        );
        true
    }

    /// Cancel a pending request
    pub fn cancel(&self, correlation_id: &CorrelationId) -> bool {
        if self.pending.remove(correlation_id).is_some() {
            self.stats.total_cancelled.fetch_add(1, Ordering::Relaxed);
            debug!(correlation_id = %correlation_id, "Cancelled pending request");
            true
        } else {
            false
        }
    }

    /// Cancel everything. Waiting callers see their channel close.
    ///
    /// Returns the number of requests cancelled.
    pub fn cancel_all(&self) -> usize {
        let ids: Vec<CorrelationId> = self.pending.iter().map(|e| e.key().clone()).collect();
        ids.iter().filter(|id| self.cancel(id)).count()
    }

    /// Get number of currently pending requests
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Check if a correlation ID is pending
    pub fn is_pending(&self, correlation_id: &CorrelationId) -> bool {
        self.pending.contains_key(correlation_id)
    }

    /// Get statistics
    pub fn stats(&self) -> &PendingStats {
        &self.stats
    }
}

/// Cancels its request on drop unless it was already settled.
///
/// Covers callers that stop awaiting `act` before it finishes.
pub(crate) struct PendingGuard<'a> {
    store: &'a PendingRequestStore,
    correlation_id: CorrelationId,
}

impl<'a> PendingGuard<'a> {
    pub(crate) fn new(store: &'a PendingRequestStore, correlation_id: CorrelationId) -> Self {
        Self {
            store,
            correlation_id,
        }
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.store.cancel(&self.correlation_id);
    }
}
