//! Request correlator - matches worker responses to waiting callers.
//!
//! Each call registers a oneshot under a fresh id. Whichever of
//! [`Correlator::resolve`] or [`Correlator::expire`] removes the entry first
//! wins; the other finds nothing and is a no-op. `DashMap::remove` is the
//! only synchronization point.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::bridge::protocol::{RequestId, RpcResponse};
use crate::stats::{BridgeStats, StatsSnapshot};

/// Default cap on concurrently pending calls.
pub const DEFAULT_MAX_PENDING: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum RegisterError {
    #[error("too many pending tool calls (limit {limit})")]
    Saturated { limit: usize },

    #[error("request id {0} is already pending")]
    Duplicate(RequestId),
}

struct PendingCall {
    created_at: Instant,
    completion: oneshot::Sender<RpcResponse>,
}

pub struct Correlator {
    next_id: AtomicU64,
    pending: DashMap<RequestId, PendingCall>,
    max_pending: Option<usize>,
    stats: BridgeStats,
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new(Some(DEFAULT_MAX_PENDING))
    }
}

impl Correlator {
    /// `None` disables the pending cap.
    pub fn new(max_pending: Option<usize>) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: DashMap::new(),
            max_pending,
            stats: BridgeStats::new(),
        }
    }

    /// Next id. Starts at 1, strictly increasing, never reused.
    pub fn allocate_id(&self) -> RequestId {
        RequestId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn register(&self, id: RequestId) -> Result<oneshot::Receiver<RpcResponse>, RegisterError> {
        // len() locks every shard; must run before entry() takes one.
        if let Some(limit) = self.max_pending
            && self.pending.len() >= limit
        {
            self.stats.record_saturated();
            tracing::warn!(%id, limit, "Rejecting tool call: too many pending");
            return Err(RegisterError::Saturated { limit });
        }

        match self.pending.entry(id) {
            Entry::Occupied(_) => Err(RegisterError::Duplicate(id)),
            Entry::Vacant(slot) => {
                let (tx, rx) = oneshot::channel();
                slot.insert(PendingCall {
                    created_at: Instant::now(),
                    completion: tx,
                });
                Ok(rx)
            }
        }
    }

    /// Hand a response to its caller. Returns false if nobody was waiting.
    pub fn resolve(&self, response: RpcResponse) -> bool {
        let Some(id) = response.id else {
            self.stats.record_unmatched();
            tracing::debug!(
                error = response.error.as_ref().map(|e| e.message.as_str()),
                "Dropping response without id"
            );
            return false;
        };

        let Some((_, call)) = self.pending.remove(&id) else {
            self.stats.record_unmatched();
            tracing::debug!(%id, "Dropping unmatched response (late or duplicate)");
            return false;
        };

        self.stats.record_resolved();
        if response.error.is_some() {
            self.stats.record_worker_error();
        }
        tracing::debug!(
            %id,
            elapsed_ms = call.created_at.elapsed().as_millis() as u64,
            "Resolved tool call"
        );
        // Receiver gone means the caller was dropped between remove and send.
        let _ = call.completion.send(response);
        true
    }

    /// Time out a call. Returns false if it had already been resolved.
    pub fn expire(&self, id: RequestId) -> bool {
        match self.pending.remove(&id) {
            Some((_, call)) => {
                self.stats.record_timed_out();
                tracing::warn!(
                    %id,
                    elapsed_ms = call.created_at.elapsed().as_millis() as u64,
                    "Tool call timed out"
                );
                true
            }
            None => false,
        }
    }

    /// Drop a pending entry without counting it (caller went away).
    pub fn forget(&self, id: RequestId) {
        if self.pending.remove(&id).is_some() {
            tracing::trace!(%id, "Forgot abandoned tool call");
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn stats(&self) -> &BridgeStats {
        &self.stats
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.stats.snapshot(self.pending())
    }
}
