//! Request correlation.
//!
//! A [`RequestCorrelator`] hands out ids, remembers who is waiting for each
//! one, and completes the waiter when the matching terminal frame arrives.
//! It is the guest-side counterpart of the host's active-request table.

use super::error::{Result, RpcError};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::trace;

struct Pending<T> {
    tx: oneshot::Sender<Result<T>>,
    created_at: Instant,
}

/// Pending-request table keyed by numeric id.
pub struct RequestCorrelator<T> {
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, Pending<T>>>,
}

impl<T> Default for RequestCorrelator<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RequestCorrelator<T> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Next id, strictly increasing from 1 for this instance.
    pub fn generate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Start waiting for `id`.
    pub fn register(&self, id: u64) -> Result<PendingRequest<T>> {
        let mut pending = self.lock();
        if pending.contains_key(&id) {
            return Err(RpcError::DuplicateRequest(id));
        }
        let (tx, rx) = oneshot::channel();
        pending.insert(
            id,
            Pending {
                tx,
                created_at: Instant::now(),
            },
        );
        Ok(PendingRequest { id, rx })
    }

    /// Complete `id` with `value`. Returns false when nothing was waiting.
    pub fn resolve(&self, id: u64, value: T) -> bool {
        self.complete(id, Ok(value))
    }

    /// Fail `id` with `error`. Returns false when nothing was waiting.
    pub fn reject(&self, id: u64, error: RpcError) -> bool {
        self.complete(id, Err(error))
    }

    /// Forget `id` without completing it. The waiter observes
    /// [`RpcError::Cancelled`].
    pub fn cancel(&self, id: u64) -> bool {
        self.lock().remove(&id).is_some()
    }

    /// Fail every waiter, e.g. when the channel closes.
    pub fn reject_all(&self, error: impl Fn() -> RpcError) {
        let drained: Vec<_> = self.lock().drain().collect();
        for (id, entry) in drained {
            trace!("Correlator: failing pending request {}", id);
            let _ = entry.tx.send(Err(error()));
        }
    }

    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.lock().contains_key(&id)
    }

    /// How long `id` has been waiting.
    pub fn age(&self, id: u64) -> Option<Duration> {
        self.lock().get(&id).map(|p| p.created_at.elapsed())
    }

    fn complete(&self, id: u64, outcome: Result<T>) -> bool {
        let Some(entry) = self.lock().remove(&id) else {
            trace!("Correlator: no pending request {}", id);
            return false;
        };
        // The waiter may have given up already; that is not an error here.
        let _ = entry.tx.send(outcome);
        true
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, Pending<T>>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Awaitable completion of one registered request.
pub struct PendingRequest<T> {
    id: u64,
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> PendingRequest<T> {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl<T> Future for PendingRequest<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(RpcError::Cancelled)))
    }
}
