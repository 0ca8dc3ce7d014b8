//! Request-ID allocation and response correlation.

use crate::{SessionError, SessionResult};
use hass_ws_protocol::{MessageId, Response};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Connection counter. IDs restart on every connection, so an ID is only
/// meaningful together with the generation it was issued under.
pub(crate) type Generation = u64;

/// Outstanding requests of one connection, keyed by request ID.
///
/// Starts closed; [`PendingRequests::reset`] opens it for a new connection.
pub(crate) struct PendingRequests {
    next_id: AtomicI64,
    inner: Mutex<PendingInner>,
}

struct PendingInner {
    waiters: HashMap<MessageId, oneshot::Sender<Response>>,
    generation: Generation,
    closed: bool,
}

impl PendingRequests {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            inner: Mutex::new(PendingInner {
                waiters: HashMap::new(),
                generation: 0,
                closed: true,
            }),
        }
    }

    /// Restart numbering at 1 and accept registrations for `generation`.
    pub(crate) fn reset(&self, generation: Generation) {
        let mut inner = self.inner.lock();
        inner.waiters.clear();
        inner.generation = generation;
        inner.closed = false;
        self.next_id.store(1, Ordering::SeqCst);
    }

    /// Allocate the next request ID.
    pub(crate) fn allocate(&self) -> MessageId {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Register a waiter for `id` under the current generation.
    pub(crate) fn register(
        &self,
        id: MessageId,
    ) -> SessionResult<(oneshot::Receiver<Response>, Generation)> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(SessionError::SessionClosed);
        }

        let (tx, rx) = oneshot::channel();
        if inner.waiters.insert(id, tx).is_some() {
            warn!(id, "Replaced an outstanding waiter with a reused request ID");
        }
        Ok((rx, inner.generation))
    }

    /// Deliver a response to its waiter. Returns false for strays.
    pub(crate) fn resolve(&self, response: Response) -> bool {
        let id = response.id;
        let Some(tx) = self.inner.lock().waiters.remove(&id) else {
            return false;
        };

        if tx.send(response).is_err() {
            debug!(id, "Waiter went away before its response arrived");
        }
        true
    }

    /// Forget the waiter for `id`, if it belongs to `generation`.
    pub(crate) fn cancel(&self, id: MessageId, generation: Generation) -> bool {
        let mut inner = self.inner.lock();
        if inner.generation != generation {
            return false;
        }
        inner.waiters.remove(&id).is_some()
    }

    /// Refuse new registrations and fail every outstanding waiter.
    ///
    /// Dropping the senders wakes each waiter with a closed-channel error,
    /// which callers surface as [`SessionError::SessionClosed`].
    pub(crate) fn close_all(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.closed = true;
        let failed = inner.waiters.len();
        inner.waiters.clear();
        failed
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inner.lock().waiters.len()
    }
}

/// Removes a waiter when the awaiting call is abandoned.
pub(crate) struct PendingGuard<'a> {
    pub(crate) pending: &'a PendingRequests,
    pub(crate) id: MessageId,
    pub(crate) generation: Generation,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.cancel(self.id, self.generation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn open() -> PendingRequests {
        let pending = PendingRequests::new();
        pending.reset(1);
        pending
    }

    #[test]
    fn test_allocate_is_monotonic() {
        let pending = open();
        let ids: Vec<_> = (0..5).map(|_| pending.allocate()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_reset_restarts_numbering() {
        let pending = open();
        pending.allocate();
        pending.allocate();
        pending.reset(2);
        assert_eq!(pending.allocate(), 1);
    }

    #[test]
    fn test_register_when_closed_fails() {
        let pending = PendingRequests::new();
        assert!(matches!(
            pending.register(1),
            Err(SessionError::SessionClosed)
        ));
    }

    #[tokio::test]
    async fn test_resolve_delivers_once() {
        let pending = open();
        let (rx, _) = pending.register(1).unwrap();

        assert!(pending.resolve(Response::success(1, json!({ "ok": true }))));
        // Second resolution is a stray
        assert!(!pending.resolve(Response::success(1, json!({ "ok": false }))));

        let response = rx.await.unwrap();
        assert_eq!(response.value(), Some(&json!({ "ok": true })));
        assert_eq!(pending.len(), 0);
    }

    #[tokio::test]
    async fn test_resolve_out_of_order() {
        let pending = open();
        let (first, _) = pending.register(1).unwrap();
        let (second, _) = pending.register(2).unwrap();

        assert!(pending.resolve(Response::success(2, json!("two"))));
        assert!(pending.resolve(Response::success(1, json!("one"))));

        assert_eq!(first.await.unwrap().value(), Some(&json!("one")));
        assert_eq!(second.await.unwrap().value(), Some(&json!("two")));
    }

    #[tokio::test]
    async fn test_close_all_fails_waiters() {
        let pending = open();
        let (rx, _) = pending.register(1).unwrap();

        assert_eq!(pending.close_all(), 1);
        assert!(rx.await.is_err());
        assert!(pending.register(2).is_err());
    }

    #[test]
    fn test_guard_removes_waiter() {
        let pending = open();
        let (_rx, generation) = pending.register(3).unwrap();
        {
            let _guard = PendingGuard {
                pending: &pending,
                id: 3,
                generation,
            };
        }
        assert_eq!(pending.len(), 0);
        assert!(!pending.resolve(Response::success(3, json!(null))));
    }

    #[tokio::test]
    async fn test_stale_guard_keeps_new_waiter() {
        let pending = open();
        let (_old, old_generation) = pending.register(1).unwrap();

        pending.close_all();
        pending.reset(old_generation + 1);
        let (new, _) = pending.register(pending.allocate()).unwrap();

        // The abandoned call from the previous connection shares ID 1
        drop(PendingGuard {
            pending: &pending,
            id: 1,
            generation: old_generation,
        });
        assert_eq!(pending.len(), 1);

        assert!(pending.resolve(Response::success(1, json!("fresh"))));
        assert_eq!(new.await.unwrap().value(), Some(&json!("fresh")));
    }
}
