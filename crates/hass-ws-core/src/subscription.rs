//! Event subscriptions.
//!
//! A subscription is identified by the ID of the `subscribe_events` command
//! that created it; the server echoes that ID on every event it pushes. The
//! dispatcher fans events out to per-subscription queues, and consumers pull
//! from their queue with [`Subscription::recv`] or as a [`Stream`].

use crate::correlator::Generation;
use crate::session::Shared;
use crate::{SessionError, SessionResult};
use futures_util::Stream;
use hass_ws_protocol::MessageId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::task::{ready, Context, Poll};
use tokio::sync::mpsc;
use tracing::debug;

/// What cancelling a subscription does on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnsubscribePolicy {
    /// Send `unsubscribe_events` and return immediately; the reply is dropped
    /// as a stray.
    #[default]
    FireAndForget,
    /// Send `unsubscribe_events` and wait for the server to confirm.
    AwaitConfirmation,
}

/// Item placed on a subscription queue by the dispatcher.
pub(crate) enum Delivery {
    Event(Value),
    Disconnected,
}

/// Result of handing an event to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeliveryOutcome {
    Delivered,
    Cancelled,
    Unknown,
}

const LIVE: u8 = 0;
const CANCELLED: u8 = 1;
const ENDED: u8 = 2;

/// Subscription status. A subscription leaves the live state once, either
/// through its consumer cancelling it or through its connection closing.
pub(crate) struct Liveness(AtomicU8);

impl Liveness {
    fn new() -> Self {
        Self(AtomicU8::new(LIVE))
    }

    fn is_live(&self) -> bool {
        self.0.load(Ordering::Acquire) == LIVE
    }

    fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire) == CANCELLED
    }

    /// Move from live to cancelled. False if it already left the live state.
    fn cancel(&self) -> bool {
        self.leave(CANCELLED)
    }

    fn end(&self) -> bool {
        self.leave(ENDED)
    }

    fn leave(&self, next: u8) -> bool {
        self.0
            .compare_exchange(LIVE, next, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

struct Slot {
    sender: mpsc::UnboundedSender<Delivery>,
    liveness: Arc<Liveness>,
    generation: Generation,
}

/// The consumer's side of a freshly registered slot.
pub(crate) struct Registration {
    pub(crate) receiver: mpsc::UnboundedReceiver<Delivery>,
    pub(crate) liveness: Arc<Liveness>,
    pub(crate) generation: Generation,
}

/// Active subscriptions of one session, keyed by subscription ID.
pub(crate) struct SubscriptionRegistry {
    inner: Mutex<RegistryInner>,
}

struct RegistryInner {
    slots: HashMap<MessageId, Slot>,
    generation: Generation,
    closed: bool,
}

impl SubscriptionRegistry {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                slots: HashMap::new(),
                generation: 0,
                closed: true,
            }),
        }
    }

    /// Accept registrations for connection `generation`.
    pub(crate) fn reopen(&self, generation: Generation) {
        let mut inner = self.inner.lock();
        inner.slots.clear();
        inner.generation = generation;
        inner.closed = false;
    }

    /// Create the queue for subscription `id`.
    pub(crate) fn register(&self, id: MessageId) -> SessionResult<Registration> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(SessionError::SessionClosed);
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        let liveness = Arc::new(Liveness::new());
        let generation = inner.generation;
        inner.slots.insert(
            id,
            Slot {
                sender,
                liveness: Arc::clone(&liveness),
                generation,
            },
        );
        Ok(Registration {
            receiver,
            liveness,
            generation,
        })
    }

    /// Enqueue an event for subscription `id`.
    pub(crate) fn deliver(&self, id: MessageId, event: Value) -> DeliveryOutcome {
        let mut inner = self.inner.lock();
        let Some(slot) = inner.slots.get(&id) else {
            return DeliveryOutcome::Unknown;
        };

        if !slot.liveness.is_live() || slot.sender.send(Delivery::Event(event)).is_err() {
            inner.slots.remove(&id);
            return DeliveryOutcome::Cancelled;
        }
        DeliveryOutcome::Delivered
    }

    /// Drop the queue for `id`, ending its consumer's sequence. A slot
    /// registered under another generation is left alone.
    pub(crate) fn remove(&self, id: MessageId, generation: Generation) -> bool {
        let mut inner = self.inner.lock();
        match inner.slots.get(&id) {
            Some(slot) if slot.generation == generation => inner.slots.remove(&id).is_some(),
            _ => false,
        }
    }

    /// Refuse new registrations and end every queue with a disconnection marker.
    pub(crate) fn close_all(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.closed = true;
        let ended = inner.slots.len();
        for (_, slot) in inner.slots.drain() {
            slot.liveness.end();
            let _ = slot.sender.send(Delivery::Disconnected);
        }
        ended
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inner.lock().slots.len()
    }
}

/// Removes a provisional slot if subscribing does not complete.
pub(crate) struct SlotGuard<'a> {
    pub(crate) registry: &'a SubscriptionRegistry,
    pub(crate) id: MessageId,
    pub(crate) generation: Generation,
    pub(crate) armed: bool,
}

impl SlotGuard<'_> {
    pub(crate) fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.registry.remove(self.id, self.generation);
        }
    }
}

/// Cloneable handle that can cancel a subscription from any task.
#[derive(Clone)]
pub struct SubscriptionHandle {
    id: MessageId,
    generation: Generation,
    liveness: Arc<Liveness>,
    session: Weak<Shared>,
}

impl SubscriptionHandle {
    /// Subscription ID (the subscribing command's request ID).
    pub fn id(&self) -> MessageId {
        self.id
    }

    /// Whether the subscription has been neither cancelled nor ended by its
    /// connection closing.
    pub fn is_live(&self) -> bool {
        self.liveness.is_live()
    }

    /// Cancel the subscription.
    ///
    /// Idempotent. No event is yielded to the consumer once this returns. If
    /// the connection the subscription was made on is still up, an
    /// `unsubscribe_events` command is sent according to the session's
    /// [`UnsubscribePolicy`]. Cancelling a subscription whose connection has
    /// gone away does nothing.
    pub async fn cancel(&self) {
        if !self.liveness.cancel() {
            return;
        }
        let Some(shared) = self.session.upgrade() else {
            return;
        };

        shared.subscriptions.remove(self.id, self.generation);
        let policy = shared.unsubscribe_policy();
        shared.unsubscribe(self.id, self.generation, policy).await;
        debug!(subscription = self.id, "Subscription cancelled");
    }
}

/// A pull-based sequence of event payloads.
///
/// Yields `Some(Ok(event))` per event in arrival order. Ends with `None`
/// after cancellation; if the session goes away first, yields one
/// `Some(Err(SessionError::SessionClosed))` before ending. Dropping a live
/// subscription cancels it.
pub struct Subscription {
    handle: SubscriptionHandle,
    receiver: mpsc::UnboundedReceiver<Delivery>,
    finished: bool,
}

impl Subscription {
    pub(crate) fn new(id: MessageId, registration: Registration, session: Weak<Shared>) -> Self {
        Self {
            handle: SubscriptionHandle {
                id,
                generation: registration.generation,
                liveness: registration.liveness,
                session,
            },
            receiver: registration.receiver,
            finished: false,
        }
    }

    /// Subscription ID (the subscribing command's request ID).
    pub fn id(&self) -> MessageId {
        self.handle.id
    }

    /// See [`SubscriptionHandle::is_live`].
    pub fn is_live(&self) -> bool {
        self.handle.is_live()
    }

    /// A handle for cancelling from another task.
    pub fn handle(&self) -> SubscriptionHandle {
        self.handle.clone()
    }

    /// Cancel the subscription. See [`SubscriptionHandle::cancel`].
    pub async fn cancel(&self) {
        self.handle.cancel().await;
    }

    /// Receive the next event, waiting until one arrives or the sequence ends.
    pub async fn recv(&mut self) -> Option<SessionResult<Value>> {
        std::future::poll_fn(|cx| self.poll_delivery(cx)).await
    }

    fn poll_delivery(&mut self, cx: &mut Context<'_>) -> Poll<Option<SessionResult<Value>>> {
        if self.finished || self.handle.liveness.is_cancelled() {
            self.finished = true;
            return Poll::Ready(None);
        }

        // An ended subscription still drains what was queued before the
        // disconnection marker.
        match ready!(self.receiver.poll_recv(cx)) {
            Some(Delivery::Event(event)) if !self.handle.liveness.is_cancelled() => {
                Poll::Ready(Some(Ok(event)))
            }
            Some(Delivery::Event(_)) | None => {
                self.finished = true;
                Poll::Ready(None)
            }
            Some(Delivery::Disconnected) => {
                self.finished = true;
                Poll::Ready(Some(Err(SessionError::SessionClosed)))
            }
        }
    }
}

impl Stream for Subscription {
    type Item = SessionResult<Value>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().poll_delivery(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if !self.handle.liveness.cancel() {
            return;
        }
        let Some(shared) = self.handle.session.upgrade() else {
            return;
        };

        let id = self.handle.id;
        let generation = self.handle.generation;
        shared.subscriptions.remove(id, generation);
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                shared
                    .unsubscribe(id, generation, UnsubscribePolicy::FireAndForget)
                    .await;
            });
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.handle.id)
            .field("live", &self.handle.is_live())
            .field("finished", &self.finished)
            .finish()
    }
}
