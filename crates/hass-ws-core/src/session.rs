//! Session lifecycle.
//!
//! A [`Session`] owns one authenticated connection at a time. Callers issue
//! commands with [`Session::call`] and open event streams with
//! [`Session::subscribe`]; a single dispatcher task reads the connection and
//! routes replies and events back to them.

use crate::correlator::{Generation, PendingGuard, PendingRequests};
use crate::subscription::{SlotGuard, Subscription, SubscriptionRegistry, UnsubscribePolicy};
use crate::transport::{Connector, FrameSink, WsConnector};
use crate::{dispatcher, handshake, SessionError, SessionResult};
use futures_util::future::BoxFuture;
use hass_ws_protocol::{params_from_value, Command, MessageId, Params, Response};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Command opening an event subscription.
pub const SUBSCRIBE_EVENTS: &str = "subscribe_events";

/// Command ending an event subscription.
pub const UNSUBSCRIBE_EVENTS: &str = "unsubscribe_events";

/// Session configuration.
#[derive(Clone)]
pub struct SessionConfig {
    /// Server address, e.g. `http://homeassistant.local:8123`.
    pub server: String,
    /// Long-lived access token.
    pub access_token: String,
    /// What cancelling a subscription sends to the server.
    pub unsubscribe_policy: UnsubscribePolicy,
}

impl SessionConfig {
    /// Create a configuration with the default unsubscribe policy.
    pub fn new(server: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            access_token: access_token.into(),
            unsubscribe_policy: UnsubscribePolicy::default(),
        }
    }

    /// Set the unsubscribe policy.
    pub fn with_unsubscribe_policy(mut self, policy: UnsubscribePolicy) -> Self {
        self.unsubscribe_policy = policy;
        self
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("server", &self.server)
            .field("access_token", &"<redacted>")
            .field("unsubscribe_policy", &self.unsubscribe_policy)
            .finish()
    }
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Disconnected,
    Connecting,
    AwaitingAuthChallenge,
    Authenticating,
    Ready,
    Closing,
    Closed,
    /// Connecting or authenticating failed.
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::AwaitingAuthChallenge => "awaiting_auth_challenge",
            Self::Authenticating => "authenticating",
            Self::Ready => "ready",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Facts learned from a successful handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionMeta {
    /// Server version from `auth_ok`.
    pub version: String,
    /// Address the session connected to.
    pub server: String,
}

/// How the dispatcher should finish after being told to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Shutdown {
    /// Tear down and move the session to `Closed`.
    Close,
    /// Tear down only; the caller drives the state afterwards.
    Handoff,
}

struct ReaderTask {
    shutdown: Option<oneshot::Sender<Shutdown>>,
    handle: JoinHandle<()>,
}

/// State shared between a session, its dispatcher and its subscriptions.
pub(crate) struct Shared {
    server: String,
    unsubscribe_policy: UnsubscribePolicy,
    connector: Arc<dyn Connector>,
    access_token: RwLock<String>,
    state: watch::Sender<SessionState>,
    meta: RwLock<Option<SessionMeta>>,
    generation: AtomicU64,
    transport_open: AtomicBool,
    writer: Mutex<Option<Box<dyn FrameSink>>>,
    pub(crate) pending: PendingRequests,
    pub(crate) subscriptions: SubscriptionRegistry,
    reader: parking_lot::Mutex<Option<ReaderTask>>,
    workers: Mutex<HashMap<Uuid, Arc<Session>>>,
    lifecycle: Mutex<()>,
}

impl Shared {
    fn new(config: SessionConfig, connector: Arc<dyn Connector>) -> Self {
        let (state, _) = watch::channel(SessionState::Disconnected);
        Self {
            server: config.server,
            unsubscribe_policy: config.unsubscribe_policy,
            connector,
            access_token: RwLock::new(config.access_token),
            state,
            meta: RwLock::new(None),
            generation: AtomicU64::new(0),
            transport_open: AtomicBool::new(false),
            writer: Mutex::new(None),
            pending: PendingRequests::new(),
            subscriptions: SubscriptionRegistry::new(),
            reader: parking_lot::Mutex::new(None),
            workers: Mutex::new(HashMap::new()),
            lifecycle: Mutex::new(()),
        }
    }

    pub(crate) fn server(&self) -> &str {
        &self.server
    }

    pub(crate) fn unsubscribe_policy(&self) -> UnsubscribePolicy {
        self.unsubscribe_policy
    }

    fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    fn is_ready(&self) -> bool {
        self.state() == SessionState::Ready && self.transport_open.load(Ordering::Acquire)
    }

    pub(crate) fn set_state(&self, next: SessionState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            debug!(from = %current, to = %next, "Session state changed");
            *current = next;
            true
        });
    }

    pub(crate) fn mark_transport_closed(&self) {
        self.transport_open.store(false, Ordering::Release);
    }

    /// Open a connection, authenticate, and start the dispatcher.
    async fn establish(self: &Arc<Self>) -> SessionResult<()> {
        self.set_state(SessionState::Connecting);
        info!(server = %self.server, "Connecting to Home Assistant");

        let (mut sink, mut stream) = match self.connector.connect(&self.server).await {
            Ok(pair) => pair,
            Err(e) => {
                error!(server = %self.server, error = %e, "Connection failed");
                self.set_state(SessionState::Failed);
                return Err(SessionError::Connect(e.to_string()));
            }
        };

        self.set_state(SessionState::AwaitingAuthChallenge);
        let token = self.access_token.read().clone();
        let handshake =
            handshake::authenticate(sink.as_mut(), stream.as_mut(), &token, |state| {
                self.set_state(state)
            })
            .await;

        let version = match handshake {
            Ok(version) => version,
            Err(e) => {
                warn!(server = %self.server, error = %e, "Handshake failed");
                if let Err(close_err) = sink.close().await {
                    debug!(error = %close_err, "Closing rejected connection failed");
                }
                self.set_state(SessionState::Failed);
                return Err(e);
            }
        };

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.pending.reset(generation);
        self.subscriptions.reopen(generation);
        *self.meta.write() = Some(SessionMeta {
            version: version.clone(),
            server: self.server.clone(),
        });
        *self.writer.lock().await = Some(sink);
        self.transport_open.store(true, Ordering::Release);
        self.set_state(SessionState::Ready);
        info!(server = %self.server, version = %version, generation, "Session ready");

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(dispatcher::run(Arc::clone(self), stream, shutdown_rx));
        *self.reader.lock() = Some(ReaderTask {
            shutdown: Some(shutdown_tx),
            handle,
        });
        Ok(())
    }

    /// Write one frame, closing the session if the transport fails.
    pub(crate) async fn write(&self, frame: String) -> SessionResult<()> {
        let mut writer = self.writer.lock().await;
        let Some(sink) = writer.as_mut() else {
            return Err(SessionError::SessionClosed);
        };

        if let Err(e) = sink.send(frame).await {
            error!(error = %e, "Transport write failed");
            drop(writer);
            self.mark_transport_closed();
            self.request_shutdown(Shutdown::Close);
            return Err(SessionError::SessionClosed);
        }
        Ok(())
    }

    /// Send a command under `id` and wait for its result.
    pub(crate) async fn call_with_id(
        &self,
        id: MessageId,
        operation: &str,
        params: Params,
    ) -> SessionResult<Response> {
        let command = Command::new(id, operation, params)?;
        let (receiver, generation) = self.pending.register(id)?;
        let _guard = PendingGuard {
            pending: &self.pending,
            id,
            generation,
        };

        debug!(id, operation, "Sending command");
        self.write(command.to_json()).await?;
        receiver.await.map_err(|_| SessionError::SessionClosed)
    }

    /// Tell the server to stop sending events for `subscription`, made on
    /// connection `generation`.
    pub(crate) async fn unsubscribe(
        &self,
        subscription: MessageId,
        generation: Generation,
        policy: UnsubscribePolicy,
    ) {
        if !self.is_ready() {
            debug!(subscription, "Session not ready, skipping unsubscribe");
            return;
        }
        if self.generation.load(Ordering::Acquire) != generation {
            debug!(
                subscription,
                generation, "Subscription belongs to a previous connection, skipping unsubscribe"
            );
            return;
        }

        let mut params = Params::new();
        params.insert("subscription".to_string(), Value::from(subscription));
        let id = self.pending.allocate();

        match policy {
            UnsubscribePolicy::FireAndForget => {
                let frame = match Command::new(id, UNSUBSCRIBE_EVENTS, params) {
                    Ok(command) => command.to_json(),
                    Err(e) => {
                        warn!(subscription, error = %e, "Failed to encode unsubscribe");
                        return;
                    }
                };
                if let Err(e) = self.write(frame).await {
                    warn!(subscription, error = %e, "Failed to send unsubscribe");
                }
            }
            UnsubscribePolicy::AwaitConfirmation => {
                match self.call_with_id(id, UNSUBSCRIBE_EVENTS, params).await {
                    Ok(response) if response.is_success() => {
                        debug!(subscription, "Unsubscribe confirmed");
                    }
                    Ok(response) => {
                        warn!(subscription, error = ?response.error(), "Server refused unsubscribe");
                    }
                    Err(e) => {
                        warn!(subscription, error = %e, "Unsubscribe failed");
                    }
                }
            }
        }
    }

    /// Ask the dispatcher to stop without waiting for it.
    fn request_shutdown(&self, mode: Shutdown) {
        let mut reader = self.reader.lock();
        if let Some(tx) = reader.as_mut().and_then(|task| task.shutdown.take()) {
            let _ = tx.send(mode);
        }
    }

    /// Stop the dispatcher, wait for it, and release the connection.
    async fn shutdown_connection(&self) {
        let task = self.reader.lock().take();
        if let Some(mut task) = task {
            self.set_state(SessionState::Closing);
            if let Some(tx) = task.shutdown.take() {
                let _ = tx.send(Shutdown::Handoff);
            }
            if let Err(e) = task.handle.await {
                warn!(error = %e, "Dispatcher task ended abnormally");
            }
        }
        self.teardown().await;
    }

    /// Close the transport and end all outstanding work. Idempotent.
    pub(crate) async fn teardown(&self) {
        self.mark_transport_closed();

        let sink = self.writer.lock().await.take();
        if let Some(mut sink) = sink {
            if let Err(e) = sink.close().await {
                debug!(error = %e, "Closing transport failed");
            }
        }

        let failed_calls = self.pending.close_all();
        let ended_subscriptions = self.subscriptions.close_all();
        *self.meta.write() = None;

        if failed_calls > 0 || ended_subscriptions > 0 {
            info!(
                failed_calls,
                ended_subscriptions, "Ended outstanding work of closed connection"
            );
        }
    }
}

/// An authenticated Home Assistant WebSocket session.
pub struct Session {
    shared: Arc<Shared>,
}

impl Session {
    /// Create a session that has not connected yet.
    ///
    /// Every operation fails with [`SessionError::NotReady`] until
    /// [`Session::reauthenticate`] succeeds.
    pub fn new(config: SessionConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            shared: Arc::new(Shared::new(config, connector)),
        }
    }

    /// Connect over WebSocket and authenticate.
    pub async fn connect(config: SessionConfig) -> SessionResult<Self> {
        Self::connect_with(config, Arc::new(WsConnector)).await
    }

    /// Connect through `connector` and authenticate.
    pub async fn connect_with(
        config: SessionConfig,
        connector: Arc<dyn Connector>,
    ) -> SessionResult<Self> {
        let session = Self::new(config, connector);
        session.shared.establish().await?;
        Ok(session)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Watch lifecycle transitions.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// Whether the session is authenticated and its transport open.
    pub fn ready(&self) -> bool {
        self.shared.is_ready()
    }

    /// Handshake metadata, present while the session is connected.
    pub fn meta(&self) -> Option<SessionMeta> {
        self.shared.meta.read().clone()
    }

    /// Configured server address.
    pub fn server(&self) -> &str {
        self.shared.server()
    }

    /// Send a command and wait for its result.
    ///
    /// `params` must be a JSON object (or null for none); its keys are placed
    /// next to `id` and `type` in the command frame. No timeout is applied;
    /// dropping the returned future abandons the call.
    pub async fn call(&self, operation: &str, params: Value) -> SessionResult<Response> {
        if !self.ready() {
            return Err(SessionError::NotReady);
        }

        let params = params_from_value(params)?;
        let id = self.shared.pending.allocate();
        self.shared.call_with_id(id, operation, params).await
    }

    /// Subscribe to events, optionally of a single `event_type`.
    pub async fn subscribe(&self, event_type: Option<&str>) -> SessionResult<Subscription> {
        if !self.ready() {
            return Err(SessionError::NotReady);
        }

        let mut params = Params::new();
        if let Some(event_type) = event_type {
            params.insert("event_type".to_string(), Value::from(event_type));
        }

        let id = self.shared.pending.allocate();
        let registration = self.shared.subscriptions.register(id)?;
        let slot = SlotGuard {
            registry: &self.shared.subscriptions,
            id,
            generation: registration.generation,
            armed: true,
        };

        let response = self
            .shared
            .call_with_id(id, SUBSCRIBE_EVENTS, params)
            .await?;
        if let Err(error) = response.into_outcome() {
            warn!(subscription = id, error = %error, "Subscription rejected");
            return Err(SessionError::SubscriptionRejected(error));
        }
        slot.disarm();

        info!(subscription = id, event_type = ?event_type, "Subscribed to events");
        Ok(Subscription::new(
            id,
            registration,
            Arc::downgrade(&self.shared),
        ))
    }

    /// Drop the current connection and run the handshake again, optionally
    /// with a new access token.
    ///
    /// Outstanding calls fail with [`SessionError::SessionClosed`] and live
    /// subscriptions end. Request IDs restart at 1; handles from the previous
    /// connection never affect work on the new one.
    pub async fn reauthenticate(&self, access_token: Option<&str>) -> SessionResult<()> {
        let _lifecycle = self.shared.lifecycle.lock().await;
        if let Some(token) = access_token {
            *self.shared.access_token.write() = token.to_string();
        }

        self.shared.shutdown_connection().await;
        self.shared.establish().await
    }

    /// Close the connection and every worker session.
    pub async fn close(&self) {
        let _lifecycle = self.shared.lifecycle.lock().await;
        info!(server = %self.shared.server, "Closing session");

        self.shared.shutdown_connection().await;

        let workers: Vec<_> = self
            .shared
            .workers
            .lock()
            .await
            .drain()
            .map(|(_, worker)| worker)
            .collect();
        for worker in workers {
            close_worker(worker).await;
        }

        self.shared.set_state(SessionState::Closed);
    }

    /// Open a child session to the same server with the same credential.
    ///
    /// The worker has its own connection and dispatcher. It is closed when
    /// released or when this session closes.
    pub async fn spawn_worker(&self) -> SessionResult<Worker> {
        if !self.ready() {
            return Err(SessionError::NotReady);
        }

        let config = SessionConfig {
            server: self.shared.server.clone(),
            access_token: self.shared.access_token.read().clone(),
            unsubscribe_policy: self.shared.unsubscribe_policy,
        };
        let session = Arc::new(
            Session::connect_with(config, Arc::clone(&self.shared.connector)).await?,
        );

        let id = Uuid::new_v4();
        self.shared
            .workers
            .lock()
            .await
            .insert(id, Arc::clone(&session));
        info!(worker = %id, "Worker session opened");

        Ok(Worker { id, session })
    }

    /// Close and forget one worker. Returns false for unknown IDs.
    pub async fn release_worker(&self, id: Uuid) -> bool {
        let worker = self.shared.workers.lock().await.remove(&id);
        match worker {
            Some(worker) => {
                close_worker(worker).await;
                info!(worker = %id, "Worker session released");
                true
            }
            None => false,
        }
    }

    /// Number of open worker sessions.
    pub async fn worker_count(&self) -> usize {
        self.shared.workers.lock().await.len()
    }
}

fn close_worker(worker: Arc<Session>) -> BoxFuture<'static, ()> {
    Box::pin(async move { worker.close().await })
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shared.request_shutdown(Shutdown::Close);
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("server", &self.shared.server)
            .field("state", &self.state())
            .finish()
    }
}

/// A child session owned by its parent.
#[derive(Clone)]
pub struct Worker {
    id: Uuid,
    session: Arc<Session>,
}

impl Worker {
    /// Key of this worker in its parent.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The worker's session.
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }
}

impl Deref for Worker {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.session
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_debug_redacts_token() {
        let config = SessionConfig::new("http://ha.local:8123", "super-secret");
        let debug = format!("{config:?}");
        assert!(debug.contains("ha.local"));
        assert!(!debug.contains("super-secret"));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(
            SessionState::AwaitingAuthChallenge.to_string(),
            "awaiting_auth_challenge"
        );
        assert_eq!(SessionState::Ready.to_string(), "ready");
    }

    #[tokio::test]
    async fn test_new_session_is_not_ready() {
        let (connector, _listener) = crate::transport::channel_transport();
        let session = Session::new(
            SessionConfig::new("memory://ha", "token"),
            Arc::new(connector),
        );

        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(!session.ready());
        assert!(session.meta().is_none());
        assert!(matches!(
            session.call("get_states", Value::Null).await,
            Err(SessionError::NotReady)
        ));
        assert!(matches!(
            session.subscribe(None).await,
            Err(SessionError::NotReady)
        ));
    }
}
