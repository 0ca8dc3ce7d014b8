//! Typed accessors over a session.

use crate::models::{HassConfig, HassEntity, HassEvent, HassPanel, HassService, ServiceTarget};
use crate::{ClientError, ClientResult};
use futures_util::Stream;
use hass_ws_core::transport::Connector;
use hass_ws_core::{
    Session, SessionConfig, SessionError, SessionMeta, Subscription, SubscriptionHandle, Worker,
};
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const GET_STATES: &str = "get_states";
pub const GET_CONFIG: &str = "get_config";
pub const GET_SERVICES: &str = "get_services";
pub const GET_PANELS: &str = "get_panels";
pub const CALL_SERVICE: &str = "call_service";

/// Home Assistant client.
pub struct HassClient {
    session: Session,
}

impl HassClient {
    /// Connect over WebSocket and authenticate.
    pub async fn connect(config: SessionConfig) -> ClientResult<Self> {
        Ok(Self::from_session(Session::connect(config).await?))
    }

    /// Connect through a custom transport.
    pub async fn connect_with(
        config: SessionConfig,
        connector: Arc<dyn Connector>,
    ) -> ClientResult<Self> {
        Ok(Self::from_session(
            Session::connect_with(config, connector).await?,
        ))
    }

    /// Wrap an existing session.
    pub fn from_session(session: Session) -> Self {
        Self { session }
    }

    /// The underlying session, for commands without a typed accessor.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Server version and address.
    pub fn meta(&self) -> Option<SessionMeta> {
        self.session.meta()
    }

    /// All entity states.
    pub async fn states(&self) -> ClientResult<Vec<HassEntity>> {
        self.fetch(GET_STATES, Value::Null).await
    }

    /// Core configuration.
    pub async fn config(&self) -> ClientResult<HassConfig> {
        self.fetch(GET_CONFIG, Value::Null).await
    }

    /// Service descriptions keyed by domain, then service name.
    pub async fn services(&self) -> ClientResult<HashMap<String, HashMap<String, HassService>>> {
        self.fetch(GET_SERVICES, Value::Null).await
    }

    /// Registered frontend panels keyed by URL path.
    pub async fn panels(&self) -> ClientResult<HashMap<String, HassPanel>> {
        self.fetch(GET_PANELS, Value::Null).await
    }

    /// Call a service. Returns whether the server reported success.
    pub async fn call_service(
        &self,
        domain: &str,
        service: &str,
        target: ServiceTarget,
        data: Map<String, Value>,
    ) -> ClientResult<bool> {
        let params = json!({
            "domain": domain,
            "service": service,
            "service_data": data,
            "target": target,
        });

        let response = self.session.call(CALL_SERVICE, params).await?;
        if let Some(error) = response.error() {
            warn!(domain, service, error = %error, "Service call failed");
        } else {
            debug!(domain, service, "Service called");
        }
        Ok(response.is_success())
    }

    /// Listen for events, optionally of a single type, on this session.
    pub async fn listen(&self, event_type: Option<&str>) -> ClientResult<EventListener> {
        let subscription = self.session.subscribe(event_type).await?;
        Ok(EventListener {
            subscription,
            worker: None,
        })
    }

    /// Listen for events on a dedicated worker session.
    ///
    /// The worker has its own connection, so a busy event stream does not
    /// delay replies to calls made on this client. Release it with
    /// [`HassClient::release`].
    pub async fn listen_isolated(&self, event_type: Option<&str>) -> ClientResult<EventListener> {
        let worker = self.session.spawn_worker().await?;
        let subscription = match worker.subscribe(event_type).await {
            Ok(subscription) => subscription,
            Err(e) => {
                self.session.release_worker(worker.id()).await;
                return Err(e.into());
            }
        };

        info!(worker = %worker.id(), event_type = ?event_type, "Listening on worker session");
        Ok(EventListener {
            subscription,
            worker: Some(worker),
        })
    }

    /// Stop a listener and close its worker session, if it has one.
    pub async fn release(&self, listener: EventListener) {
        listener.cancel().await;
        if let Some(worker) = listener.worker_id() {
            self.session.release_worker(worker).await;
        }
    }

    /// Close the session and all worker sessions.
    pub async fn close(&self) {
        self.session.close().await;
    }

    async fn fetch<T: DeserializeOwned>(&self, operation: &str, params: Value) -> ClientResult<T> {
        let response = self.session.call(operation, params).await?;
        match response.parse::<T>() {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => Err(ClientError::Rejected(error)),
            Err(e) => Err(ClientError::Decode {
                operation: operation.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

/// A stream of decoded events.
pub struct EventListener {
    subscription: Subscription,
    worker: Option<Worker>,
}

impl EventListener {
    /// Subscription ID on the server.
    pub fn id(&self) -> i64 {
        self.subscription.id()
    }

    /// ID of the worker session carrying this listener, if isolated.
    pub fn worker_id(&self) -> Option<Uuid> {
        self.worker.as_ref().map(Worker::id)
    }

    /// A handle for stopping the listener from another task.
    pub fn handle(&self) -> SubscriptionHandle {
        self.subscription.handle()
    }

    /// Next event; `None` once the listener is cancelled or its session ends.
    pub async fn next_event(&mut self) -> Option<ClientResult<HassEvent>> {
        self.subscription.recv().await.map(decode_event)
    }

    /// Stop receiving events.
    pub async fn cancel(&self) {
        self.subscription.cancel().await;
    }
}

fn decode_event(item: Result<Value, SessionError>) -> ClientResult<HassEvent> {
    let event = item?;
    serde_json::from_value(event).map_err(|e| ClientError::Decode {
        operation: "event".to_string(),
        reason: e.to_string(),
    })
}

impl Stream for EventListener {
    type Item = ClientResult<HassEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.subscription)
            .poll_next(cx)
            .map(|item| item.map(decode_event))
    }
}
