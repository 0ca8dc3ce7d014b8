//! Integration tests for hass-ws-client against a scripted server.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use hass_ws_client::{ClientError, HassClient, ServiceTarget};
use hass_ws_core::{
    channel_transport, ChannelListener, ChannelServer, Command, Envelope, HassError, Response,
    SessionConfig,
};
use serde_json::{json, Map, Value};
use tokio::time::timeout;

async fn connected() -> (HassClient, ChannelServer, ChannelListener) {
    let (connector, mut listener) = channel_transport();
    let (client, server) = tokio::join!(
        HassClient::connect_with(
            SessionConfig::new("memory://homeassistant", "token"),
            Arc::new(connector),
        ),
        listener.accept_authenticated("2024.1.0"),
    );
    (client.unwrap(), server.unwrap(), listener)
}

async fn next_command(server: &mut ChannelServer) -> Command {
    timeout(Duration::from_secs(1), server.recv_command())
        .await
        .expect("timed out waiting for a command")
        .expect("client closed the connection")
}

fn reply(server: &ChannelServer, id: i64, result: Value) {
    server.send_envelope(&Envelope::Result(Response::success(id, result)));
}

#[tokio::test]
async fn test_states() {
    let (client, mut server, _listener) = connected().await;

    let (states, ()) = tokio::join!(client.states(), async {
        let command = next_command(&mut server).await;
        assert_eq!(command.operation, "get_states");
        assert!(command.params.is_empty());
        reply(
            &server,
            command.id,
            json!([
                { "entity_id": "light.kitchen", "state": "on", "attributes": { "brightness": 255 } },
                { "entity_id": "sun.sun", "state": "above_horizon" }
            ]),
        );
    });

    let states = states.unwrap();
    assert_eq!(states.len(), 2);
    assert_eq!(states[0].domain(), "light");
    assert_eq!(
        states[0].attributes.extra.get("brightness"),
        Some(&json!(255))
    );
    assert_eq!(client.meta().unwrap().version, "2024.1.0");
}

#[tokio::test]
async fn test_config_rejected() {
    let (client, mut server, _listener) = connected().await;

    let (config, ()) = tokio::join!(client.config(), async {
        let command = next_command(&mut server).await;
        let error = HassError::new("unauthorized", "Unauthorized");
        server.send_envelope(&Envelope::Result(Response::failure(command.id, error)));
    });

    match config {
        Err(ClientError::Rejected(error)) => assert_eq!(error.code, "unauthorized"),
        other => panic!("expected rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn test_panels_decode_failure() {
    let (client, mut server, _listener) = connected().await;

    let (panels, ()) = tokio::join!(client.panels(), async {
        let command = next_command(&mut server).await;
        reply(&server, command.id, json!(["not", "a", "map"]));
    });

    assert!(matches!(
        panels,
        Err(ClientError::Decode { operation, .. }) if operation == "get_panels"
    ));
}

#[tokio::test]
async fn test_call_service_frame_and_success_flag() {
    let (client, mut server, _listener) = connected().await;

    let mut data = Map::new();
    data.insert("brightness".to_string(), json!(120));

    let (called, ()) = tokio::join!(
        client.call_service(
            "light",
            "turn_on",
            ServiceTarget::entities("light.kitchen"),
            data
        ),
        async {
            let command = next_command(&mut server).await;
            assert_eq!(command.operation, "call_service");
            assert_eq!(command.params.get("domain"), Some(&json!("light")));
            assert_eq!(command.params.get("service"), Some(&json!("turn_on")));
            assert_eq!(
                command.params.get("service_data"),
                Some(&json!({ "brightness": 120 }))
            );
            assert_eq!(
                command.params.get("target"),
                Some(&json!({ "entity_id": "light.kitchen" }))
            );
            reply(&server, command.id, json!({ "context": { "id": "abc" } }));
        },
    );
    assert!(called.unwrap());

    let (called, ()) = tokio::join!(
        client.call_service("light", "explode", ServiceTarget::default(), Map::new()),
        async {
            let command = next_command(&mut server).await;
            let error = HassError::new("not_found", "Service not found.");
            server.send_envelope(&Envelope::Result(Response::failure(command.id, error)));
        },
    );
    assert!(!called.unwrap());
}

#[tokio::test]
async fn test_listen_yields_events() {
    let (client, mut server, _listener) = connected().await;

    let (listener, id) = tokio::join!(client.listen(Some("state_changed")), async {
        let command = next_command(&mut server).await;
        assert_eq!(command.params.get("event_type"), Some(&json!("state_changed")));
        reply(&server, command.id, Value::Null);
        command.id
    });
    let mut listener = listener.unwrap();
    assert_eq!(listener.id(), id);
    assert!(listener.worker_id().is_none());

    server.send_envelope(&Envelope::event(
        id,
        json!({
            "event_type": "state_changed",
            "data": { "entity_id": "light.kitchen", "new_state": { "entity_id": "light.kitchen", "state": "off" } }
        }),
    ));
    server.send_envelope(&Envelope::event(id, json!({ "data": {} })));

    let event = listener.next_event().await.unwrap().unwrap();
    assert_eq!(event.event_type, "state_changed");
    assert_eq!(event.new_state().unwrap().state_str(), Some("off"));

    // Missing event_type does not decode, but the stream keeps going
    assert!(matches!(
        listener.next().await,
        Some(Err(ClientError::Decode { .. }))
    ));

    listener.cancel().await;
    assert!(listener.next_event().await.is_none());
}

#[tokio::test]
async fn test_listen_isolated_uses_worker_connection() {
    let (client, _server, mut listener) = connected().await;

    let (events, mut worker_server) = tokio::join!(client.listen_isolated(None), async {
        let mut worker_server = listener.accept_authenticated("2024.1.0").await.unwrap();
        let command = next_command(&mut worker_server).await;
        assert_eq!(command.operation, "subscribe_events");
        assert_eq!(command.id, 1);
        reply(&worker_server, command.id, Value::Null);
        worker_server
    });
    let mut events = events.unwrap();
    assert!(events.worker_id().is_some());
    assert_eq!(client.session().worker_count().await, 1);

    worker_server.send_envelope(&Envelope::event(
        events.id(),
        json!({ "event_type": "call_service", "data": { "domain": "light" } }),
    ));
    let event = events.next_event().await.unwrap().unwrap();
    assert_eq!(event.event_type, "call_service");

    client.release(events).await;
    assert_eq!(client.session().worker_count().await, 0);
    assert!(client.session().ready());

    // The worker sent its unsubscribe, then closed
    let unsubscribe = next_command(&mut worker_server).await;
    assert_eq!(unsubscribe.operation, "unsubscribe_events");
    assert!(worker_server.recv_command().await.is_none());
}

#[tokio::test]
async fn test_close_ends_listeners() {
    let (client, mut server, _listener) = connected().await;

    let (events, ()) = tokio::join!(client.listen(None), async {
        let command = next_command(&mut server).await;
        reply(&server, command.id, Value::Null);
    });
    let mut events = events.unwrap();

    client.close().await;

    assert!(matches!(
        events.next_event().await,
        Some(Err(ClientError::Session(_)))
    ));
    assert!(events.next_event().await.is_none());
    assert!(matches!(
        client.states().await,
        Err(ClientError::Session(_))
    ));
}
