//! Shared fixtures for the socket-level integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use wot_servient::prelude::*;

pub type WsConn = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A servient hosting one Thing with a writable/observable property, a
/// non-observable property, an action and an event, served over WebSocket
/// on an ephemeral port.
pub struct WsFixture {
    pub servient: Servient,
    pub thing: Arc<ExposedThing>,
    pub url: String,
    pub port: u16,
}

pub async fn ws_fixture() -> WsFixture {
    let servient = Servient::new();
    let thing = servient
        .add_thing(Thing::new("urn:example:test-thing").expect("valid id"))
        .expect("fresh slug");

    thing
        .add_property(
            Property::new("observable_prop", json!({"type": "string"}))
                .expect("valid name")
                .writable(true)
                .observable(true)
                .with_value(json!("initial")),
        )
        .expect("fresh property");
    thing
        .add_property(
            Property::new("plain_prop", json!({"type": "string"}))
                .expect("valid name")
                .writable(true)
                .observable(false)
                .with_value(json!("hidden")),
        )
        .expect("fresh property");
    thing
        .add_action(Action::new("double").expect("valid name"))
        .expect("fresh action");
    thing
        .set_action_handler(
            "double",
            action_handler(|params| async move {
                let input = params["input"].as_i64().unwrap_or(0);
                Ok(json!(input * 2))
            }),
        )
        .expect("action exists");
    thing
        .add_event(Event::new("overheated").expect("valid name"))
        .expect("fresh event");

    let server = servient.add_ws_server(WsServerConfig::new().with_port(0));
    servient.start().await.expect("server starts");
    let addr = server.local_addr().expect("bound");
    let url = format!("ws://127.0.0.1:{}/{}", addr.port(), thing.url_slug());

    WsFixture {
        servient,
        thing,
        url,
        port: addr.port(),
    }
}

pub async fn connect(url: &str) -> WsConn {
    let (ws, _) = connect_async(url).await.expect("connection accepted");
    ws
}

pub async fn send_json(ws: &mut WsConn, value: Value) {
    ws.send(Message::text(value.to_string()))
        .await
        .expect("send succeeds");
}

/// Next text frame as JSON, failing the test after two seconds.
pub async fn recv_json(ws: &mut WsConn) -> Value {
    let frame = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return text.to_string(),
                Some(Ok(_)) => continue,
                other => panic!("connection ended while waiting for a frame: {other:?}"),
            }
        }
    })
    .await
    .expect("frame arrives in time");
    serde_json::from_str(&frame).expect("frame is JSON")
}

/// Asserts that no frame arrives within the given window.
pub async fn assert_silent(ws: &mut WsConn, window: Duration) {
    let outcome = tokio::time::timeout(window, ws.next()).await;
    assert!(outcome.is_err(), "expected silence, got {outcome:?}");
}
