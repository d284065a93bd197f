//! End-to-end tests of the CoAP binding: request/response operations and
//! Observe streaming.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use wot_servient::prelude::*;

struct CoapFixture {
    servient: Servient,
    thing: Arc<ExposedThing>,
}

async fn coap_fixture() -> CoapFixture {
    let servient = Servient::new();
    let thing = servient
        .add_thing(Thing::new("urn:example:coap-thing").expect("valid id"))
        .expect("fresh slug");

    thing
        .add_property(
            Property::new("level", json!({"type": "number"}))
                .expect("valid name")
                .writable(true)
                .observable(true)
                .with_value(json!(10)),
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
        .add_event(Event::new("alarm").expect("valid name"))
        .expect("fresh event");

    servient.add_coap_server(CoapServerConfig::new().with_port(0));
    servient.start().await.expect("server starts");

    CoapFixture { servient, thing }
}

#[tokio::test]
async fn coap_client_reads_properties() {
    let fixture = coap_fixture().await;
    let td = fixture.thing.to_description();
    let client = CoapClient::new();

    assert_eq!(
        client.read_property(&td, "level").await.expect("readable"),
        json!(10)
    );

    fixture
        .thing
        .write_property("level", json!(55))
        .expect("writable");
    assert_eq!(
        client.read_property(&td, "level").await.expect("readable"),
        json!(55)
    );

    fixture.servient.shutdown().await;
}

#[tokio::test]
async fn coap_client_writes_properties() {
    let fixture = coap_fixture().await;
    let td = fixture.thing.to_description();
    let client = CoapClient::new();

    client
        .write_property(&td, "level", json!(77))
        .await
        .expect("writable");
    assert_eq!(
        fixture.thing.read_property("level").expect("readable"),
        json!(77)
    );

    fixture.servient.shutdown().await;
}

#[tokio::test]
async fn coap_client_invokes_actions() {
    let fixture = coap_fixture().await;
    let td = fixture.thing.to_description();
    let client = CoapClient::new();

    let result = client
        .invoke_action(&td, "double", json!({"input": 8}))
        .await
        .expect("handler bound");
    assert_eq!(result, json!(16));

    fixture.servient.shutdown().await;
}

#[tokio::test]
async fn coap_client_observes_property_changes() {
    let fixture = coap_fixture().await;
    let td = fixture.thing.to_description();
    let client = CoapClient::new();

    let mut subscription = client
        .observe_property(&td, "level")
        .await
        .expect("observable");

    for value in [1, 2, 3] {
        fixture
            .thing
            .write_property("level", json!(value))
            .expect("writable");
        // Notifications are fire-and-forget UDP; pace the writes so the
        // test asserts ordering, not datagram coalescing.
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    for expected in [1, 2, 3] {
        let data = tokio::time::timeout(Duration::from_secs(2), subscription.recv())
            .await
            .expect("notification arrives")
            .expect("stream open")
            .expect("no stream error");
        assert_eq!(data["name"], json!("level"));
        assert_eq!(data["value"], json!(expected));
    }

    subscription.unsubscribe();
    fixture.servient.shutdown().await;
}

#[tokio::test]
async fn coap_client_observes_events() {
    let fixture = coap_fixture().await;
    let td = fixture.thing.to_description();
    let client = CoapClient::new();

    let mut subscription = client.observe_event(&td, "alarm").await.expect("event exists");

    fixture
        .thing
        .emit_event("alarm", json!({"severity": "high"}))
        .expect("event exists");

    let data = tokio::time::timeout(Duration::from_secs(2), subscription.recv())
        .await
        .expect("notification arrives")
        .expect("stream open")
        .expect("no stream error");
    assert_eq!(data, json!({"severity": "high"}));

    fixture.servient.shutdown().await;
}

#[tokio::test]
async fn coap_write_to_non_writable_property_rejected() {
    let fixture = coap_fixture().await;
    fixture
        .thing
        .add_property(
            Property::new("sealed", json!({"type": "number"}))
                .expect("valid name")
                .writable(false),
        )
        .expect("fresh property");

    // Added after start: advertise the resource by hand.
    let td_before = fixture.thing.to_description();
    let level_href = td_before
        .interaction
        .iter()
        .find(|i| i.name == "level")
        .and_then(|i| i.links().next().cloned())
        .expect("level has a coap form")
        .href;
    let sealed_href = level_href.replace("properties/level", "properties/sealed");
    fixture
        .thing
        .add_form(
            "sealed",
            Form::new(Protocol::Coap, sealed_href, "application/json"),
        )
        .expect("fresh form");

    let td = fixture.thing.to_description();
    let client = CoapClient::new();
    let err = client
        .write_property(&td, "sealed", json!(1))
        .await
        .expect_err("write rejected");
    assert!(matches!(err, WotError::Remote { .. }));

    fixture.servient.shutdown().await;
}
