//! The CoAP protocol server.
//!
//! Mirrors the WebSocket surface over UDP resources: one resource per
//! interaction, request/response via GET (read), PUT (write) and POST
//! (invoke), streaming via the Observe option. Observe relations are keyed
//! by `(peer, token)`; deregistration or server shutdown cancels them.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};

use coap_lite::{
    CoapRequest, MessageClass, MessageType, Packet, RequestType, ResponseType,
};
use dashmap::DashMap;
use serde_json::{Value, json};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use crate::bus::CancellationSignal;
use crate::config::CoapServerConfig;
use crate::error::{WotError, WotResult};
use crate::protocols::coap::path::{ResourceKind, ResourcePath};
use crate::protocols::ws::ThingRegistry;
use crate::td::{Form, Protocol};
use crate::wot::ExposedThing;

/// One live Observe relation.
struct ObserveRelation {
    cancel: Arc<CancellationSignal>,
    task: JoinHandle<()>,
}

type RelationKey = (SocketAddr, Vec<u8>);

/// CoAP server bound to one UDP port, serving every Thing in its registry.
pub struct CoapServer {
    config: CoapServerConfig,
    things: ThingRegistry,
    shutdown: Arc<CancellationSignal>,
    relations: Arc<DashMap<RelationKey, ObserveRelation>>,
    message_ids: Arc<AtomicU16>,
    recv_task: Mutex<Option<JoinHandle<()>>>,
    bound_addr: Mutex<Option<SocketAddr>>,
}

impl CoapServer {
    /// Create a server over a shared Thing registry.
    pub fn new(config: CoapServerConfig, things: ThingRegistry) -> Self {
        Self {
            config,
            things,
            shutdown: Arc::new(CancellationSignal::new()),
            relations: Arc::new(DashMap::new()),
            message_ids: Arc::new(AtomicU16::new(1)),
            recv_task: Mutex::new(None),
            bound_addr: Mutex::new(None),
        }
    }

    /// Bind the socket, advertise per-interaction forms on every hosted
    /// Thing and start serving. Returns the bound address.
    pub async fn start(&self) -> WotResult<SocketAddr> {
        self.config
            .validate()
            .map_err(|err| WotError::internal(err.to_string()))?;

        let socket =
            UdpSocket::bind((self.config.host.as_str(), self.config.port)).await?;
        let addr = socket.local_addr()?;
        *self.bound_addr.lock().expect("lock poisoned") = Some(addr);

        for entry in self.things.iter() {
            let thing = entry.value();
            self.advertise_forms(thing, addr);
        }

        tracing::info!(%addr, things = self.things.len(), "coap server listening");

        let socket = Arc::new(socket);
        let context = ServerContext {
            socket: Arc::clone(&socket),
            things: Arc::clone(&self.things),
            relations: Arc::clone(&self.relations),
            message_ids: Arc::clone(&self.message_ids),
        };
        let shutdown = Arc::clone(&self.shutdown);

        let task = tokio::spawn(async move {
            let mut buf = vec![0u8; 64 * 1024];
            loop {
                let received = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    received = socket.recv_from(&mut buf) => received,
                };
                let (len, peer) = match received {
                    Ok(pair) => pair,
                    Err(err) => {
                        tracing::warn!(error = %err, "recv failed");
                        continue;
                    }
                };
                let packet = match Packet::from_bytes(&buf[..len]) {
                    Ok(packet) => packet,
                    Err(err) => {
                        tracing::debug!(%peer, error = %err, "dropping undecodable datagram");
                        continue;
                    }
                };
                let context = context.clone();
                tokio::spawn(async move {
                    context.handle_packet(packet, peer).await;
                });
            }
            tracing::info!("coap server stopped");
        });
        *self.recv_task.lock().expect("lock poisoned") = Some(task);

        Ok(addr)
    }

    /// Stop serving and cancel every Observe relation.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let task = self.recv_task.lock().expect("lock poisoned").take();
        if let Some(task) = task {
            let _ = task.await;
        }
        let count = self.relations.len();
        for entry in self.relations.iter() {
            entry.value().cancel.cancel();
            entry.value().task.abort();
        }
        self.relations.clear();
        if count > 0 {
            tracing::info!(cancelled = count, "observe relations cancelled");
        }
    }

    /// Bound address, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.bound_addr.lock().expect("lock poisoned")
    }

    fn advertise_forms(&self, thing: &Arc<ExposedThing>, addr: SocketAddr) {
        let slug = thing.url_slug();
        let model = thing.thing();
        for interaction in model.interactions() {
            let kind = match interaction.interaction_type() {
                crate::td::InteractionType::Property => ResourceKind::Properties,
                crate::td::InteractionType::Action => ResourceKind::Actions,
                crate::td::InteractionType::Event => ResourceKind::Events,
            };
            let path = ResourcePath::new(slug.clone(), kind, interaction.name());
            let href = format!("coap://{}:{}/{}", self.config.host, addr.port(), path);
            let _ = thing.add_form(
                interaction.name(),
                Form::new(Protocol::Coap, href, "application/json"),
            );
        }
    }
}

/// Everything a per-datagram task needs.
#[derive(Clone)]
struct ServerContext {
    socket: Arc<UdpSocket>,
    things: ThingRegistry,
    relations: Arc<DashMap<RelationKey, ObserveRelation>>,
    message_ids: Arc<AtomicU16>,
}

impl ServerContext {
    async fn handle_packet(&self, packet: Packet, peer: SocketAddr) {
        let request = CoapRequest::from_packet(packet, peer);
        let Some(path) = ResourcePath::parse(&request.get_path()) else {
            self.respond(&request, peer, ResponseType::NotFound, Vec::new(), None)
                .await;
            return;
        };

        let Some(thing) = self
            .things
            .get(&path.slug)
            .map(|entry| Arc::clone(entry.value()))
        else {
            self.respond(&request, peer, ResponseType::NotFound, Vec::new(), None)
                .await;
            return;
        };

        tracing::debug!(%peer, path = %path, method = ?request.get_method(), "coap request");

        match (*request.get_method(), path.kind) {
            (RequestType::Get, ResourceKind::Properties) => {
                self.handle_property_get(&request, peer, &thing, &path).await;
            }
            (RequestType::Put, ResourceKind::Properties) => {
                let outcome = parse_payload(&request.message.payload)
                    .and_then(|value| thing.write_property_external(&path.name, value));
                match outcome {
                    Ok(()) => {
                        self.respond(&request, peer, ResponseType::Changed, Vec::new(), None)
                            .await;
                    }
                    Err(err) => self.respond_error(&request, peer, &err).await,
                }
            }
            (RequestType::Post, ResourceKind::Actions) => {
                let outcome = match parse_payload(&request.message.payload) {
                    Ok(parameters) => thing.invoke_action(&path.name, parameters).await,
                    Err(err) => Err(err),
                };
                match outcome.and_then(|result| encode_payload(&result)) {
                    Ok(payload) => {
                        self.respond(&request, peer, ResponseType::Content, payload, None)
                            .await;
                    }
                    Err(err) => self.respond_error(&request, peer, &err).await,
                }
            }
            (RequestType::Get, ResourceKind::Events) => {
                match observe_intent(&request) {
                    Some(ObserveIntent::Register) => {
                        self.register_event_observer(&request, peer, &thing, &path)
                            .await;
                    }
                    Some(ObserveIntent::Deregister) => {
                        self.deregister(&request, peer).await;
                    }
                    // A plain GET on an event resource has nothing to return.
                    None => {
                        self.respond(
                            &request,
                            peer,
                            ResponseType::MethodNotAllowed,
                            Vec::new(),
                            None,
                        )
                        .await;
                    }
                }
            }
            _ => {
                self.respond(
                    &request,
                    peer,
                    ResponseType::MethodNotAllowed,
                    Vec::new(),
                    None,
                )
                .await;
            }
        }
    }

    async fn handle_property_get(
        &self,
        request: &CoapRequest<SocketAddr>,
        peer: SocketAddr,
        thing: &Arc<ExposedThing>,
        path: &ResourcePath,
    ) {
        match observe_intent(request) {
            Some(ObserveIntent::Register) => {
                self.register_property_observer(request, peer, thing, path)
                    .await;
            }
            Some(ObserveIntent::Deregister) => {
                self.deregister(request, peer).await;
                // Deregistration still answers with the current value.
                self.reply_property_value(request, peer, thing, path, None)
                    .await;
            }
            None => {
                self.reply_property_value(request, peer, thing, path, None)
                    .await;
            }
        }
    }

    async fn reply_property_value(
        &self,
        request: &CoapRequest<SocketAddr>,
        peer: SocketAddr,
        thing: &Arc<ExposedThing>,
        path: &ResourcePath,
        observe_seq: Option<u32>,
    ) {
        match thing
            .read_property(&path.name)
            .and_then(|value| encode_payload(&value))
        {
            Ok(payload) => {
                self.respond(request, peer, ResponseType::Content, payload, observe_seq)
                    .await;
            }
            Err(err) => self.respond_error(request, peer, &err).await,
        }
    }

    async fn register_property_observer(
        &self,
        request: &CoapRequest<SocketAddr>,
        peer: SocketAddr,
        thing: &Arc<ExposedThing>,
        path: &ResourcePath,
    ) {
        let mut subscriber = match thing.on_property_change(&path.name) {
            Ok(subscriber) => subscriber,
            Err(err) => {
                self.respond_error(request, peer, &err).await;
                return;
            }
        };

        // Initial notification carries the current value with sequence 0;
        // the relation then streams change payloads shaped like the WS
        // emitted `data` field.
        self.reply_property_value(request, peer, thing, path, Some(0))
            .await;

        let token = request.message.get_token().to_vec();
        let cancel = Arc::new(CancellationSignal::new());
        let notifier = self.notifier(peer, token.clone());

        let task_cancel = Arc::clone(&cancel);
        let task = tokio::spawn(async move {
            let mut seq: u32 = 1;
            loop {
                let delivery = tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    delivery = subscriber.recv() => delivery,
                };
                let Some(delivery) = delivery else { break };

                let mut data = json!({
                    "name": delivery.item.name,
                    "value": delivery.item.value,
                });
                if delivery.lost_events {
                    data["lost_events"] = json!(true);
                }
                if !notifier.notify(&data, seq).await {
                    break;
                }
                seq = seq.wrapping_add(1);
            }
        });

        self.track_relation(peer, token, cancel, task);
    }

    async fn register_event_observer(
        &self,
        request: &CoapRequest<SocketAddr>,
        peer: SocketAddr,
        thing: &Arc<ExposedThing>,
        path: &ResourcePath,
    ) {
        let mut subscriber = match thing.on_event(&path.name) {
            Ok(subscriber) => subscriber,
            Err(err) => {
                self.respond_error(request, peer, &err).await;
                return;
            }
        };

        // Events have no current representation; the initial notification
        // is empty.
        self.respond(request, peer, ResponseType::Content, Vec::new(), Some(0))
            .await;

        let token = request.message.get_token().to_vec();
        let cancel = Arc::new(CancellationSignal::new());
        let notifier = self.notifier(peer, token.clone());

        let task_cancel = Arc::clone(&cancel);
        let task = tokio::spawn(async move {
            let mut seq: u32 = 1;
            loop {
                let delivery = tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    delivery = subscriber.recv() => delivery,
                };
                let Some(delivery) = delivery else { break };

                if !notifier.notify(&delivery.item.payload, seq).await {
                    break;
                }
                seq = seq.wrapping_add(1);
            }
        });

        self.track_relation(peer, token, cancel, task);
    }

    fn track_relation(
        &self,
        peer: SocketAddr,
        token: Vec<u8>,
        cancel: Arc<CancellationSignal>,
        task: JoinHandle<()>,
    ) {
        // A re-register on the same (peer, token) replaces the old relation.
        if let Some((_, old)) = self.relations.remove(&(peer, token.clone())) {
            old.cancel.cancel();
            old.task.abort();
        }
        tracing::info!(%peer, "observe relation established");
        self.relations
            .insert((peer, token), ObserveRelation { cancel, task });
    }

    async fn deregister(&self, request: &CoapRequest<SocketAddr>, peer: SocketAddr) {
        let token = request.message.get_token().to_vec();
        if let Some((_, relation)) = self.relations.remove(&(peer, token)) {
            relation.cancel.cancel();
            relation.task.abort();
            tracing::info!(%peer, "observe relation cancelled");
        }
    }

    fn notifier(&self, peer: SocketAddr, token: Vec<u8>) -> Notifier {
        Notifier {
            socket: Arc::clone(&self.socket),
            message_ids: Arc::clone(&self.message_ids),
            peer,
            token,
        }
    }

    async fn respond(
        &self,
        request: &CoapRequest<SocketAddr>,
        peer: SocketAddr,
        status: ResponseType,
        payload: Vec<u8>,
        observe_seq: Option<u32>,
    ) {
        let Some(mut response) = request.response.clone() else {
            return;
        };
        response.message.header.code = MessageClass::Response(status);
        response.message.payload = payload;
        if let Some(seq) = observe_seq {
            response.message.set_observe_value(seq);
        }

        match response.message.to_bytes() {
            Ok(bytes) => {
                if let Err(err) = self.socket.send_to(&bytes, peer).await {
                    tracing::debug!(%peer, error = %err, "response send failed");
                }
            }
            Err(err) => tracing::error!(error = %err, "response encode failed"),
        }
    }

    async fn respond_error(
        &self,
        request: &CoapRequest<SocketAddr>,
        peer: SocketAddr,
        err: &WotError,
    ) {
        let status = status_for(err);
        tracing::debug!(%peer, error = %err, status = ?status, "request failed");
        self.respond(request, peer, status, err.to_string().into_bytes(), None)
            .await;
    }
}

/// Sends Observe notifications for one relation.
struct Notifier {
    socket: Arc<UdpSocket>,
    message_ids: Arc<AtomicU16>,
    peer: SocketAddr,
    token: Vec<u8>,
}

impl Notifier {
    async fn notify(&self, payload: &Value, seq: u32) -> bool {
        let bytes = match encode_payload(payload) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::error!(error = %err, "notification encode failed");
                return true;
            }
        };

        let mut packet = Packet::new();
        packet.header.set_type(MessageType::NonConfirmable);
        packet.header.code = MessageClass::Response(ResponseType::Content);
        packet.header.message_id = self.message_ids.fetch_add(1, Ordering::Relaxed);
        packet.set_token(self.token.clone());
        packet.set_observe_value(seq);
        packet.payload = bytes;

        match packet.to_bytes() {
            Ok(bytes) => self.socket.send_to(&bytes, self.peer).await.is_ok(),
            Err(err) => {
                tracing::error!(error = %err, "notification encode failed");
                true
            }
        }
    }
}

/// What an Observe option asks for.
enum ObserveIntent {
    Register,
    Deregister,
}

fn observe_intent(request: &CoapRequest<SocketAddr>) -> Option<ObserveIntent> {
    match request.message.get_observe_value() {
        Some(Ok(0)) => Some(ObserveIntent::Register),
        Some(Ok(1)) => Some(ObserveIntent::Deregister),
        _ => None,
    }
}

fn parse_payload(payload: &[u8]) -> WotResult<Value> {
    if payload.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_slice(payload).map_err(|err| WotError::malformed(err.to_string()))
}

fn encode_payload(value: &Value) -> WotResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(WotError::from)
}

fn status_for(err: &WotError) -> ResponseType {
    match err {
        WotError::NotFound(_) => ResponseType::NotFound,
        WotError::NotWritable(_) | WotError::NotObservable(_) => ResponseType::Forbidden,
        WotError::MethodNotAllowed(_) => ResponseType::MethodNotAllowed,
        WotError::Malformed(_) => ResponseType::BadRequest,
        _ => ResponseType::InternalServerError,
    }
}
