//! The WebSocket protocol server.
//!
//! One server hosts many Things. A client connects to
//! `ws://host:port/<thing-slug>`; connecting to an unknown path terminates
//! the handshake without an error frame. Each connection keeps its own
//! subscription table, and closing the socket disposes everything the
//! connection registered.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::{WebSocketStream, accept_hdr_async};

use crate::bus::{CancellationSignal, SubscriptionId};
use crate::config::WsServerConfig;
use crate::error::{WireErrorCode, WotError, WotResult};
use crate::protocols::ws::messages::{
    EmittedItemMessage, ErrorMessage, MessageId, RequestMessage, ResponseMessage, WsMethod,
    best_effort_id,
};
use crate::td::{Form, Protocol};
use crate::wot::ExposedThing;

/// Shared registry of exposed Things, keyed by URL slug.
pub type ThingRegistry = Arc<DashMap<String, Arc<ExposedThing>>>;

/// WebSocket server bound to one port, serving every Thing in its registry.
pub struct WsServer {
    config: WsServerConfig,
    things: ThingRegistry,
    shutdown: Arc<CancellationSignal>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    bound_addr: Mutex<Option<SocketAddr>>,
}

impl WsServer {
    /// Create a server over a shared Thing registry.
    pub fn new(config: WsServerConfig, things: ThingRegistry) -> Self {
        Self {
            config,
            things,
            shutdown: Arc::new(CancellationSignal::new()),
            accept_task: Mutex::new(None),
            bound_addr: Mutex::new(None),
        }
    }

    /// Bind the listener, advertise forms on every hosted Thing and start
    /// accepting connections. Returns the bound address.
    pub async fn start(&self) -> WotResult<SocketAddr> {
        self.config
            .validate()
            .map_err(|err| WotError::internal(err.to_string()))?;

        let listener =
            TcpListener::bind((self.config.host.as_str(), self.config.port)).await?;
        let addr = listener.local_addr()?;
        *self.bound_addr.lock().expect("lock poisoned") = Some(addr);

        for entry in self.things.iter() {
            let thing = entry.value();
            let href = self.thing_url_at(addr, &thing.url_slug());
            for name in thing.interaction_names() {
                // Duplicate forms on restart are fine to skip.
                let _ = thing.add_form(
                    &name,
                    Form::new(Protocol::Websockets, href.clone(), "application/json"),
                );
            }
        }

        tracing::info!(%addr, things = self.things.len(), "websocket server listening");

        let things = Arc::clone(&self.things);
        let shutdown = Arc::clone(&self.shutdown);
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            let things = Arc::clone(&things);
                            let shutdown = Arc::clone(&shutdown);
                            tokio::spawn(async move {
                                handle_connection(stream, peer, things, shutdown).await;
                            });
                        }
                        Err(err) => {
                            tracing::warn!(error = %err, "accept failed");
                        }
                    }
                }
            }
            tracing::info!("websocket server stopped accepting");
        });
        *self.accept_task.lock().expect("lock poisoned") = Some(task);

        Ok(addr)
    }

    /// Stop accepting and tear down every open connection (which disposes
    /// their subscriptions).
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let task = self.accept_task.lock().expect("lock poisoned").take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    /// Bound address, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.bound_addr.lock().expect("lock poisoned")
    }

    /// The URL a client uses to reach the given Thing on this server.
    pub fn thing_url(&self, thing: &ExposedThing) -> Option<String> {
        let addr = self.local_addr()?;
        Some(self.thing_url_at(addr, &thing.url_slug()))
    }

    fn thing_url_at(&self, addr: SocketAddr, slug: &str) -> String {
        format!("ws://{}:{}/{}", self.config.host, addr.port(), slug)
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    things: ThingRegistry,
    shutdown: Arc<CancellationSignal>,
) {
    let mut matched: Option<Arc<ExposedThing>> = None;
    let callback = |request: &Request, response: Response| {
        let path = request.uri().path().trim_matches('/').to_string();
        match things.get(&path) {
            Some(entry) => {
                matched = Some(Arc::clone(entry.value()));
                Ok(response)
            }
            None => {
                tracing::debug!(%peer, %path, "closing connection to unknown thing path");
                let mut rejection = ErrorResponse::new(None);
                *rejection.status_mut() = StatusCode::NOT_FOUND;
                Err(rejection)
            }
        }
    };

    let ws = match accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        // Rejected handshake or transport error; the socket just closes.
        Err(_) => return,
    };
    let Some(thing) = matched else { return };

    tracing::debug!(%peer, thing = %thing.url_slug(), "connection established");

    let (sink, stream) = ws.split();
    let (out_tx, out_rx) = mpsc::channel::<Message>(64);
    let writer = tokio::spawn(write_loop(sink, out_rx));

    let mut connection = Connection {
        thing,
        peer,
        out_tx,
        subscriptions: HashMap::new(),
    };
    connection.run(stream, shutdown).await;
    connection.teardown();
    drop(connection);

    let _ = writer.await;
}

async fn write_loop(
    mut sink: SplitSink<WebSocketStream<TcpStream>, Message>,
    mut out_rx: mpsc::Receiver<Message>,
) {
    while let Some(msg) = out_rx.recv().await {
        if sink.send(msg).await.is_err() {
            break;
        }
    }
    let _ = sink.close().await;
}

struct SubscriptionEntry {
    task: JoinHandle<()>,
}

struct Connection {
    thing: Arc<ExposedThing>,
    peer: SocketAddr,
    out_tx: mpsc::Sender<Message>,
    subscriptions: HashMap<String, SubscriptionEntry>,
}

impl Connection {
    async fn run(
        &mut self,
        mut stream: SplitStream<WebSocketStream<TcpStream>>,
        shutdown: Arc<CancellationSignal>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.handle_frame(text.as_str()).await,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(err)) => {
                        tracing::debug!(peer = %self.peer, error = %err, "read failed");
                        break;
                    }
                }
            }
        }
    }

    fn teardown(&mut self) {
        let count = self.subscriptions.len();
        for (_, entry) in self.subscriptions.drain() {
            entry.task.abort();
        }
        if count > 0 {
            tracing::info!(peer = %self.peer, disposed = count, "connection subscriptions disposed");
        }
    }

    async fn handle_frame(&mut self, raw: &str) {
        let request = match RequestMessage::from_raw(raw) {
            Ok(request) => request,
            Err(err) => {
                // Best-effort id so the client can still correlate.
                let id = best_effort_id(raw);
                self.send_error(ErrorMessage::new(
                    WireErrorCode::InternalError,
                    err.to_string(),
                    id,
                ))
                .await;
                return;
            }
        };

        let Some(method) = request.ws_method() else {
            self.send_error(ErrorMessage::new(
                WireErrorCode::MethodNotAllowed,
                format!("method not allowed: {}", request.method),
                Some(request.id),
            ))
            .await;
            return;
        };

        tracing::debug!(peer = %self.peer, method = method.as_str(), "dispatching request");

        match method {
            WsMethod::ReadProperty => self.handle_read(request).await,
            WsMethod::WriteProperty => self.handle_write(request).await,
            WsMethod::InvokeAction => self.handle_invoke(request),
            WsMethod::OnPropertyChange => self.handle_observe_property(request).await,
            WsMethod::OnEvent => self.handle_observe_event(request).await,
            WsMethod::OnTdChange => self.handle_observe_td(request).await,
            WsMethod::Dispose => self.handle_dispose(request).await,
        }
    }

    async fn handle_read(&mut self, request: RequestMessage) {
        let outcome = param_str(&request.params, "name")
            .and_then(|name| self.thing.read_property(&name));
        self.reply(request.id, outcome).await;
    }

    async fn handle_write(&mut self, request: RequestMessage) {
        let outcome = param_str(&request.params, "name").and_then(|name| {
            let value = request.params.get("value").cloned().unwrap_or(Value::Null);
            self.thing.write_property_external(&name, value)?;
            Ok(Value::Null)
        });
        self.reply(request.id, outcome).await;
    }

    /// Invocations run on their own task so a slow handler never blocks the
    /// connection's read loop; the response is correlated by id.
    fn handle_invoke(&mut self, request: RequestMessage) {
        let thing = Arc::clone(&self.thing);
        let out_tx = self.out_tx.clone();
        let id = request.id;
        let params = request.params;

        tokio::spawn(async move {
            let outcome = match param_str(&params, "name") {
                Ok(name) => {
                    let parameters = params.get("parameters").cloned().unwrap_or(Value::Null);
                    thing.invoke_action(&name, parameters).await
                }
                Err(err) => Err(err),
            };

            let frame = match outcome {
                Ok(result) => ResponseMessage::new(result, id).to_json(),
                Err(err) => {
                    ErrorMessage::new(err.wire_code(), err.to_string(), Some(id)).to_json()
                }
            };
            if let Ok(json) = frame {
                let _ = out_tx.send(Message::text(json)).await;
            }
        });
    }

    async fn handle_observe_property(&mut self, request: RequestMessage) {
        let name = match param_str(&request.params, "name") {
            Ok(name) => name,
            Err(err) => return self.reply(request.id, Err::<Value, _>(err)).await,
        };

        let sid = SubscriptionId::new().to_string();
        // The observer attaches before the Response is queued, and the
        // forwarding task starts after it, so the Response frame always
        // precedes the first emitted item and nothing is missed in between.
        match self.thing.on_property_change(&name) {
            Ok(mut subscriber) => {
                self.send_response(ResponseMessage::new(json!(sid), request.id))
                    .await;
                let out_tx = self.out_tx.clone();
                let task_sid = sid.clone();
                let task = tokio::spawn(async move {
                    while let Some(delivery) = subscriber.recv().await {
                        let name = delivery.item.name.clone();
                        let mut data = json!({
                            "name": delivery.item.name,
                            "value": delivery.item.value,
                        });
                        if delivery.lost_events {
                            data["lost_events"] = json!(true);
                        }
                        let frame = EmittedItemMessage::new(task_sid.clone(), name, data);
                        if !send_emitted(&out_tx, frame).await {
                            break;
                        }
                    }
                });
                self.subscriptions.insert(sid, SubscriptionEntry { task });
            }
            Err(err) => self.subscribe_failed(sid, request.id, err).await,
        }
    }

    async fn handle_observe_event(&mut self, request: RequestMessage) {
        let name = match param_str(&request.params, "name") {
            Ok(name) => name,
            Err(err) => return self.reply(request.id, Err::<Value, _>(err)).await,
        };

        let sid = SubscriptionId::new().to_string();
        match self.thing.on_event(&name) {
            Ok(mut subscriber) => {
                self.send_response(ResponseMessage::new(json!(sid), request.id))
                    .await;
                let out_tx = self.out_tx.clone();
                let task_sid = sid.clone();
                let task = tokio::spawn(async move {
                    while let Some(delivery) = subscriber.recv().await {
                        let frame = EmittedItemMessage::new(
                            task_sid.clone(),
                            delivery.item.name,
                            delivery.item.payload,
                        );
                        if !send_emitted(&out_tx, frame).await {
                            break;
                        }
                    }
                });
                self.subscriptions.insert(sid, SubscriptionEntry { task });
            }
            Err(err) => self.subscribe_failed(sid, request.id, err).await,
        }
    }

    async fn handle_observe_td(&mut self, request: RequestMessage) {
        let sid = SubscriptionId::new().to_string();
        let mut subscriber = self.thing.on_td_change();

        self.send_response(ResponseMessage::new(json!(sid), request.id))
            .await;

        let out_tx = self.out_tx.clone();
        let task_sid = sid.clone();
        let task = tokio::spawn(async move {
            while let Some(delivery) = subscriber.recv().await {
                let name = delivery.item.name.clone();
                let mut data = match serde_json::to_value(&delivery.item) {
                    Ok(data) => data,
                    Err(_) => continue,
                };
                if delivery.lost_events {
                    data["lost_events"] = json!(true);
                }
                let frame = EmittedItemMessage::new(task_sid.clone(), name, data);
                if !send_emitted(&out_tx, frame).await {
                    break;
                }
            }
        });
        self.subscriptions.insert(sid, SubscriptionEntry { task });
    }

    async fn handle_dispose(&mut self, request: RequestMessage) {
        let sid = request
            .params
            .get("subscription")
            .and_then(Value::as_str)
            .map(str::to_string);

        let result = match sid.and_then(|s| self.subscriptions.remove(&s).map(|e| (s, e))) {
            Some((sid, entry)) => {
                entry.task.abort();
                tracing::info!(peer = %self.peer, subscription = %sid, "subscription disposed");
                json!(sid)
            }
            // Unknown or already disposed: idempotent null result.
            None => Value::Null,
        };

        self.send_response(ResponseMessage::new(result, request.id))
            .await;
    }

    /// Subscribe failures surface on the stream: the Response with the
    /// subscription id goes out first, then one Error frame addressed to
    /// that subscription.
    async fn subscribe_failed(&mut self, sid: String, id: MessageId, err: WotError) {
        self.send_response(ResponseMessage::new(json!(sid), id)).await;
        self.send_error(
            ErrorMessage::new(WireErrorCode::SubscriptionError, err.to_string(), None)
                .with_data(json!({ "subscription": sid })),
        )
        .await;
    }

    async fn reply(&mut self, id: MessageId, outcome: WotResult<Value>) {
        match outcome {
            Ok(result) => self.send_response(ResponseMessage::new(result, id)).await,
            Err(err) => {
                self.send_error(ErrorMessage::new(err.wire_code(), err.to_string(), Some(id)))
                    .await
            }
        }
    }

    async fn send_response(&mut self, response: ResponseMessage) {
        match response.to_json() {
            Ok(json) => {
                let _ = self.out_tx.send(Message::text(json)).await;
            }
            Err(err) => tracing::error!(error = %err, "response encode failed"),
        }
    }

    async fn send_error(&mut self, error: ErrorMessage) {
        match error.to_json() {
            Ok(json) => {
                let _ = self.out_tx.send(Message::text(json)).await;
            }
            Err(err) => tracing::error!(error = %err, "error frame encode failed"),
        }
    }
}

async fn send_emitted(out_tx: &mpsc::Sender<Message>, frame: EmittedItemMessage) -> bool {
    match frame.to_json() {
        Ok(json) => out_tx.send(Message::text(json)).await.is_ok(),
        Err(err) => {
            tracing::error!(error = %err, "emitted frame encode failed");
            true
        }
    }
}

fn param_str(params: &Value, key: &str) -> WotResult<String> {
    params
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| WotError::malformed(format!("missing string param: {key}")))
}
