//! The WebSocket protocol client.
//!
//! The client works against a remote TD: it picks a usable form for the
//! target interaction (preferring `wss` over `ws`), opens a socket per
//! operation, correlates frames by message id and demultiplexes emitted
//! items into subscription streams.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::bus::CancellationSignal;
use crate::config::DEFAULT_REQUEST_TIMEOUT;
use crate::error::{WotError, WotResult};
use crate::protocols::ws::messages::{
    IncomingMessage, MessageId, RequestMessage, WsMethod, decode_incoming,
};
use crate::td::{InteractionDescription, ThingDescription};

/// A live remote subscription. Dropping it (or calling
/// [`RemoteSubscription::unsubscribe`]) closes the underlying socket.
pub struct RemoteSubscription<T> {
    receiver: mpsc::Receiver<WotResult<T>>,
    cancel: Arc<CancellationSignal>,
    task: JoinHandle<()>,
}

impl<T> RemoteSubscription<T> {
    pub(crate) fn from_parts(
        receiver: mpsc::Receiver<WotResult<T>>,
        cancel: Arc<CancellationSignal>,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            receiver,
            cancel,
            task,
        }
    }

    /// Next delivery from the remote stream. An `Err` item is terminal.
    /// Returns `None` once the stream has ended.
    pub async fn recv(&mut self) -> Option<WotResult<T>> {
        self.receiver.recv().await
    }

    /// Tear the subscription down by closing the socket.
    pub fn unsubscribe(&self) {
        self.cancel.cancel();
    }
}

impl<T> Drop for RemoteSubscription<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

/// WebSocket client for remote Things.
#[derive(Debug, Clone)]
pub struct WsClient {
    timeout: Duration,
}

impl Default for WsClient {
    fn default() -> Self {
        Self::new()
    }
}

impl WsClient {
    /// Create a client with the default request timeout.
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Override the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Read a property on a remote Thing.
    pub async fn read_property(&self, td: &ThingDescription, name: &str) -> WotResult<Value> {
        let url = pick_form_url(td, name)?;
        let request = RequestMessage::new(
            WsMethod::ReadProperty,
            json!({ "name": name }),
            fresh_id(),
        );
        self.round_trip(&url, request).await
    }

    /// Write a property on a remote Thing.
    pub async fn write_property(
        &self,
        td: &ThingDescription,
        name: &str,
        value: Value,
    ) -> WotResult<()> {
        let url = pick_form_url(td, name)?;
        let request = RequestMessage::new(
            WsMethod::WriteProperty,
            json!({ "name": name, "value": value }),
            fresh_id(),
        );
        self.round_trip(&url, request).await?;
        Ok(())
    }

    /// Invoke an action on a remote Thing.
    pub async fn invoke_action(
        &self,
        td: &ThingDescription,
        name: &str,
        parameters: Value,
    ) -> WotResult<Value> {
        let url = pick_form_url(td, name)?;
        let request = RequestMessage::new(
            WsMethod::InvokeAction,
            json!({ "name": name, "parameters": parameters }),
            fresh_id(),
        );
        self.round_trip(&url, request).await
    }

    /// Subscribe to property changes on a remote Thing. Emitted `data`
    /// objects are delivered as-is (`{"name": ..., "value": ...}`).
    pub async fn on_property_change(
        &self,
        td: &ThingDescription,
        name: &str,
    ) -> WotResult<RemoteSubscription<Value>> {
        let url = pick_form_url(td, name)?;
        let request = RequestMessage::new(
            WsMethod::OnPropertyChange,
            json!({ "name": name }),
            fresh_id(),
        );
        self.subscribe(&url, request).await
    }

    /// Subscribe to event emissions on a remote Thing. Emitted `data`
    /// payloads are delivered as-is.
    pub async fn on_event(
        &self,
        td: &ThingDescription,
        name: &str,
    ) -> WotResult<RemoteSubscription<Value>> {
        let url = pick_form_url(td, name)?;
        let request =
            RequestMessage::new(WsMethod::OnEvent, json!({ "name": name }), fresh_id());
        self.subscribe(&url, request).await
    }

    /// Subscribe to TD changes on a remote Thing. Connects to the Thing's
    /// `base` with the scheme forced to `ws`.
    pub async fn on_td_change(
        &self,
        td: &ThingDescription,
    ) -> WotResult<RemoteSubscription<Value>> {
        let url = td_change_url(td)?;
        let request = RequestMessage::new(WsMethod::OnTdChange, json!({}), fresh_id());
        self.subscribe(&url, request).await
    }

    /// One request, one correlated response, socket closed.
    async fn round_trip(&self, url: &str, request: RequestMessage) -> WotResult<Value> {
        let wait = self.request_response(url, request);
        match tokio::time::timeout(self.timeout, wait).await {
            Ok(outcome) => outcome,
            // The socket is dropped with the future on expiry.
            Err(_) => Err(WotError::Timeout),
        }
    }

    async fn request_response(&self, url: &str, request: RequestMessage) -> WotResult<Value> {
        let (mut ws, _) = connect_async(url)
            .await
            .map_err(|err| WotError::internal(format!("connect failed: {err}")))?;

        ws.send(Message::text(request.to_json()?))
            .await
            .map_err(|_| WotError::ConnectionClosed)?;

        let expected = request.id;
        loop {
            let frame = match ws.next().await {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Close(_))) | None => return Err(WotError::ConnectionClosed),
                Some(Ok(_)) => continue,
                Some(Err(_)) => return Err(WotError::ConnectionClosed),
            };

            // Frames for other ids (multiplexed subscriptions, stray
            // emissions) are ignored while waiting.
            match decode_incoming(frame.as_str()) {
                Ok(IncomingMessage::Response(response)) if response.id == expected => {
                    let _ = ws.close(None).await;
                    return Ok(response.result);
                }
                Ok(IncomingMessage::Error(error)) if error.id.as_ref() == Some(&expected) => {
                    let _ = ws.close(None).await;
                    return Err(WotError::Remote {
                        code: error.error.code,
                        message: error.error.message,
                    });
                }
                Ok(_) | Err(_) => continue,
            }
        }
    }

    /// Open a socket, await the subscription id, then stream emissions
    /// matching it until an addressed error or teardown.
    async fn subscribe(
        &self,
        url: &str,
        request: RequestMessage,
    ) -> WotResult<RemoteSubscription<Value>> {
        let (mut ws, _) = connect_async(url)
            .await
            .map_err(|err| WotError::internal(format!("connect failed: {err}")))?;

        ws.send(Message::text(request.to_json()?))
            .await
            .map_err(|_| WotError::ConnectionClosed)?;

        let expected = request.id.clone();
        let sid = tokio::time::timeout(self.timeout, async {
            loop {
                let frame = match ws.next().await {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => return Err(WotError::ConnectionClosed),
                    Some(Ok(_)) => continue,
                    Some(Err(_)) => return Err(WotError::ConnectionClosed),
                };
                match decode_incoming(frame.as_str()) {
                    Ok(IncomingMessage::Response(response)) if response.id == expected => {
                        return response
                            .result
                            .as_str()
                            .map(str::to_string)
                            .ok_or_else(|| {
                                WotError::subscription("subscription id is not a string")
                            });
                    }
                    Ok(IncomingMessage::Error(error))
                        if error.id.as_ref() == Some(&expected) =>
                    {
                        return Err(WotError::Remote {
                            code: error.error.code,
                            message: error.error.message,
                        });
                    }
                    Ok(_) | Err(_) => continue,
                }
            }
        })
        .await
        .map_err(|_| WotError::Timeout)??;

        tracing::debug!(subscription = %sid, "remote subscription established");

        let cancel = Arc::new(CancellationSignal::new());
        let (tx, rx) = mpsc::channel(64);

        let task_cancel = Arc::clone(&cancel);
        let task = tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    frame = ws.next() => frame,
                };

                let text = match frame {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => {
                        let _ = tx.send(Err(WotError::ConnectionClosed)).await;
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(_)) => {
                        let _ = tx.send(Err(WotError::ConnectionClosed)).await;
                        break;
                    }
                };

                match decode_incoming(text.as_str()) {
                    Ok(IncomingMessage::Emitted(item)) if item.subscription == sid => {
                        if tx.send(Ok(item.data)).await.is_err() {
                            break;
                        }
                    }
                    Ok(IncomingMessage::Error(error))
                        if error.subscription() == Some(sid.as_str()) =>
                    {
                        let _ = tx
                            .send(Err(WotError::Remote {
                                code: error.error.code,
                                message: error.error.message,
                            }))
                            .await;
                        break;
                    }
                    // Unrelated frames are ignored.
                    Ok(_) | Err(_) => continue,
                }
            }
            // Unsubscribe closes the socket.
            let _ = ws.close(None).await;
        });

        Ok(RemoteSubscription {
            receiver: rx,
            cancel,
            task,
        })
    }
}

fn fresh_id() -> MessageId {
    MessageId::Text(Uuid::new_v4().simple().to_string())
}

/// The socket URL for Thing-wide streams: the TD `base` with the scheme
/// forced to `ws`.
fn td_change_url(td: &ThingDescription) -> WotResult<String> {
    let base = td
        .base
        .as_deref()
        .ok_or_else(|| WotError::NoForm("undefined base IRI".to_string()))?;

    let mut url = url::Url::parse(base)
        .map_err(|err| WotError::NoForm(format!("invalid base IRI {base}: {err}")))?;
    url.set_scheme("ws")
        .map_err(|_| WotError::NoForm(format!("cannot derive ws URL from {base}")))?;

    Ok(url.to_string())
}

/// Picks the form used to reach the named interaction: `wss` preferred,
/// then `ws`; no usable form is a *no-form* error.
fn pick_form_url(td: &ThingDescription, name: &str) -> WotResult<String> {
    let interaction = td
        .interaction
        .iter()
        .find(|i| i.name == name)
        .ok_or_else(|| WotError::not_found(name))?;

    pick_form_url_for(td, interaction).ok_or_else(|| WotError::NoForm(name.to_string()))
}

fn pick_form_url_for(td: &ThingDescription, interaction: &InteractionDescription) -> Option<String> {
    let resolved: Vec<url::Url> = interaction
        .links()
        .filter_map(|link| {
            if let Ok(url) = url::Url::parse(&link.href) {
                return Some(url);
            }
            let base = td.base.as_deref()?;
            url::Url::parse(base).ok()?.join(&link.href).ok()
        })
        .collect();

    resolved
        .iter()
        .find(|url| url.scheme() == "wss")
        .or_else(|| resolved.iter().find(|url| url.scheme() == "ws"))
        .map(|url| url.to_string())
}
