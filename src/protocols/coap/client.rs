//! The CoAP protocol client.
//!
//! Request/response operations map onto GET (read), PUT (write) and POST
//! (invoke); streaming uses the Observe option. Form selection prefers
//! `coaps` over `coap` hrefs; the per-interaction resource path is taken
//! from the form itself.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use coap_lite::{CoapRequest, MessageClass, MessageType, Packet, RequestType};
use serde_json::Value;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use url::Url;
use uuid::Uuid;

use crate::bus::CancellationSignal;
use crate::config::DEFAULT_REQUEST_TIMEOUT;
use crate::error::{WotError, WotResult};
use crate::protocols::ws::RemoteSubscription;
use crate::td::{InteractionDescription, ThingDescription};

const COAP_DEFAULT_PORT: u16 = 5683;

/// CoAP client for remote Things.
#[derive(Debug)]
pub struct CoapClient {
    timeout: Duration,
    message_ids: AtomicU16,
}

impl Default for CoapClient {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for CoapClient {
    fn clone(&self) -> Self {
        Self {
            timeout: self.timeout,
            message_ids: AtomicU16::new(self.message_ids.load(Ordering::Relaxed)),
        }
    }
}

impl CoapClient {
    /// Create a client with the default request timeout.
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_REQUEST_TIMEOUT,
            message_ids: AtomicU16::new(1),
        }
    }

    /// Override the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Read a property on a remote Thing.
    pub async fn read_property(&self, td: &ThingDescription, name: &str) -> WotResult<Value> {
        let target = pick_form_target(td, name)?;
        let response = self
            .round_trip(&target, RequestType::Get, Vec::new(), None)
            .await?;
        parse_payload(&response.payload)
    }

    /// Write a property on a remote Thing.
    pub async fn write_property(
        &self,
        td: &ThingDescription,
        name: &str,
        value: Value,
    ) -> WotResult<()> {
        let target = pick_form_target(td, name)?;
        let payload = serde_json::to_vec(&value)?;
        let response = self
            .round_trip(&target, RequestType::Put, payload, None)
            .await?;
        expect_success(&response)?;
        Ok(())
    }

    /// Invoke an action on a remote Thing.
    pub async fn invoke_action(
        &self,
        td: &ThingDescription,
        name: &str,
        parameters: Value,
    ) -> WotResult<Value> {
        let target = pick_form_target(td, name)?;
        let payload = serde_json::to_vec(&parameters)?;
        let response = self
            .round_trip(&target, RequestType::Post, payload, None)
            .await?;
        expect_success(&response)?;
        parse_payload(&response.payload)
    }

    /// Observe property changes on a remote Thing. Delivered values are the
    /// notification payloads (`{"name": ..., "value": ...}`).
    pub async fn observe_property(
        &self,
        td: &ThingDescription,
        name: &str,
    ) -> WotResult<RemoteSubscription<Value>> {
        let target = pick_form_target(td, name)?;
        self.observe(target).await
    }

    /// Observe event emissions on a remote Thing. Delivered values are the
    /// emitted payloads.
    pub async fn observe_event(
        &self,
        td: &ThingDescription,
        name: &str,
    ) -> WotResult<RemoteSubscription<Value>> {
        let target = pick_form_target(td, name)?;
        self.observe(target).await
    }

    async fn round_trip(
        &self,
        target: &FormTarget,
        method: RequestType,
        payload: Vec<u8>,
        observe: Option<u32>,
    ) -> WotResult<Packet> {
        let wait = self.exchange(target, method, payload, observe);
        match tokio::time::timeout(self.timeout, wait).await {
            Ok(outcome) => outcome.map(|(packet, _)| packet),
            Err(_) => Err(WotError::Timeout),
        }
    }

    async fn exchange(
        &self,
        target: &FormTarget,
        method: RequestType,
        payload: Vec<u8>,
        observe: Option<u32>,
    ) -> WotResult<(Packet, Arc<UdpSocket>)> {
        let socket = Arc::new(UdpSocket::bind(("0.0.0.0", 0)).await?);
        let token = fresh_token();
        let message_id = self.message_ids.fetch_add(1, Ordering::Relaxed);

        let request = build_request(target, method, payload, observe, message_id, &token)?;
        socket.send_to(&request, target.addr).await?;

        let packet = recv_matching(&socket, &token).await?;
        Ok((packet, socket))
    }

    /// Register an Observe relation and stream its notifications.
    async fn observe(&self, target: FormTarget) -> WotResult<RemoteSubscription<Value>> {
        let wait = self.exchange(&target, RequestType::Get, Vec::new(), Some(0));
        let (initial, socket) = match tokio::time::timeout(self.timeout, wait).await {
            Ok(outcome) => outcome?,
            Err(_) => return Err(WotError::Timeout),
        };
        expect_success(&initial)?;

        let token = initial.get_token().to_vec();
        let cancel = Arc::new(CancellationSignal::new());
        let (tx, rx) = mpsc::channel(64);

        let task_cancel = Arc::clone(&cancel);
        let message_id = self.message_ids.fetch_add(1, Ordering::Relaxed);
        let task: JoinHandle<()> = tokio::spawn(async move {
            let mut buf = vec![0u8; 64 * 1024];
            loop {
                let received = tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    received = socket.recv_from(&mut buf) => received,
                };
                let (len, _) = match received {
                    Ok(pair) => pair,
                    Err(_) => {
                        let _ = tx.send(Err(WotError::ConnectionClosed)).await;
                        break;
                    }
                };
                let Ok(packet) = Packet::from_bytes(&buf[..len]) else {
                    continue;
                };
                if packet.get_token()[..] != token[..] {
                    continue;
                }
                match packet.header.code {
                    MessageClass::Response(status) if is_success(status) => {
                        match parse_payload(&packet.payload) {
                            Ok(value) => {
                                if tx.send(Ok(value)).await.is_err() {
                                    break;
                                }
                            }
                            Err(err) => {
                                let _ = tx.send(Err(err)).await;
                                break;
                            }
                        }
                    }
                    MessageClass::Response(status) => {
                        let _ = tx
                            .send(Err(WotError::subscription(format!(
                                "observe failed: {status:?}"
                            ))))
                            .await;
                        break;
                    }
                    _ => continue,
                }
            }

            // Teardown cancels the Observe relation.
            if let Ok(deregister) =
                build_request(&target, RequestType::Get, Vec::new(), Some(1), message_id, &token)
            {
                let _ = socket.send_to(&deregister, target.addr).await;
            }
        });

        Ok(RemoteSubscription::from_parts(rx, cancel, task))
    }
}

/// Resolved form: socket address plus resource path.
#[derive(Debug, Clone)]
struct FormTarget {
    addr: SocketAddr,
    path: String,
}

fn pick_form_target(td: &ThingDescription, name: &str) -> WotResult<FormTarget> {
    let interaction = td
        .interaction
        .iter()
        .find(|i| i.name == name)
        .ok_or_else(|| WotError::not_found(name))?;

    let url = pick_coap_url(td, interaction).ok_or_else(|| WotError::NoForm(name.to_string()))?;

    let host = url
        .host_str()
        .ok_or_else(|| WotError::NoForm(format!("form without host: {url}")))?;
    let port = url.port().unwrap_or(COAP_DEFAULT_PORT);
    let addr = format!("{host}:{port}")
        .parse()
        .map_err(|_| WotError::NoForm(format!("unresolvable form host: {host}")))?;

    Ok(FormTarget {
        addr,
        path: url.path().trim_matches('/').to_string(),
    })
}

fn pick_coap_url(td: &ThingDescription, interaction: &InteractionDescription) -> Option<Url> {
    let resolved: Vec<Url> = interaction
        .links()
        .filter_map(|link| {
            if let Ok(url) = Url::parse(&link.href) {
                return Some(url);
            }
            let base = td.base.as_deref()?;
            Url::parse(base).ok()?.join(&link.href).ok()
        })
        .collect();

    resolved
        .iter()
        .find(|url| url.scheme() == "coaps")
        .or_else(|| resolved.iter().find(|url| url.scheme() == "coap"))
        .cloned()
}

fn build_request(
    target: &FormTarget,
    method: RequestType,
    payload: Vec<u8>,
    observe: Option<u32>,
    message_id: u16,
    token: &[u8],
) -> WotResult<Vec<u8>> {
    let mut request: CoapRequest<SocketAddr> = CoapRequest::new();
    request.set_method(method);
    request.set_path(&target.path);
    request.message.header.set_type(MessageType::Confirmable);
    request.message.header.message_id = message_id;
    request.message.set_token(token.to_vec());
    request.message.payload = payload;
    if let Some(observe) = observe {
        request.message.set_observe_value(observe);
    }

    request
        .message
        .to_bytes()
        .map_err(|err| WotError::internal(format!("request encode failed: {err}")))
}

async fn recv_matching(socket: &UdpSocket, token: &[u8]) -> WotResult<Packet> {
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let (len, _) = socket.recv_from(&mut buf).await?;
        let Ok(packet) = Packet::from_bytes(&buf[..len]) else {
            continue;
        };
        if packet.get_token()[..] != token[..] {
            continue;
        }
        return Ok(packet);
    }
}

fn expect_success(packet: &Packet) -> WotResult<()> {
    match packet.header.code {
        MessageClass::Response(status) if is_success(status) => Ok(()),
        MessageClass::Response(status) => {
            let message = String::from_utf8_lossy(&packet.payload).to_string();
            Err(WotError::Remote {
                code: 0,
                message: if message.is_empty() {
                    format!("{status:?}")
                } else {
                    message
                },
            })
        }
        _ => Err(WotError::malformed("expected a response message")),
    }
}

fn is_success(status: coap_lite::ResponseType) -> bool {
    use coap_lite::ResponseType::*;
    matches!(status, Created | Deleted | Valid | Changed | Content | Continue)
}

fn fresh_token() -> Vec<u8> {
    Uuid::new_v4().as_bytes()[..8].to_vec()
}

fn parse_payload(payload: &[u8]) -> WotResult<Value> {
    if payload.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_slice(payload).map_err(|err| WotError::malformed(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::td::WOT_CONTEXT_URL;
    use serde_json::json;

    fn td_with_hrefs(hrefs: &[&str]) -> ThingDescription {
        let links: Vec<Value> = hrefs
            .iter()
            .map(|href| json!({"href": href, "mediaType": "application/json"}))
            .collect();
        let doc = json!({
            "@context": [WOT_CONTEXT_URL],
            "id": "urn:example:lamp",
            "name": "Lamp",
            "interaction": [
                {"@type": ["Property"], "name": "brightness", "link": links}
            ]
        });
        ThingDescription::from_json(&doc.to_string()).unwrap()
    }

    #[test]
    fn test_pick_form_prefers_coaps() {
        let td = td_with_hrefs(&[
            "ws://example.org/x",
            "coap://127.0.0.1:5683/t/properties/brightness",
            "coaps://127.0.0.1:5684/t/properties/brightness",
        ]);
        let interaction = &td.interaction[0];
        let url = pick_coap_url(&td, interaction).unwrap();
        assert_eq!(url.scheme(), "coaps");
    }

    #[test]
    fn test_pick_form_target_parses_addr_and_path() {
        let td = td_with_hrefs(&["coap://127.0.0.1:15683/urn-example-lamp/properties/brightness"]);
        let target = pick_form_target(&td, "brightness").unwrap();
        assert_eq!(target.addr.port(), 15683);
        assert_eq!(target.path, "urn-example-lamp/properties/brightness");
    }

    #[test]
    fn test_pick_form_target_without_coap_form_fails() {
        let td = td_with_hrefs(&["ws://example.org/x"]);
        assert!(matches!(
            pick_form_target(&td, "brightness"),
            Err(WotError::NoForm(_))
        ));
    }

    #[test]
    fn test_fresh_tokens_are_unique() {
        assert_ne!(fresh_token(), fresh_token());
        assert_eq!(fresh_token().len(), 8);
    }
}
