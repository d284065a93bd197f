//! The JSON-RPC message codec for the WebSocket binding.
//!
//! Four message kinds travel on a socket. Request, Response and Error share
//! the JSON-RPC 2.0 envelope; Emitted items are out-of-band frames
//! correlated by subscription id instead of request id:
//!
//! ```text
//! Request:  {"jsonrpc":"2.0","method":<str>,"params":<obj>,"id":<str|num>}
//! Response: {"jsonrpc":"2.0","result":<any>,"id":<str|num>}
//! Error:    {"jsonrpc":"2.0","error":{"code":<int>,"message":<str>},"id":<str|num|null>,"data":<obj?>}
//! Emitted:  {"subscription":<str>,"name":<str>,"data":<any>}
//! ```
//!
//! Frames are validated at both encode and decode; a frame that fails
//! validation surfaces as [`WotError::Malformed`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{WireErrorCode, WotError, WotResult};

/// JSON-RPC version string stamped on every enveloped frame.
pub const JSON_RPC_VERSION: &str = "2.0";

/// Methods of the WebSocket protocol surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WsMethod {
    /// Read a property value
    ReadProperty,
    /// Write a property value
    WriteProperty,
    /// Invoke an action
    InvokeAction,
    /// Subscribe to property changes
    OnPropertyChange,
    /// Subscribe to event emissions
    OnEvent,
    /// Subscribe to TD changes
    OnTdChange,
    /// Dispose a subscription
    Dispose,
}

impl WsMethod {
    /// Wire name of the method.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReadProperty => "read_property",
            Self::WriteProperty => "write_property",
            Self::InvokeAction => "invoke_action",
            Self::OnPropertyChange => "on_property_change",
            Self::OnEvent => "on_event",
            Self::OnTdChange => "on_td_change",
            Self::Dispose => "dispose",
        }
    }

    /// Parses a wire method name.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "read_property" => Some(Self::ReadProperty),
            "write_property" => Some(Self::WriteProperty),
            "invoke_action" => Some(Self::InvokeAction),
            "on_property_change" => Some(Self::OnPropertyChange),
            "on_event" => Some(Self::OnEvent),
            "on_td_change" => Some(Self::OnTdChange),
            "dispose" => Some(Self::Dispose),
            _ => None,
        }
    }
}

/// Opaque string-or-number message id chosen by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageId {
    /// Numeric id
    Number(i64),
    /// String id
    Text(String),
}

impl From<i64> for MessageId {
    fn from(id: i64) -> Self {
        Self::Number(id)
    }
}

impl From<&str> for MessageId {
    fn from(id: &str) -> Self {
        Self::Text(id.to_string())
    }
}

impl From<String> for MessageId {
    fn from(id: String) -> Self {
        Self::Text(id)
    }
}

/// A JSON-RPC request frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestMessage {
    /// Envelope version, always `"2.0"`.
    pub jsonrpc: String,
    /// Wire method name. Unknown names decode but are rejected at dispatch
    /// with *method-not-allowed*.
    pub method: String,
    /// Method parameters.
    pub params: Value,
    /// Client-chosen correlation id.
    pub id: MessageId,
}

impl RequestMessage {
    /// Build a request for a known method.
    pub fn new(method: WsMethod, params: Value, id: impl Into<MessageId>) -> Self {
        Self {
            jsonrpc: JSON_RPC_VERSION.to_string(),
            method: method.as_str().to_string(),
            params,
            id: id.into(),
        }
    }

    /// The parsed method, when it is part of the protocol surface.
    pub fn ws_method(&self) -> Option<WsMethod> {
        WsMethod::from_str(&self.method)
    }

    /// Serialize to a wire frame, validating the envelope.
    pub fn to_json(&self) -> WotResult<String> {
        validate_version(&self.jsonrpc)?;
        serde_json::to_string(self).map_err(WotError::from)
    }

    /// Parse and validate a wire frame.
    pub fn from_raw(raw: &str) -> WotResult<Self> {
        let msg: Self = serde_json::from_str(raw)?;
        validate_version(&msg.jsonrpc)?;
        if !msg.params.is_object() {
            return Err(WotError::malformed("request params must be an object"));
        }
        Ok(msg)
    }
}

/// A JSON-RPC response frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMessage {
    /// Envelope version, always `"2.0"`.
    pub jsonrpc: String,
    /// Operation result; `null` for void operations.
    pub result: Value,
    /// Correlation id copied from the request.
    pub id: MessageId,
}

impl ResponseMessage {
    /// Build a response.
    pub fn new(result: Value, id: MessageId) -> Self {
        Self {
            jsonrpc: JSON_RPC_VERSION.to_string(),
            result,
            id,
        }
    }

    /// Serialize to a wire frame, validating the envelope.
    pub fn to_json(&self) -> WotResult<String> {
        validate_version(&self.jsonrpc)?;
        serde_json::to_string(self).map_err(WotError::from)
    }

    /// Parse and validate a wire frame.
    pub fn from_raw(raw: &str) -> WotResult<Self> {
        let msg: Self = serde_json::from_str(raw)?;
        validate_version(&msg.jsonrpc)?;
        Ok(msg)
    }
}

/// The `error` member of an error frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable integer error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
}

/// A JSON-RPC error frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// Envelope version, always `"2.0"`.
    pub jsonrpc: String,
    /// Error code and message.
    pub error: ErrorBody,
    /// Correlation id; null when it could not be recovered from the
    /// offending frame.
    pub id: Option<MessageId>,
    /// Out-of-band payload, e.g. `{"subscription": <sid>}` for failures
    /// observed on a live stream.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorMessage {
    /// Build an error frame.
    pub fn new(code: WireErrorCode, message: impl Into<String>, id: Option<MessageId>) -> Self {
        Self {
            jsonrpc: JSON_RPC_VERSION.to_string(),
            error: ErrorBody {
                code: code.code(),
                message: message.into(),
            },
            id,
            data: None,
        }
    }

    /// Attach out-of-band data.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// The subscription id inside `data`, when present.
    pub fn subscription(&self) -> Option<&str> {
        self.data.as_ref()?.get("subscription")?.as_str()
    }

    /// Serialize to a wire frame, validating the envelope.
    pub fn to_json(&self) -> WotResult<String> {
        validate_version(&self.jsonrpc)?;
        serde_json::to_string(self).map_err(WotError::from)
    }

    /// Parse and validate a wire frame.
    pub fn from_raw(raw: &str) -> WotResult<Self> {
        let msg: Self = serde_json::from_str(raw)?;
        validate_version(&msg.jsonrpc)?;
        Ok(msg)
    }
}

/// An out-of-band emitted item, correlated by subscription id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmittedItemMessage {
    /// Subscription id assigned by the server.
    pub subscription: String,
    /// Name of the observed interaction (or the Thing, for TD changes).
    pub name: String,
    /// Observed value.
    pub data: Value,
}

impl EmittedItemMessage {
    /// Build an emitted item frame.
    pub fn new(subscription: impl Into<String>, name: impl Into<String>, data: Value) -> Self {
        Self {
            subscription: subscription.into(),
            name: name.into(),
            data,
        }
    }

    /// Serialize to a wire frame.
    pub fn to_json(&self) -> WotResult<String> {
        serde_json::to_string(self).map_err(WotError::from)
    }

    /// Parse and validate a wire frame.
    pub fn from_raw(raw: &str) -> WotResult<Self> {
        serde_json::from_str(raw).map_err(WotError::from)
    }
}

/// Any frame a peer can receive.
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingMessage {
    /// A request (server side)
    Request(RequestMessage),
    /// A response (client side)
    Response(ResponseMessage),
    /// An error (either side)
    Error(ErrorMessage),
    /// An emitted item (client side)
    Emitted(EmittedItemMessage),
}

/// Classify and validate an incoming frame.
///
/// Member presence decides the kind: `method` → Request, `error` → Error,
/// `result` → Response, `subscription` → Emitted item.
pub fn decode_incoming(raw: &str) -> WotResult<IncomingMessage> {
    let value: Value = serde_json::from_str(raw)?;
    let obj = value
        .as_object()
        .ok_or_else(|| WotError::malformed("frame is not a JSON object"))?;

    if obj.contains_key("method") {
        Ok(IncomingMessage::Request(RequestMessage::from_raw(raw)?))
    } else if obj.contains_key("error") {
        Ok(IncomingMessage::Error(ErrorMessage::from_raw(raw)?))
    } else if obj.contains_key("result") {
        Ok(IncomingMessage::Response(ResponseMessage::from_raw(raw)?))
    } else if obj.contains_key("subscription") {
        Ok(IncomingMessage::Emitted(EmittedItemMessage::from_raw(raw)?))
    } else {
        Err(WotError::malformed("frame matches no known message kind"))
    }
}

/// Best-effort id extraction from a frame that failed validation, used to
/// address the resulting error frame.
pub fn best_effort_id(raw: &str) -> Option<MessageId> {
    let value: Value = serde_json::from_str(raw).ok()?;
    match value.get("id")? {
        Value::Number(n) => n.as_i64().map(MessageId::Number),
        Value::String(s) => Some(MessageId::Text(s.clone())),
        _ => None,
    }
}

fn validate_version(version: &str) -> WotResult<()> {
    if version == JSON_RPC_VERSION {
        Ok(())
    } else {
        Err(WotError::malformed(format!(
            "unsupported jsonrpc version: {version}"
        )))
    }
}
