//! Protocol bindings: the surfaces that translate the Thing model to and
//! from a wire format.

pub mod coap;
pub mod ws;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::WotResult;
use crate::td::ThingDescription;

/// The request/response surface every protocol client offers against a
/// remote TD. Subscriptions stay protocol-specific because their stream
/// types differ.
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    /// Read a property on a remote Thing.
    async fn read_property(&self, td: &ThingDescription, name: &str) -> WotResult<Value>;

    /// Write a property on a remote Thing.
    async fn write_property(
        &self,
        td: &ThingDescription,
        name: &str,
        value: Value,
    ) -> WotResult<()>;

    /// Invoke an action on a remote Thing.
    async fn invoke_action(
        &self,
        td: &ThingDescription,
        name: &str,
        parameters: Value,
    ) -> WotResult<Value>;
}

#[async_trait]
impl ProtocolClient for ws::WsClient {
    async fn read_property(&self, td: &ThingDescription, name: &str) -> WotResult<Value> {
        ws::WsClient::read_property(self, td, name).await
    }

    async fn write_property(
        &self,
        td: &ThingDescription,
        name: &str,
        value: Value,
    ) -> WotResult<()> {
        ws::WsClient::write_property(self, td, name, value).await
    }

    async fn invoke_action(
        &self,
        td: &ThingDescription,
        name: &str,
        parameters: Value,
    ) -> WotResult<Value> {
        ws::WsClient::invoke_action(self, td, name, parameters).await
    }
}

#[async_trait]
impl ProtocolClient for coap::CoapClient {
    async fn read_property(&self, td: &ThingDescription, name: &str) -> WotResult<Value> {
        coap::CoapClient::read_property(self, td, name).await
    }

    async fn write_property(
        &self,
        td: &ThingDescription,
        name: &str,
        value: Value,
    ) -> WotResult<()> {
        coap::CoapClient::write_property(self, td, name, value).await
    }

    async fn invoke_action(
        &self,
        td: &ThingDescription,
        name: &str,
        parameters: Value,
    ) -> WotResult<Value> {
        coap::CoapClient::invoke_action(self, td, name, parameters).await
    }
}
