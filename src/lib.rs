#![warn(missing_docs)]
//! # wot-servient
//!
//! A Web of Things servient: a process that locally hosts *Things* —
//! virtual devices exposing properties, actions and events — and makes
//! them reachable to remote peers over a JSON-RPC WebSocket protocol and a
//! CoAP binding.
//!
//! ## Overview
//!
//! The crate is built around four layers:
//! - **Thing model** — [`td`]: Things, interactions, forms and TD
//!   documents, with validated ids and slug-unique interaction names.
//! - **Change bus** — [`bus`]: per-Thing hot streams with bounded
//!   per-subscriber queues and drop-oldest overflow handling.
//! - **Runtime** — [`wot`]: [`ExposedThing`] binds behavior (action
//!   handlers, emitters) to a Thing; [`Servient`] owns the Things and the
//!   protocol servers.
//! - **Protocol bindings** — [`protocols`]: the WebSocket server/client
//!   pair and the CoAP server/client pair, linked to Things through Forms.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   JSON-RPC / WS    ┌───────────────────────────────┐
//! │  WsClient  │◄──────────────────►│  WsServer                     │
//! └────────────┘                    │   per-connection subscription │
//! ┌────────────┐   CoAP / Observe   │   tables                      │
//! │ CoapClient │◄──────────────────►│  CoapServer                   │
//! └────────────┘                    └───────────────┬───────────────┘
//!                                                   │
//!                                          ┌────────▼────────┐
//!                                          │  ExposedThing   │
//!                                          │  (model + bus)  │
//!                                          └─────────────────┘
//! ```
//!
//! Dataflow: external client → protocol server → ExposedThing operation →
//! Thing model mutation → change-bus emission → protocol server fan-out →
//! external subscribers.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use wot_servient::prelude::*;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> WotResult<()> {
//!     let servient = Servient::new();
//!     let thing = servient.add_thing(Thing::new("urn:example:lamp")?)?;
//!
//!     thing.add_property(
//!         Property::new("brightness", json!({"type": "number"}))?
//!             .writable(true)
//!             .observable(true)
//!             .with_value(json!(50)),
//!     )?;
//!
//!     thing.add_action(Action::new("double")?)?;
//!     thing.set_action_handler("double", action_handler(|params| async move {
//!         let input = params["input"].as_i64().unwrap_or(0);
//!         Ok(json!(input * 2))
//!     }))?;
//!
//!     servient.add_ws_server(WsServerConfig::new().with_port(9494));
//!     servient.start().await?;
//!
//!     // ... serve until shutdown ...
//!     servient.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod bus;
mod config;
mod error;
pub mod protocols;
pub mod td;
pub mod wot;

#[cfg(test)]
mod tests;

// Public API
pub use bus::{
    CancellationSignal, ChangeBus, Delivery, EmittedEvent, PropertyChangeEvent, PublishOutcome,
    SubscriptionId, SubscriptionIdError, TdChangeEvent, TdChangeMethod, TdChangeType, Topic,
    TopicSubscriber,
};
pub use config::{
    ConfigError, CoapServerConfig, DEFAULT_CHANNEL_CAPACITY, DEFAULT_REQUEST_TIMEOUT,
    ServientConfig, WsServerConfig,
};
pub use error::{WireErrorCode, WotError, WotResult};
pub use protocols::ProtocolClient;
pub use protocols::coap::{CoapClient, CoapServer, ResourceKind, ResourcePath};
pub use protocols::ws::{RemoteSubscription, ThingRegistry, WsClient, WsServer};
pub use td::{
    Action, Event, Form, Interaction, InteractionType, Property, Protocol, Thing,
    ThingDescription, WOT_CONTEXT_URL, slugify,
};
pub use wot::{ActionHandler, ExposedThing, Servient, action_handler};

/// Prelude for convenient imports
///
/// ```rust,ignore
/// use wot_servient::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        Action,
        ActionHandler,
        CancellationSignal,
        ChangeBus,
        CoapClient,
        CoapServer,
        CoapServerConfig,
        Delivery,
        EmittedEvent,
        Event,
        ExposedThing,
        Form,
        Interaction,
        InteractionType,
        Property,
        PropertyChangeEvent,
        Protocol,
        ProtocolClient,
        RemoteSubscription,
        Servient,
        ServientConfig,
        SubscriptionId,
        TdChangeEvent,
        TdChangeMethod,
        TdChangeType,
        Thing,
        ThingDescription,
        WOT_CONTEXT_URL,
        WireErrorCode,
        WotError,
        WotResult,
        WsClient,
        WsServer,
        WsServerConfig,
        action_handler,
        slugify,
    };
}
