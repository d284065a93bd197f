//! The Servient: process-wide container of ExposedThings and protocol
//! servers.
//!
//! A Servient owns the Thing registry shared with its servers. Shutdown
//! cascades: servers stop accepting, open connections close, which
//! disposes their subscriptions, and the Things are dropped last. There is
//! no global state; tests create as many Servients as they need.

use std::sync::{Arc, Mutex};

use dashmap::DashMap;

use crate::config::{CoapServerConfig, ServientConfig, WsServerConfig};
use crate::error::{WotError, WotResult};
use crate::protocols::coap::CoapServer;
use crate::protocols::ws::{ThingRegistry, WsServer};
use crate::td::{Thing, ThingDescription};
use crate::wot::exposed::ExposedThing;

/// Container of exposed Things and the protocol servers that reach them.
pub struct Servient {
    config: ServientConfig,
    things: ThingRegistry,
    ws_servers: Mutex<Vec<Arc<WsServer>>>,
    coap_servers: Mutex<Vec<Arc<CoapServer>>>,
}

impl Default for Servient {
    fn default() -> Self {
        Self::new()
    }
}

impl Servient {
    /// Create a Servient with default configuration.
    pub fn new() -> Self {
        Self::with_config(ServientConfig::default())
    }

    /// Create a Servient with explicit configuration.
    pub fn with_config(config: ServientConfig) -> Self {
        Self {
            config,
            things: Arc::new(DashMap::new()),
            ws_servers: Mutex::new(Vec::new()),
            coap_servers: Mutex::new(Vec::new()),
        }
    }

    /// Expose a Thing built from a TD document.
    pub fn expose(&self, td: &ThingDescription) -> WotResult<Arc<ExposedThing>> {
        self.add_thing(td.to_thing()?)
    }

    /// Expose an already constructed Thing.
    pub fn add_thing(&self, thing: Thing) -> WotResult<Arc<ExposedThing>> {
        let slug = thing.url_slug();
        if self.things.contains_key(&slug) {
            return Err(WotError::DuplicateName(slug));
        }

        let exposed = ExposedThing::with_capacity(thing, self.config.channel_capacity);
        self.things.insert(slug.clone(), Arc::clone(&exposed));
        tracing::info!(%slug, "thing registered");
        Ok(exposed)
    }

    /// Remove a Thing by slug. Its streams end as the last references drop.
    pub fn remove_thing(&self, slug: &str) -> bool {
        self.things.remove(slug).is_some()
    }

    /// Look up a Thing by slug.
    pub fn thing(&self, slug: &str) -> Option<Arc<ExposedThing>> {
        self.things.get(slug).map(|entry| Arc::clone(entry.value()))
    }

    /// Slugs of every hosted Thing.
    pub fn thing_slugs(&self) -> Vec<String> {
        self.things.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Registry handle shared with protocol servers.
    pub fn registry(&self) -> ThingRegistry {
        Arc::clone(&self.things)
    }

    /// Attach a WebSocket server over this Servient's registry.
    pub fn add_ws_server(&self, config: WsServerConfig) -> Arc<WsServer> {
        let server = Arc::new(WsServer::new(config, self.registry()));
        self.ws_servers
            .lock()
            .expect("lock poisoned")
            .push(Arc::clone(&server));
        server
    }

    /// Attach a CoAP server over this Servient's registry.
    pub fn add_coap_server(&self, config: CoapServerConfig) -> Arc<CoapServer> {
        let server = Arc::new(CoapServer::new(config, self.registry()));
        self.coap_servers
            .lock()
            .expect("lock poisoned")
            .push(Arc::clone(&server));
        server
    }

    /// Start every attached server.
    pub async fn start(&self) -> WotResult<()> {
        self.config
            .validate()
            .map_err(|err| WotError::internal(err.to_string()))?;

        let ws_servers: Vec<_> = self.ws_servers.lock().expect("lock poisoned").clone();
        for server in ws_servers {
            server.start().await?;
        }

        let coap_servers: Vec<_> = self.coap_servers.lock().expect("lock poisoned").clone();
        for server in coap_servers {
            server.start().await?;
        }

        tracing::info!(things = self.things.len(), "servient started");
        Ok(())
    }

    /// Stop every server (disposing all connections and their
    /// subscriptions) and drop every Thing.
    pub async fn shutdown(&self) {
        let ws_servers: Vec<_> = {
            let mut guard = self.ws_servers.lock().expect("lock poisoned");
            guard.drain(..).collect()
        };
        for server in ws_servers {
            server.stop().await;
        }

        let coap_servers: Vec<_> = {
            let mut guard = self.coap_servers.lock().expect("lock poisoned");
            guard.drain(..).collect()
        };
        for server in coap_servers {
            server.stop().await;
        }

        let count = self.things.len();
        self.things.clear();
        tracing::info!(things = count, "servient shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::td::Property;
    use serde_json::json;

    #[tokio::test]
    async fn test_expose_and_look_up_by_slug() {
        let servient = Servient::new();
        let thing = Thing::new("urn:example:org").unwrap();
        servient.add_thing(thing).unwrap();

        assert!(servient.thing("urn-example-org").is_some());
        assert!(servient.thing("unknown").is_none());
        assert_eq!(servient.thing_slugs(), vec!["urn-example-org".to_string()]);
    }

    #[tokio::test]
    async fn test_duplicate_slug_rejected() {
        let servient = Servient::new();
        servient
            .add_thing(Thing::new("urn:example:org").unwrap())
            .unwrap();
        assert!(matches!(
            servient.add_thing(Thing::new("urn:example:org").unwrap()),
            Err(WotError::DuplicateName(_))
        ));
    }

    #[tokio::test]
    async fn test_multiple_servients_are_independent() {
        let first = Servient::new();
        let second = Servient::new();

        let exposed = first
            .add_thing(Thing::new("urn:example:org").unwrap())
            .unwrap();
        exposed
            .add_property(
                Property::new("p", json!({"type": "string"}))
                    .unwrap()
                    .with_value(json!("a")),
            )
            .unwrap();

        assert!(second.thing("urn-example-org").is_none());
    }

    #[tokio::test]
    async fn test_shutdown_clears_things() {
        let servient = Servient::new();
        servient
            .add_thing(Thing::new("urn:example:org").unwrap())
            .unwrap();
        servient.shutdown().await;
        assert!(servient.thing_slugs().is_empty());
    }
}
