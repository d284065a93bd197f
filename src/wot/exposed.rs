//! ExposedThing: a locally hosted Thing with behavior bound.
//!
//! The ExposedThing is the serialization point for its Thing: all model
//! mutations and property accesses go through one lock, held only for the
//! duration of the in-memory operation and never across an await. Action
//! handlers run outside the lock.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use serde_json::Value;

use crate::bus::{
    ChangeBus, EmittedEvent, PropertyChangeEvent, TdChangeEvent, TdChangeMethod, TdChangeType,
    TopicSubscriber,
};
use crate::config::DEFAULT_CHANNEL_CAPACITY;
use crate::error::{WotError, WotResult};
use crate::td::{Form, Interaction, InteractionType, Thing, ThingDescription};

/// Type-erased asynchronous action handler: `(params) -> future<result>`.
pub type ActionHandler = Arc<
    dyn Fn(Value) -> Pin<Box<dyn Future<Output = WotResult<Value>> + Send>> + Send + Sync,
>;

/// Wraps an async closure into an [`ActionHandler`].
///
/// # Example
/// ```rust,ignore
/// thing.set_action_handler("double", action_handler(|params| async move {
///     let x = params["input"].as_i64().unwrap_or(0);
///     Ok(serde_json::json!(x * 2))
/// }))?;
/// ```
pub fn action_handler<F, Fut>(handler: F) -> ActionHandler
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = WotResult<Value>> + Send + 'static,
{
    Arc::new(move |params| Box::pin(handler(params)))
}

/// A locally hosted Thing: owns the model state, the bound action handlers
/// and the per-Thing change bus.
pub struct ExposedThing {
    thing: RwLock<Thing>,
    handlers: DashMap<String, ActionHandler>,
    bus: ChangeBus,
}

impl std::fmt::Debug for ExposedThing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExposedThing")
            .field("thing", &self.thing)
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

impl ExposedThing {
    /// Expose an existing Thing.
    pub fn new(thing: Thing) -> Arc<Self> {
        Self::with_capacity(thing, DEFAULT_CHANNEL_CAPACITY)
    }

    /// Expose an existing Thing with an explicit change-bus queue capacity.
    pub fn with_capacity(thing: Thing, capacity: usize) -> Arc<Self> {
        tracing::info!(thing_id = %thing.id(), "exposing thing");
        Arc::new(Self {
            thing: RwLock::new(thing),
            handlers: DashMap::new(),
            bus: ChangeBus::new(capacity),
        })
    }

    /// Build an ExposedThing from a TD document.
    pub fn from_description(td: &ThingDescription) -> WotResult<Arc<Self>> {
        Ok(Self::new(td.to_thing()?))
    }

    /// Describe the current state of the Thing as a TD document.
    pub fn to_description(&self) -> ThingDescription {
        ThingDescription::from_thing(&self.thing())
    }

    /// Snapshot of the underlying Thing.
    pub fn thing(&self) -> Thing {
        self.thing.read().expect("thing lock poisoned").clone()
    }

    /// Thing id.
    pub fn id(&self) -> String {
        self.thing.read().expect("thing lock poisoned").id().to_string()
    }

    /// Stable URL path segment of the Thing.
    pub fn url_slug(&self) -> String {
        self.thing.read().expect("thing lock poisoned").url_slug()
    }

    /// Replace the Thing's base IRI, used by clients to reach streams that
    /// are not tied to a single interaction (TD changes).
    pub fn set_base(&self, base: impl Into<String>) {
        self.thing
            .write()
            .expect("thing lock poisoned")
            .set_base(base);
    }

    // -------------------------------------------------------------------------
    // Properties
    // -------------------------------------------------------------------------

    /// Read the current value of a property.
    pub fn read_property(&self, name: &str) -> WotResult<Value> {
        let thing = self.thing.read().expect("thing lock poisoned");
        let interaction = thing
            .find_interaction(name)
            .ok_or_else(|| WotError::not_found(name))?;
        let property = interaction
            .as_property()
            .ok_or_else(|| WotError::not_found(name))?;
        Ok(property.value.clone())
    }

    /// Write a property from the local API path.
    ///
    /// Local writes bypass the `writable` flag; that flag is the contract
    /// for *external* callers only. Triggers a property-change emission.
    pub fn write_property(&self, name: &str, value: Value) -> WotResult<()> {
        self.write_property_inner(name, value, false)
    }

    /// Write a property on behalf of a remote caller, honoring `writable`.
    pub fn write_property_external(&self, name: &str, value: Value) -> WotResult<()> {
        self.write_property_inner(name, value, true)
    }

    fn write_property_inner(&self, name: &str, value: Value, external: bool) -> WotResult<()> {
        let canonical_name;
        {
            let mut thing = self.thing.write().expect("thing lock poisoned");
            let interaction = thing
                .find_interaction_mut(name)
                .ok_or_else(|| WotError::not_found(name))?;
            let property = interaction
                .as_property_mut()
                .ok_or_else(|| WotError::not_found(name))?;

            if external && !property.writable {
                return Err(WotError::not_writable(name));
            }

            property.value = value.clone();
            canonical_name = property.name.clone();
        }

        tracing::debug!(property = %canonical_name, external, "property written");

        // The emission carries the exact post-write value.
        self.bus.publish_property_change(PropertyChangeEvent {
            name: canonical_name,
            value,
        });

        Ok(())
    }

    /// Subscribe to changes of one property.
    ///
    /// Fails on subscribe with *not-found* for unknown names and
    /// *not-observable* for properties that do not accept subscriptions.
    pub fn on_property_change(
        &self,
        name: &str,
    ) -> WotResult<TopicSubscriber<PropertyChangeEvent>> {
        let canonical_name;
        {
            let thing = self.thing.read().expect("thing lock poisoned");
            let interaction = thing
                .find_interaction(name)
                .ok_or_else(|| WotError::not_found(name))?;
            let property = interaction
                .as_property()
                .ok_or_else(|| WotError::not_found(name))?;
            if !property.observable {
                return Err(WotError::not_observable(name));
            }
            canonical_name = property.name.clone();
        }
        Ok(self.bus.observe_property(&canonical_name))
    }

    // -------------------------------------------------------------------------
    // Actions
    // -------------------------------------------------------------------------

    /// Bind (or replace) the handler of an action.
    pub fn set_action_handler(&self, name: &str, handler: ActionHandler) -> WotResult<()> {
        let canonical_name = {
            let thing = self.thing.read().expect("thing lock poisoned");
            let interaction = thing
                .find_interaction(name)
                .ok_or_else(|| WotError::not_found(name))?;
            if interaction.interaction_type() != InteractionType::Action {
                return Err(WotError::not_found(name));
            }
            interaction.name().to_string()
        };

        tracing::debug!(action = %canonical_name, "action handler bound");
        self.handlers.insert(canonical_name, handler);
        Ok(())
    }

    /// Invoke an action and await its handler.
    ///
    /// Fails with *not-found* for unknown actions, *no-handler* when no
    /// handler is bound, and forwards the handler's own failure otherwise.
    pub async fn invoke_action(&self, name: &str, params: Value) -> WotResult<Value> {
        let handler = {
            let thing = self.thing.read().expect("thing lock poisoned");
            let interaction = thing
                .find_interaction(name)
                .ok_or_else(|| WotError::not_found(name))?;
            if interaction.interaction_type() != InteractionType::Action {
                return Err(WotError::not_found(name));
            }
            let canonical_name = interaction.name().to_string();
            self.handlers
                .get(&canonical_name)
                .map(|entry| Arc::clone(entry.value()))
                .ok_or(WotError::NoHandler(canonical_name))?
        };

        handler(params).await
    }

    // -------------------------------------------------------------------------
    // Events
    // -------------------------------------------------------------------------

    /// Emit an application event.
    pub fn emit_event(&self, name: &str, payload: Value) -> WotResult<()> {
        let canonical_name = {
            let thing = self.thing.read().expect("thing lock poisoned");
            let interaction = thing
                .find_interaction(name)
                .ok_or_else(|| WotError::not_found(name))?;
            if interaction.interaction_type() != InteractionType::Event {
                return Err(WotError::not_found(name));
            }
            interaction.name().to_string()
        };

        self.bus.publish_event(EmittedEvent {
            name: canonical_name,
            payload,
        });
        Ok(())
    }

    /// Subscribe to emissions of one event.
    pub fn on_event(&self, name: &str) -> WotResult<TopicSubscriber<EmittedEvent>> {
        let canonical_name = {
            let thing = self.thing.read().expect("thing lock poisoned");
            let interaction = thing
                .find_interaction(name)
                .ok_or_else(|| WotError::not_found(name))?;
            if interaction.interaction_type() != InteractionType::Event {
                return Err(WotError::not_found(name));
            }
            interaction.name().to_string()
        };
        Ok(self.bus.observe_event(&canonical_name))
    }

    // -------------------------------------------------------------------------
    // TD changes
    // -------------------------------------------------------------------------

    /// Subscribe to Thing Description changes.
    pub fn on_td_change(&self) -> TopicSubscriber<TdChangeEvent> {
        self.bus.observe_td_changes()
    }

    /// Add any interaction, emitting exactly one TD-change record.
    pub fn add_interaction(&self, interaction: Interaction) -> WotResult<()> {
        let name = interaction.name().to_string();
        let change_type = td_change_type(&interaction);
        let data = interaction_data(&interaction);

        self.thing
            .write()
            .expect("thing lock poisoned")
            .add_interaction(interaction)?;

        let mut event = TdChangeEvent::new(change_type, TdChangeMethod::Add, name);
        if let Some(data) = data {
            event = event.with_data(data);
        }
        self.bus.publish_td_change(event);
        Ok(())
    }

    /// Remove any interaction by name, emitting exactly one TD-change
    /// record. Live subscriptions on the removed stream end.
    pub fn remove_interaction(&self, name: &str) -> WotResult<()> {
        let removed = self
            .thing
            .write()
            .expect("thing lock poisoned")
            .remove_interaction(name)
            .ok_or_else(|| WotError::not_found(name))?;

        let canonical_name = removed.name().to_string();
        match removed.interaction_type() {
            InteractionType::Property => self.bus.remove_property_topic(&canonical_name),
            InteractionType::Event => self.bus.remove_event_topic(&canonical_name),
            InteractionType::Action => {
                self.handlers.remove(&canonical_name);
            }
        }

        self.bus.publish_td_change(TdChangeEvent::new(
            td_change_type(&removed),
            TdChangeMethod::Remove,
            canonical_name,
        ));
        Ok(())
    }

    /// Add a property interaction.
    pub fn add_property(&self, property: crate::td::Property) -> WotResult<()> {
        self.add_interaction(Interaction::Property(property))
    }

    /// Remove a property interaction by name.
    pub fn remove_property(&self, name: &str) -> WotResult<()> {
        self.remove_interaction(name)
    }

    /// Add an action interaction.
    pub fn add_action(&self, action: crate::td::Action) -> WotResult<()> {
        self.add_interaction(Interaction::Action(action))
    }

    /// Remove an action interaction by name.
    pub fn remove_action(&self, name: &str) -> WotResult<()> {
        self.remove_interaction(name)
    }

    /// Add an event interaction.
    pub fn add_event(&self, event: crate::td::Event) -> WotResult<()> {
        self.add_interaction(Interaction::Event(event))
    }

    /// Remove an event interaction by name.
    pub fn remove_event(&self, name: &str) -> WotResult<()> {
        self.remove_interaction(name)
    }

    // -------------------------------------------------------------------------
    // Forms
    // -------------------------------------------------------------------------

    /// Append a form to the named interaction.
    pub fn add_form(&self, name: &str, form: Form) -> WotResult<()> {
        self.thing
            .write()
            .expect("thing lock poisoned")
            .add_form(name, form)
    }

    /// Names of all interactions, in declaration order.
    pub fn interaction_names(&self) -> Vec<String> {
        self.thing
            .read()
            .expect("thing lock poisoned")
            .interactions()
            .iter()
            .map(|i| i.name().to_string())
            .collect()
    }
}

fn td_change_type(interaction: &Interaction) -> TdChangeType {
    match interaction.interaction_type() {
        InteractionType::Property => TdChangeType::Property,
        InteractionType::Action => TdChangeType::Action,
        InteractionType::Event => TdChangeType::Event,
    }
}

/// Serializes the interaction flat (no variant tag) for TD-change `data`.
fn interaction_data(interaction: &Interaction) -> Option<Value> {
    match interaction {
        Interaction::Property(p) => serde_json::to_value(p).ok(),
        Interaction::Action(a) => serde_json::to_value(a).ok(),
        Interaction::Event(e) => serde_json::to_value(e).ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::td::{Action, Event, Property};
    use serde_json::json;

    fn exposed() -> Arc<ExposedThing> {
        ExposedThing::new(Thing::new("urn:example:test-thing").unwrap())
    }

    fn prop(name: &str) -> Property {
        Property::new(name, json!({"type": "string"}))
            .unwrap()
            .writable(true)
            .observable(true)
            .with_value(json!("initial"))
    }

    #[tokio::test]
    async fn test_read_and_write_property() {
        let thing = exposed();
        thing.add_property(prop("status")).unwrap();

        assert_eq!(thing.read_property("status").unwrap(), json!("initial"));
        thing.write_property("status", json!("updated")).unwrap();
        assert_eq!(thing.read_property("status").unwrap(), json!("updated"));

        assert!(matches!(
            thing.read_property("missing"),
            Err(WotError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_external_write_honors_writable() {
        let thing = exposed();
        thing
            .add_property(prop("locked").writable(false))
            .unwrap();

        assert!(matches!(
            thing.write_property_external("locked", json!("x")),
            Err(WotError::NotWritable(_))
        ));

        // Local writes bypass the flag.
        thing.write_property("locked", json!("x")).unwrap();
        assert_eq!(thing.read_property("locked").unwrap(), json!("x"));
    }

    #[tokio::test]
    async fn test_property_changes_observed_in_order() {
        let thing = exposed();
        thing.add_property(prop("level")).unwrap();

        let mut sub = thing.on_property_change("level").unwrap();

        for value in ["v1", "v2", "v3"] {
            thing.write_property("level", json!(value)).unwrap();
        }

        for expected in ["v1", "v2", "v3"] {
            let delivery = sub.recv().await.unwrap();
            assert_eq!(delivery.item.name, "level");
            assert_eq!(delivery.item.value, json!(expected));
        }
    }

    #[tokio::test]
    async fn test_observe_non_observable_fails_on_subscribe() {
        let thing = exposed();
        thing
            .add_property(prop("opaque").observable(false))
            .unwrap();

        assert!(matches!(
            thing.on_property_change("opaque"),
            Err(WotError::NotObservable(_))
        ));
        assert!(matches!(
            thing.on_property_change("missing"),
            Err(WotError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_invoke_action() {
        let thing = exposed();
        thing.add_action(Action::new("double").unwrap()).unwrap();

        thing
            .set_action_handler(
                "double",
                action_handler(|params| async move {
                    let x = params["input"].as_i64().unwrap_or(0);
                    Ok(json!(x * 2))
                }),
            )
            .unwrap();

        let result = thing.invoke_action("double", json!({"input": 7})).await.unwrap();
        assert_eq!(result, json!(14));
    }

    #[tokio::test]
    async fn test_invoke_without_handler_fails() {
        let thing = exposed();
        thing.add_action(Action::new("noop").unwrap()).unwrap();

        assert!(matches!(
            thing.invoke_action("noop", json!({})).await,
            Err(WotError::NoHandler(_))
        ));
        assert!(matches!(
            thing.invoke_action("missing", json!({})).await,
            Err(WotError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_handler_failure_forwarded() {
        let thing = exposed();
        thing.add_action(Action::new("fail").unwrap()).unwrap();
        thing
            .set_action_handler(
                "fail",
                action_handler(|_| async { Err(WotError::handler("deliberate failure")) }),
            )
            .unwrap();

        let err = thing.invoke_action("fail", json!({})).await.unwrap_err();
        assert_eq!(err.to_string(), "deliberate failure");
    }

    #[tokio::test]
    async fn test_events_observed_in_order() {
        let thing = exposed();
        thing.add_event(Event::new("tick").unwrap()).unwrap();

        let mut sub = thing.on_event("tick").unwrap();
        for i in 0..3 {
            thing.emit_event("tick", json!(i)).unwrap();
        }
        for i in 0..3 {
            assert_eq!(sub.recv().await.unwrap().item.payload, json!(i));
        }

        assert!(matches!(
            thing.emit_event("missing", json!(null)),
            Err(WotError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_td_changes_emitted_once_per_mutation() {
        let thing = exposed();
        let mut sub = thing.on_td_change();

        thing.add_event(Event::new("overheated").unwrap()).unwrap();
        let added = sub.recv().await.unwrap().item;
        assert_eq!(added.td_change_type, TdChangeType::Event);
        assert_eq!(added.method, TdChangeMethod::Add);
        assert_eq!(added.name, "overheated");
        assert!(added.data.is_some());

        thing.remove_event("overheated").unwrap();
        let removed = sub.recv().await.unwrap().item;
        assert_eq!(removed.method, TdChangeMethod::Remove);
        assert_eq!(removed.name, "overheated");

        thing.add_property(prop("p")).unwrap();
        thing.remove_property("p").unwrap();
        thing.add_action(Action::new("a").unwrap()).unwrap();
        thing.remove_action("a").unwrap();

        let kinds: Vec<_> = [
            sub.recv().await.unwrap().item,
            sub.recv().await.unwrap().item,
            sub.recv().await.unwrap().item,
            sub.recv().await.unwrap().item,
        ]
        .into_iter()
        .map(|e| (e.td_change_type, e.method))
        .collect();

        assert_eq!(
            kinds,
            vec![
                (TdChangeType::Property, TdChangeMethod::Add),
                (TdChangeType::Property, TdChangeMethod::Remove),
                (TdChangeType::Action, TdChangeMethod::Add),
                (TdChangeType::Action, TdChangeMethod::Remove),
            ]
        );

        // Exactly one record per mutation.
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_from_description_round_trip() {
        use crate::td::WOT_CONTEXT_URL;

        let doc = json!({
            "@context": [WOT_CONTEXT_URL],
            "id": "urn:example:lamp",
            "name": "Lamp",
            "interaction": [
                {"@type": ["Property"], "name": "on", "outputData": {"type": "boolean"}, "writable": true},
                {"@type": ["Action"], "name": "toggle"},
                {"@type": ["Event"], "name": "overheated"}
            ]
        });

        let td = ThingDescription::from_json(&doc.to_string()).unwrap();
        let thing = ExposedThing::from_description(&td).unwrap();
        let round = thing.to_description();

        let names = |td: &ThingDescription| {
            td.interaction
                .iter()
                .map(|i| (i.name.clone(), i.interaction_type().unwrap()))
                .collect::<Vec<_>>()
        };
        assert_eq!(names(&td), names(&round));
    }
}
