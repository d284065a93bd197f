//! The per-Thing change bus: one topic per observable stream.
//!
//! A bus owns three families of topics: the single `td_change` stream, one
//! `property:<name>` stream per property and one `event:<name>` stream per
//! event. Property and event topics are created on first use, from either
//! the publishing or the subscribing side, and torn down when the matching
//! interaction is removed.

use dashmap::DashMap;

use crate::bus::events::{EmittedEvent, PropertyChangeEvent, TdChangeEvent};
use crate::bus::topic::{PublishOutcome, Topic, TopicSubscriber};
use crate::config::DEFAULT_CHANNEL_CAPACITY;

/// Per-Thing registry of hot streams.
#[derive(Debug)]
pub struct ChangeBus {
    capacity: usize,
    td_change: Topic<TdChangeEvent>,
    properties: DashMap<String, Topic<PropertyChangeEvent>>,
    events: DashMap<String, Topic<EmittedEvent>>,
}

impl ChangeBus {
    /// Create a bus whose topics buffer `capacity` items per subscriber.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            td_change: Topic::new(capacity),
            properties: DashMap::new(),
            events: DashMap::new(),
        }
    }

    /// Publish a TD change record.
    pub fn publish_td_change(&self, event: TdChangeEvent) -> PublishOutcome {
        tracing::debug!(
            name = %event.name,
            method = ?event.method,
            "publishing TD change"
        );
        self.td_change.publish(event)
    }

    /// Publish a property change.
    pub fn publish_property_change(&self, event: PropertyChangeEvent) -> PublishOutcome {
        self.property_topic(&event.name).publish(event)
    }

    /// Publish an emitted application event.
    pub fn publish_event(&self, event: EmittedEvent) -> PublishOutcome {
        self.event_topic(&event.name).publish(event)
    }

    /// Subscribe to TD changes.
    pub fn observe_td_changes(&self) -> TopicSubscriber<TdChangeEvent> {
        self.td_change.subscribe()
    }

    /// Subscribe to changes of one property.
    pub fn observe_property(&self, name: &str) -> TopicSubscriber<PropertyChangeEvent> {
        self.property_topic(name).subscribe()
    }

    /// Subscribe to emissions of one event.
    pub fn observe_event(&self, name: &str) -> TopicSubscriber<EmittedEvent> {
        self.event_topic(name).subscribe()
    }

    /// Drop the topic of a removed property. Live subscribers drain and end.
    pub fn remove_property_topic(&self, name: &str) {
        self.properties.remove(name);
    }

    /// Drop the topic of a removed event. Live subscribers drain and end.
    pub fn remove_event_topic(&self, name: &str) {
        self.events.remove(name);
    }

    fn property_topic(&self, name: &str) -> Topic<PropertyChangeEvent> {
        self.properties
            .entry(name.to_string())
            .or_insert_with(|| Topic::new(self.capacity))
            .clone()
    }

    fn event_topic(&self, name: &str) -> Topic<EmittedEvent> {
        self.events
            .entry(name.to_string())
            .or_insert_with(|| Topic::new(self.capacity))
            .clone()
    }
}

impl Default for ChangeBus {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::events::{TdChangeMethod, TdChangeType};
    use serde_json::json;

    #[tokio::test]
    async fn test_property_streams_are_isolated() {
        let bus = ChangeBus::default();
        let mut on_a = bus.observe_property("a");
        let mut on_b = bus.observe_property("b");

        bus.publish_property_change(PropertyChangeEvent {
            name: "a".to_string(),
            value: json!(1),
        });

        assert_eq!(on_a.recv().await.unwrap().item.value, json!(1));
        assert!(on_b.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_td_change_fan_out() {
        let bus = ChangeBus::default();
        let mut first = bus.observe_td_changes();
        let mut second = bus.observe_td_changes();

        bus.publish_td_change(TdChangeEvent::new(
            TdChangeType::Event,
            TdChangeMethod::Add,
            "overheated",
        ));

        assert_eq!(first.recv().await.unwrap().item.name, "overheated");
        assert_eq!(second.recv().await.unwrap().item.name, "overheated");
    }

    #[tokio::test]
    async fn test_publishing_before_any_subscriber_reaches_nobody() {
        let bus = ChangeBus::default();
        let outcome = bus.publish_event(EmittedEvent {
            name: "tick".to_string(),
            payload: json!(null),
        });
        assert_eq!(outcome.subscriber_count(), 0);

        // A late subscriber only sees what comes after it.
        let mut sub = bus.observe_event("tick");
        bus.publish_event(EmittedEvent {
            name: "tick".to_string(),
            payload: json!(2),
        });
        assert_eq!(sub.recv().await.unwrap().item.payload, json!(2));
    }

    #[tokio::test]
    async fn test_removed_topic_ends_subscribers() {
        let bus = ChangeBus::default();
        let mut sub = bus.observe_property("gone");
        bus.remove_property_topic("gone");
        assert!(sub.recv().await.is_none());
    }
}
