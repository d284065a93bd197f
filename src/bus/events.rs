//! Event payloads carried by the change bus.
//!
//! The serialized shapes here are wire contracts: they are what protocol
//! servers put in the `data` field of emitted frames.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which part of the TD an interaction change touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TdChangeType {
    /// A property was affected
    Property,
    /// An action was affected
    Action,
    /// An event was affected
    Event,
}

/// What happened to the TD.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TdChangeMethod {
    /// An interaction was added
    Add,
    /// An interaction was removed
    Remove,
    /// An interaction was modified in place
    Change,
}

/// A property changed value. Carries the exact post-write value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyChangeEvent {
    /// Property name.
    pub name: String,
    /// Value after the write.
    pub value: Value,
}

/// An application event was emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmittedEvent {
    /// Event name.
    pub name: String,
    /// Emitted payload.
    pub payload: Value,
}

/// The Thing Description changed shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TdChangeEvent {
    /// Which interaction kind was affected.
    pub td_change_type: TdChangeType,
    /// Whether it was added, removed or changed.
    pub method: TdChangeMethod,
    /// Name of the affected interaction.
    pub name: String,
    /// Description of the interaction after the change, when available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Human-readable note, when available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl TdChangeEvent {
    /// Build a change record without `data` or `description`.
    pub fn new(td_change_type: TdChangeType, method: TdChangeMethod, name: impl Into<String>) -> Self {
        Self {
            td_change_type,
            method,
            name: name.into(),
            data: None,
            description: None,
        }
    }

    /// Attach the serialized interaction.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_td_change_event_wire_shape() {
        let event = TdChangeEvent::new(TdChangeType::Property, TdChangeMethod::Add, "brightness")
            .with_data(json!({"name": "brightness", "writable": true}));

        let wire = serde_json::to_value(&event).unwrap();
        assert_eq!(wire["td_change_type"], "property");
        assert_eq!(wire["method"], "add");
        assert_eq!(wire["name"], "brightness");
        assert_eq!(wire["data"]["writable"], true);
        assert!(wire.get("description").is_none());
    }

    #[test]
    fn test_property_change_event_round_trip() {
        let event = PropertyChangeEvent {
            name: "on".to_string(),
            value: json!(true),
        };
        let wire = serde_json::to_string(&event).unwrap();
        let back: PropertyChangeEvent = serde_json::from_str(&wire).unwrap();
        assert_eq!(back, event);
    }
}
