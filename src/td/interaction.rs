//! Interactions: the tagged Property / Action / Event variants of a Thing.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{WotError, WotResult};
use crate::td::form::Form;
use crate::td::slug::slugify;

static NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("static pattern"));

/// Validates an interaction name against the allowed pattern.
pub fn validate_interaction_name(name: &str) -> WotResult<()> {
    if NAME_PATTERN.is_match(name) {
        Ok(())
    } else {
        Err(WotError::InvalidName(name.to_string()))
    }
}

/// The kind of an interaction, matching the TD `@type` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InteractionType {
    /// A readable (and possibly writable/observable) value
    Property,
    /// An invocable operation
    Action,
    /// A stream of emitted payloads
    Event,
}

impl InteractionType {
    /// TD `@type` string for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Property => "Property",
            Self::Action => "Action",
            Self::Event => "Event",
        }
    }

    /// Parses a TD `@type` string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "Property" => Some(Self::Property),
            "Action" => Some(Self::Action),
            "Event" => Some(Self::Event),
            _ => None,
        }
    }
}

/// A property interaction: current value plus write/observe contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    /// Interaction name, unique per Thing under slug equivalence.
    pub name: String,
    /// JSON-schema fragment describing the value.
    pub data_type: Value,
    /// Whether external writes are accepted.
    pub writable: bool,
    /// Whether subscriptions are accepted.
    pub observable: bool,
    /// Current value.
    pub value: Value,
    forms: Vec<Form>,
}

impl Property {
    /// Create a property with a null initial value.
    pub fn new(name: impl Into<String>, data_type: Value) -> WotResult<Self> {
        let name = name.into();
        validate_interaction_name(&name)?;
        Ok(Self {
            name,
            data_type,
            writable: false,
            observable: false,
            value: Value::Null,
            forms: Vec::new(),
        })
    }

    /// Mark the property writable.
    pub fn writable(mut self, writable: bool) -> Self {
        self.writable = writable;
        self
    }

    /// Mark the property observable.
    pub fn observable(mut self, observable: bool) -> Self {
        self.observable = observable;
        self
    }

    /// Set the initial value.
    pub fn with_value(mut self, value: Value) -> Self {
        self.value = value;
        self
    }
}

/// An action interaction. The handler itself is bound on the ExposedThing so
/// the model stays serializable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Interaction name, unique per Thing under slug equivalence.
    pub name: String,
    /// JSON-schema fragment for the input.
    pub input_schema: Value,
    /// JSON-schema fragment for the output.
    pub output_schema: Value,
    forms: Vec<Form>,
}

impl Action {
    /// Create an action with null input/output schemas.
    pub fn new(name: impl Into<String>) -> WotResult<Self> {
        let name = name.into();
        validate_interaction_name(&name)?;
        Ok(Self {
            name,
            input_schema: Value::Null,
            output_schema: Value::Null,
            forms: Vec::new(),
        })
    }

    /// Set the input schema.
    pub fn with_input_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }

    /// Set the output schema.
    pub fn with_output_schema(mut self, schema: Value) -> Self {
        self.output_schema = schema;
        self
    }
}

/// An event interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Interaction name, unique per Thing under slug equivalence.
    pub name: String,
    /// JSON-schema fragment for the emitted payloads.
    pub data_schema: Value,
    forms: Vec<Form>,
}

impl Event {
    /// Create an event with a null data schema.
    pub fn new(name: impl Into<String>) -> WotResult<Self> {
        let name = name.into();
        validate_interaction_name(&name)?;
        Ok(Self {
            name,
            data_schema: Value::Null,
            forms: Vec::new(),
        })
    }

    /// Set the data schema.
    pub fn with_data_schema(mut self, schema: Value) -> Self {
        self.data_schema = schema;
        self
    }
}

/// Tagged variant over the three interaction kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Interaction {
    /// Property interaction
    Property(Property),
    /// Action interaction
    Action(Action),
    /// Event interaction
    Event(Event),
}

impl Interaction {
    /// Interaction name.
    pub fn name(&self) -> &str {
        match self {
            Self::Property(p) => &p.name,
            Self::Action(a) => &a.name,
            Self::Event(e) => &e.name,
        }
    }

    /// Slug form of the name, used for duplicate detection and lookup.
    pub fn slug(&self) -> String {
        slugify(self.name())
    }

    /// Kind of this interaction.
    pub fn interaction_type(&self) -> InteractionType {
        match self {
            Self::Property(_) => InteractionType::Property,
            Self::Action(_) => InteractionType::Action,
            Self::Event(_) => InteractionType::Event,
        }
    }

    /// Ordered list of forms.
    pub fn forms(&self) -> &[Form] {
        match self {
            Self::Property(p) => &p.forms,
            Self::Action(a) => &a.forms,
            Self::Event(e) => &e.forms,
        }
    }

    fn forms_mut(&mut self) -> &mut Vec<Form> {
        match self {
            Self::Property(p) => &mut p.forms,
            Self::Action(a) => &mut a.forms,
            Self::Event(e) => &mut e.forms,
        }
    }

    /// Append a form, rejecting duplicates on `(href, media_type)`.
    pub fn add_form(&mut self, form: Form) -> WotResult<()> {
        if self.forms().iter().any(|f| f.key() == form.key()) {
            return Err(WotError::DuplicateForm {
                href: form.href,
                media_type: form.media_type,
            });
        }
        self.forms_mut().push(form);
        Ok(())
    }

    /// Remove a form by `(href, media_type)`. Returns whether it existed.
    pub fn remove_form(&mut self, href: &str, media_type: &str) -> bool {
        let forms = self.forms_mut();
        let before = forms.len();
        forms.retain(|f| f.key() != (href, media_type));
        forms.len() != before
    }

    /// The property inside, if this is a property.
    pub fn as_property(&self) -> Option<&Property> {
        match self {
            Self::Property(p) => Some(p),
            _ => None,
        }
    }

    /// Mutable access to the property inside, if this is a property.
    pub fn as_property_mut(&mut self) -> Option<&mut Property> {
        match self {
            Self::Property(p) => Some(p),
            _ => None,
        }
    }
}
