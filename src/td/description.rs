//! Thing Description documents: the JSON-LD shaped view of a Thing.
//!
//! The document model accepts both `link` and `form` as the array of
//! endpoint descriptors inside an interaction, and requires the canonical
//! WoT context URL (over `http` or `https`) inside `@context`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{WotError, WotResult};
use crate::td::form::{Form, Protocol};
use crate::td::interaction::{
    Action, Event, Interaction, InteractionType, Property, validate_interaction_name,
};
use crate::td::slug::slugify;
use crate::td::thing::Thing;

/// Canonical WoT context URL. Documents may reference it over `http` or
/// `https`; both spellings are accepted.
pub const WOT_CONTEXT_URL: &str = "http://w3c.github.io/wot/w3c-wot-td-context.jsonld";

const WOT_CONTEXT_URL_HTTPS: &str = "https://w3c.github.io/wot/w3c-wot-td-context.jsonld";

/// One endpoint descriptor inside a TD interaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormDescription {
    /// Endpoint URI, absolute or relative to the document `base`.
    pub href: String,
    /// Media type served at the endpoint.
    #[serde(rename = "mediaType")]
    pub media_type: String,
    /// Expected result of the operation, when stated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rel: Option<String>,
}

/// One interaction inside a TD document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionDescription {
    /// JSON-LD types; must contain exactly one of `Property`, `Action`,
    /// `Event`.
    #[serde(rename = "@type")]
    pub types: Vec<String>,
    /// Interaction name.
    pub name: String,
    /// Output value schema fragment.
    #[serde(rename = "outputData", skip_serializing_if = "Option::is_none")]
    pub output_data: Option<Value>,
    /// Input value schema fragment.
    #[serde(rename = "inputData", skip_serializing_if = "Option::is_none")]
    pub input_data: Option<Value>,
    /// Whether the property accepts external writes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub writable: Option<bool>,
    /// Whether the property accepts subscriptions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observable: Option<bool>,
    /// Endpoint descriptors under the `link` key.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub link: Vec<FormDescription>,
    /// Endpoint descriptors under the `form` alias, accepted on input.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub form: Vec<FormDescription>,
}

impl InteractionDescription {
    /// The single interaction type named in `@type`.
    pub fn interaction_type(&self) -> WotResult<InteractionType> {
        let mut found = None;
        for t in &self.types {
            if let Some(it) = InteractionType::from_str(t) {
                if found.is_some() {
                    return Err(WotError::malformed(format!(
                        "interaction {} names more than one type",
                        self.name
                    )));
                }
                found = Some(it);
            }
        }
        found.ok_or_else(|| {
            WotError::malformed(format!("interaction {} names no known type", self.name))
        })
    }

    /// All endpoint descriptors, whichever key they arrived under.
    pub fn links(&self) -> impl Iterator<Item = &FormDescription> {
        self.link.iter().chain(self.form.iter())
    }
}

/// A TD document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThingDescription {
    /// JSON-LD context; must include the canonical WoT context URL.
    #[serde(rename = "@context")]
    pub context: Value,
    /// Thing id. Optional in documents; synthesized from the name when
    /// absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Thing name.
    pub name: String,
    /// Base IRI for relative hrefs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base: Option<String>,
    /// Semantic types of the Thing itself.
    #[serde(rename = "@type", skip_serializing_if = "Option::is_none")]
    pub thing_type: Option<Value>,
    /// Interactions.
    #[serde(default)]
    pub interaction: Vec<InteractionDescription>,
}

impl ThingDescription {
    /// Parse a document from JSON text and validate it.
    pub fn from_json(raw: &str) -> WotResult<Self> {
        let td: Self = serde_json::from_str(raw)?;
        td.validate()?;
        Ok(td)
    }

    /// Serialize the document to JSON text.
    pub fn to_json(&self) -> WotResult<String> {
        serde_json::to_string(self).map_err(WotError::from)
    }

    /// Validate the document: context, interaction types and names.
    pub fn validate(&self) -> WotResult<()> {
        if !context_contains_wot_url(&self.context) {
            return Err(WotError::malformed(format!(
                "missing context: {WOT_CONTEXT_URL}"
            )));
        }

        for interaction in &self.interaction {
            interaction.interaction_type()?;
            validate_interaction_name(&interaction.name)?;
        }

        Ok(())
    }

    /// Build the document describing a Thing.
    pub fn from_thing(thing: &Thing) -> Self {
        let interaction = thing
            .interactions()
            .iter()
            .map(describe_interaction)
            .collect();

        Self {
            context: Value::Array(vec![Value::String(WOT_CONTEXT_URL.to_string())]),
            id: Some(thing.id().to_string()),
            name: thing.name().to_string(),
            base: thing.base().map(str::to_string),
            thing_type: None,
            interaction,
        }
    }

    /// Build the Thing this document describes.
    ///
    /// When the document carries no id, a stable `urn:wot:<name-slug>` id is
    /// synthesized so the Thing passes id validation.
    pub fn to_thing(&self) -> WotResult<Thing> {
        self.validate()?;

        let id = match &self.id {
            Some(id) => id.clone(),
            None => format!("urn:wot:{}", slugify(&self.name)),
        };

        let mut thing = Thing::new(id)?.with_name(self.name.clone());
        if let Some(base) = &self.base {
            thing = thing.with_base(base.clone());
        }

        for desc in &self.interaction {
            let mut interaction = build_interaction(desc)?;
            for link in desc.links() {
                let protocol = infer_protocol(&link.href, self.base.as_deref());
                let mut form = Form::new(protocol, link.href.clone(), link.media_type.clone());
                if let Some(rel) = &link.rel {
                    form = form.with_rel(rel.clone());
                }
                interaction.add_form(form)?;
            }
            thing.add_interaction(interaction)?;
        }

        Ok(thing)
    }
}

fn build_interaction(desc: &InteractionDescription) -> WotResult<Interaction> {
    Ok(match desc.interaction_type()? {
        InteractionType::Property => Interaction::Property(
            Property::new(&desc.name, desc.output_data.clone().unwrap_or(Value::Null))?
                .writable(desc.writable.unwrap_or(false))
                .observable(desc.observable.unwrap_or(false)),
        ),
        InteractionType::Action => Interaction::Action(
            Action::new(&desc.name)?
                .with_input_schema(desc.input_data.clone().unwrap_or(Value::Null))
                .with_output_schema(desc.output_data.clone().unwrap_or(Value::Null)),
        ),
        InteractionType::Event => Interaction::Event(
            Event::new(&desc.name)?
                .with_data_schema(desc.output_data.clone().unwrap_or(Value::Null)),
        ),
    })
}

fn describe_interaction(interaction: &Interaction) -> InteractionDescription {
    let mut desc = InteractionDescription {
        types: vec![interaction.interaction_type().as_str().to_string()],
        name: interaction.name().to_string(),
        output_data: None,
        input_data: None,
        writable: None,
        observable: None,
        link: interaction
            .forms()
            .iter()
            .map(|f| FormDescription {
                href: f.href.clone(),
                media_type: f.media_type.clone(),
                rel: f.rel.clone(),
            })
            .collect(),
        form: Vec::new(),
    };

    match interaction {
        Interaction::Property(p) => {
            if !p.data_type.is_null() {
                desc.output_data = Some(p.data_type.clone());
            }
            desc.writable = Some(p.writable);
            desc.observable = Some(p.observable);
        }
        Interaction::Action(a) => {
            if !a.input_schema.is_null() {
                desc.input_data = Some(a.input_schema.clone());
            }
            if !a.output_schema.is_null() {
                desc.output_data = Some(a.output_schema.clone());
            }
        }
        Interaction::Event(e) => {
            if !e.data_schema.is_null() {
                desc.output_data = Some(e.data_schema.clone());
            }
        }
    }

    desc
}

fn infer_protocol(href: &str, base: Option<&str>) -> Protocol {
    let scheme_of = |s: &str| url::Url::parse(s).ok().map(|u| u.scheme().to_string());

    let scheme = scheme_of(href).or_else(|| base.and_then(|b| scheme_of(b)));

    scheme
        .as_deref()
        .and_then(Protocol::from_scheme)
        .unwrap_or(Protocol::Http)
}

fn context_contains_wot_url(context: &Value) -> bool {
    let matches_url = |s: &str| s == WOT_CONTEXT_URL || s == WOT_CONTEXT_URL_HTTPS;

    match context {
        Value::String(s) => matches_url(s),
        Value::Array(items) => items
            .iter()
            .any(|item| matches!(item, Value::String(s) if matches_url(s))),
        _ => false,
    }
}
