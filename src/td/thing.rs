//! The Thing entity: identity plus an ordered registry of interactions.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{WotError, WotResult};
use crate::td::form::Form;
use crate::td::interaction::Interaction;
use crate::td::slug::slugify;

/// A virtual device: a validated id, a display name, an optional base IRI
/// and an ordered list of interactions with slug-unique names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thing {
    id: String,
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    base: Option<String>,
    interactions: Vec<Interaction>,
}

impl Thing {
    /// Create a Thing, validating the id.
    ///
    /// The id must be an absolute IRI: it needs a scheme, must not contain
    /// raw whitespace and every `%` must start a two-digit hex escape.
    /// The display name defaults to the id until overridden.
    pub fn new(id: impl Into<String>) -> WotResult<Self> {
        let id = id.into();
        validate_thing_id(&id)?;
        Ok(Self {
            name: id.clone(),
            id,
            base: None,
            interactions: Vec::new(),
        })
    }

    /// Override the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the base IRI used to resolve relative form hrefs.
    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.base = Some(base.into());
        self
    }

    /// Replace the base IRI in place.
    pub fn set_base(&mut self, base: impl Into<String>) {
        self.base = Some(base.into());
    }

    /// Thing id (absolute IRI), exactly as given at construction.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Base IRI, when set.
    pub fn base(&self) -> Option<&str> {
        self.base.as_deref()
    }

    /// Stable URL path segment derived from the id.
    pub fn url_slug(&self) -> String {
        slugify(&self.id)
    }

    /// Ordered interactions.
    pub fn interactions(&self) -> &[Interaction] {
        &self.interactions
    }

    /// Append an interaction, rejecting slug-equivalent duplicates.
    pub fn add_interaction(&mut self, interaction: Interaction) -> WotResult<()> {
        let slug = interaction.slug();
        if self.interactions.iter().any(|i| i.slug() == slug) {
            return Err(WotError::DuplicateName(interaction.name().to_string()));
        }
        self.interactions.push(interaction);
        Ok(())
    }

    /// Remove an interaction matched by name or slug form.
    pub fn remove_interaction(&mut self, name: &str) -> Option<Interaction> {
        let idx = self.position(name)?;
        Some(self.interactions.remove(idx))
    }

    /// Find an interaction matched by name or slug form.
    pub fn find_interaction(&self, name: &str) -> Option<&Interaction> {
        self.position(name).map(|idx| &self.interactions[idx])
    }

    /// Mutable variant of [`Thing::find_interaction`].
    pub fn find_interaction_mut(&mut self, name: &str) -> Option<&mut Interaction> {
        let idx = self.position(name)?;
        Some(&mut self.interactions[idx])
    }

    fn position(&self, name: &str) -> Option<usize> {
        let slug = slugify(name);
        self.interactions
            .iter()
            .position(|i| i.name() == name || i.slug() == slug)
    }

    /// Append a form to the named interaction.
    pub fn add_form(&mut self, name: &str, form: Form) -> WotResult<()> {
        let interaction = self
            .find_interaction_mut(name)
            .ok_or_else(|| WotError::not_found(name))?;
        interaction.add_form(form)
    }

    /// Remove a form from the named interaction by `(href, media_type)`.
    pub fn remove_form(&mut self, name: &str, href: &str, media_type: &str) -> WotResult<bool> {
        let interaction = self
            .find_interaction_mut(name)
            .ok_or_else(|| WotError::not_found(name))?;
        Ok(interaction.remove_form(href, media_type))
    }

    /// Resolves a form's href against this Thing's base IRI.
    pub fn resolve_form_uri(&self, form: &Form) -> WotResult<Url> {
        form.resolve_uri(self.base())
    }
}

/// Checks that an id is an absolute IRI per the model contract.
pub fn validate_thing_id(id: &str) -> WotResult<()> {
    if id.chars().any(char::is_whitespace) {
        return Err(WotError::InvalidId(id.to_string()));
    }

    if !valid_percent_escapes(id) {
        return Err(WotError::InvalidId(id.to_string()));
    }

    // A parse failure here means the id is relative or has no scheme.
    Url::parse(id).map_err(|_| WotError::InvalidId(id.to_string()))?;

    Ok(())
}

fn valid_percent_escapes(input: &str) -> bool {
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if i + 2 >= bytes.len()
                || !bytes[i + 1].is_ascii_hexdigit()
                || !bytes[i + 2].is_ascii_hexdigit()
            {
                return false;
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::td::interaction::Action;
    use crate::td::slug::slugify;

    fn action(name: &str) -> Interaction {
        Interaction::Action(Action::new(name).unwrap())
    }

    #[test]
    fn test_thing_valid_ids() {
        let ids_valid = [
            "urn:uuid:9f605c83-94c8-45d8-b4e1-d0dbf44a3a92",
            "urn:example:org",
            "http://datypic.com",
            "http://datypic.com/prod.html#shirt",
            "mailto:info@datypic.com",
            "https://example.org/things/lamp?room=kitchen",
        ];

        for id in ids_valid {
            assert!(Thing::new(id).is_ok(), "{id} should be accepted");
        }
    }

    #[test]
    fn test_thing_invalid_ids() {
        let ids_invalid = [
            "alice@example.com",
            "192.168.0.1",
            "a sentence is not an iri",
            "9f605c8394c845d8b4e1d0dbf44a3a92",
            "http://datypic.com#f% rag",
            "http://datypic.com/%zz",
            "../prod.html#shirt",
        ];

        for id in ids_invalid {
            assert!(
                matches!(Thing::new(id), Err(WotError::InvalidId(_))),
                "{id} should be rejected"
            );
        }
    }

    #[test]
    fn test_find_interaction_by_name_and_slug() {
        let mut thing = Thing::new("urn:example:org").unwrap();

        thing.add_interaction(action("my_interaction")).unwrap();
        thing.add_interaction(action("AnotherInteraction")).unwrap();

        assert_eq!(
            thing.find_interaction("my_interaction").map(|i| i.name()),
            Some("my_interaction")
        );
        assert_eq!(
            thing
                .find_interaction(&slugify("my_interaction"))
                .map(|i| i.name()),
            Some("my_interaction")
        );
        assert_eq!(
            thing
                .find_interaction(&slugify("AnotherInteraction"))
                .map(|i| i.name()),
            Some("AnotherInteraction")
        );
    }

    #[test]
    fn test_remove_interaction_by_name_or_slug() {
        let mut thing = Thing::new("urn:example:org").unwrap();

        thing.add_interaction(action("my_interaction")).unwrap();
        thing.add_interaction(action("AnotherInteraction")).unwrap();
        thing.add_interaction(action("YetAnother_interaction")).unwrap();

        assert!(thing.remove_interaction("my_interaction").is_some());
        assert!(thing
            .remove_interaction(&slugify("YetAnother_interaction"))
            .is_some());

        assert!(thing.find_interaction("my_interaction").is_none());
        assert!(thing.find_interaction("AnotherInteraction").is_some());
        assert!(thing.find_interaction("YetAnother_interaction").is_none());
    }

    #[test]
    fn test_duplicated_interactions_rejected() {
        let mut thing = Thing::new("urn:example:org").unwrap();

        thing.add_interaction(action("my_interaction")).unwrap();
        thing.add_interaction(action("AnotherInteraction")).unwrap();

        assert!(matches!(
            thing.add_interaction(action("my_interaction")),
            Err(WotError::DuplicateName(_))
        ));
        // Slug-equivalent names collide too.
        assert!(matches!(
            thing.add_interaction(action("MY-INTERACTION")),
            Err(WotError::DuplicateName(_))
        ));
    }

    #[test]
    fn test_resolve_form_uri_uses_base() {
        use crate::td::form::{Form, Protocol};

        let thing = Thing::new("urn:example:org")
            .unwrap()
            .with_base("http://example.org/things/lamp");

        let relative = Form::new(Protocol::Http, "/props/on", "application/json");
        assert_eq!(
            thing.resolve_form_uri(&relative).unwrap().as_str(),
            "http://example.org/props/on"
        );

        let absolute = Form::new(Protocol::Websockets, "ws://h:1/x", "application/json");
        assert_eq!(thing.resolve_form_uri(&absolute).unwrap().as_str(), "ws://h:1/x");
    }
}
