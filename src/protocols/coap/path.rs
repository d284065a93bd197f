//! CoAP resource paths: `/<thing-slug>/<kind>/<interaction-name>`.

use std::fmt;

/// The interaction family a resource belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// `/properties/<name>`: GET to read, PUT to write, GET+Observe to stream
    Properties,
    /// `/actions/<name>`: POST to invoke
    Actions,
    /// `/events/<name>`: GET+Observe to stream
    Events,
}

impl ResourceKind {
    /// Path segment for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Properties => "properties",
            Self::Actions => "actions",
            Self::Events => "events",
        }
    }

    /// Parses a path segment.
    pub fn from_segment(segment: &str) -> Option<Self> {
        match segment {
            "properties" => Some(Self::Properties),
            "actions" => Some(Self::Actions),
            "events" => Some(Self::Events),
            _ => None,
        }
    }
}

/// A parsed resource path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourcePath {
    /// Thing URL slug.
    pub slug: String,
    /// Interaction family.
    pub kind: ResourceKind,
    /// Interaction name.
    pub name: String,
}

impl ResourcePath {
    /// Build a path.
    pub fn new(slug: impl Into<String>, kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            kind,
            name: name.into(),
        }
    }

    /// Parses a CoAP Uri-Path (without leading slash) into a resource path.
    pub fn parse(path: &str) -> Option<Self> {
        let mut segments = path.trim_matches('/').split('/');
        let slug = segments.next().filter(|s| !s.is_empty())?;
        let kind = ResourceKind::from_segment(segments.next()?)?;
        let name = segments.next().filter(|s| !s.is_empty())?;
        if segments.next().is_some() {
            return None;
        }
        Some(Self::new(slug, kind, name))
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.slug, self.kind.as_str(), self.name)
    }
}
