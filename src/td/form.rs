//! Forms: how a single interaction is reached over a concrete protocol.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{WotError, WotResult};

/// Protocols a form can point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// WebSocket binding (`ws` / `wss`)
    Websockets,
    /// CoAP binding (`coap` / `coaps`)
    Coap,
    /// Plain HTTP (used by externally managed resources)
    Http,
}

impl Protocol {
    /// Infers the protocol from a URI scheme, if the scheme is known.
    pub fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme {
            "ws" | "wss" => Some(Self::Websockets),
            "coap" | "coaps" => Some(Self::Coap),
            "http" | "https" => Some(Self::Http),
            _ => None,
        }
    }
}

/// A `(protocol, href, media_type)` triple describing how to reach an
/// interaction. Two forms are considered duplicates when both `href` and
/// `media_type` match, regardless of `rel`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Form {
    /// Protocol this form belongs to.
    pub protocol: Protocol,
    /// Absolute or base-relative URI of the endpoint.
    pub href: String,
    /// Media type served at the endpoint.
    pub media_type: String,
    /// Expected result of performing the operation, when stated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rel: Option<String>,
}

impl Form {
    /// Create a new form.
    pub fn new(
        protocol: Protocol,
        href: impl Into<String>,
        media_type: impl Into<String>,
    ) -> Self {
        Self {
            protocol,
            href: href.into(),
            media_type: media_type.into(),
            rel: None,
        }
    }

    /// Attach a `rel` attribute.
    pub fn with_rel(mut self, rel: impl Into<String>) -> Self {
        self.rel = Some(rel.into());
        self
    }

    /// Duplicate key: forms collide on `(href, media_type)`.
    pub fn key(&self) -> (&str, &str) {
        (&self.href, &self.media_type)
    }

    /// Resolves this form's `href` against an optional base IRI.
    ///
    /// An absolute `href` is returned as is; a relative one is joined onto
    /// `base`. A relative `href` without a base cannot be resolved.
    pub fn resolve_uri(&self, base: Option<&str>) -> WotResult<Url> {
        if let Ok(url) = Url::parse(&self.href) {
            return Ok(url);
        }

        let base = base.ok_or_else(|| {
            WotError::internal(format!(
                "cannot resolve relative href without base: {}",
                self.href
            ))
        })?;

        let base_url = Url::parse(base)
            .map_err(|err| WotError::internal(format!("invalid base IRI {base}: {err}")))?;

        base_url
            .join(&self.href)
            .map_err(|err| WotError::internal(format!("cannot join {}: {err}", self.href)))
    }
}
