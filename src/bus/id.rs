//! Subscription ID type.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Error parsing a subscription ID.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubscriptionIdError {
    /// Subscription ID must start with the 'sub_' prefix
    #[error("subscription ID must start with 'sub_' prefix")]
    MissingPrefix,

    /// Invalid UUID format
    #[error("invalid UUID format: {0}")]
    InvalidUuid(#[from] uuid::Error),
}

/// A process-unique, time-ordered subscription identifier.
///
/// Built on UUID v7 so ids sort by creation time, rendered as an opaque
/// `sub_<uuid>` string on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Generate a fresh id.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Parse an id, requiring the `sub_` prefix.
    pub fn parse(s: &str) -> Result<Self, SubscriptionIdError> {
        let uuid_str = s
            .strip_prefix("sub_")
            .ok_or(SubscriptionIdError::MissingPrefix)?;
        Ok(Self(Uuid::parse_str(uuid_str)?))
    }

    /// Parse an id, accepting the bare UUID form as well.
    pub fn parse_lenient(s: &str) -> Result<Self, SubscriptionIdError> {
        let uuid_str = s.strip_prefix("sub_").unwrap_or(s);
        Ok(Self(Uuid::parse_str(uuid_str)?))
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub_{}", self.0)
    }
}

impl From<SubscriptionId> for String {
    fn from(id: SubscriptionId) -> Self {
        id.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_uses_prefix() {
        let id = SubscriptionId::new();
        assert!(id.to_string().starts_with("sub_"));
        assert_eq!(id.to_string().len(), 40);
    }

    #[test]
    fn test_parse_requires_prefix() {
        let id = SubscriptionId::new();
        assert_eq!(SubscriptionId::parse(&id.to_string()), Ok(id));
        assert_eq!(
            SubscriptionId::parse("01234567-89ab-7cde-8f01-234567890abc"),
            Err(SubscriptionIdError::MissingPrefix)
        );
    }

    #[test]
    fn test_parse_lenient_accepts_both_forms() {
        let id = SubscriptionId::new();
        assert_eq!(SubscriptionId::parse_lenient(&id.to_string()), Ok(id));

        let bare = id.to_string();
        let bare = bare.strip_prefix("sub_").unwrap();
        assert_eq!(SubscriptionId::parse_lenient(bare), Ok(id));
    }
}
