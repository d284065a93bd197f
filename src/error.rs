//! Error types for servient operations
//!
//! This module provides type-safe error handling for the whole crate.
//!
//! # Error Codes
//!
//! Protocol-visible errors are represented by the [`WireErrorCode`] enum,
//! which carries the stable integer values used on the wire. Model-level
//! failures use [`WotError`] and are translated to a wire code at the
//! protocol boundary.
//!
//! # Example
//! ```rust,ignore
//! use wot_servient::{WotError, WireErrorCode};
//!
//! let error = WotError::not_found("unknown interaction");
//! assert_eq!(error.wire_code(), WireErrorCode::NotFound);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Stable error codes exposed on the wire.
///
/// The integer values are part of the protocol contract and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum WireErrorCode {
    /// An unexpected internal error occurred
    InternalError,
    /// A failure was observed on a live subscription stream
    SubscriptionError,
    /// The requested method is not part of the protocol surface
    MethodNotAllowed,
    /// The requested interaction was not found
    NotFound,
    /// The property rejects external writes
    NotWritable,
    /// The property rejects subscriptions
    NotObservable,
}

impl WireErrorCode {
    /// Returns the integer value used on the wire.
    pub fn code(&self) -> i64 {
        match self {
            Self::InternalError => -32000,
            Self::SubscriptionError => -32001,
            Self::MethodNotAllowed => -32002,
            Self::NotFound => -32003,
            Self::NotWritable => -32004,
            Self::NotObservable => -32005,
        }
    }

    /// Builds a code from its wire integer value, if known.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            -32000 => Some(Self::InternalError),
            -32001 => Some(Self::SubscriptionError),
            -32002 => Some(Self::MethodNotAllowed),
            -32003 => Some(Self::NotFound),
            -32004 => Some(Self::NotWritable),
            -32005 => Some(Self::NotObservable),
            _ => None,
        }
    }

    /// Returns the string representation of the error code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InternalError => "internal-error",
            Self::SubscriptionError => "subscription-error",
            Self::MethodNotAllowed => "method-not-allowed",
            Self::NotFound => "not-found",
            Self::NotWritable => "not-writable",
            Self::NotObservable => "not-observable",
        }
    }
}

impl fmt::Display for WireErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors raised by the Thing model, the change bus and the protocol bindings.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum WotError {
    /// Thing id is not a valid absolute IRI
    #[error("invalid thing id: {0}")]
    InvalidId(String),

    /// Interaction name does not match the allowed pattern
    #[error("invalid interaction name: {0}")]
    InvalidName(String),

    /// Interaction name already taken on this Thing (slug equivalence)
    #[error("duplicate interaction name: {0}")]
    DuplicateName(String),

    /// Form already present on this interaction
    #[error("duplicate form: {href} ({media_type})")]
    DuplicateForm {
        /// Form href
        href: String,
        /// Form media type
        media_type: String,
    },

    /// Unknown interaction
    #[error("interaction not found: {0}")]
    NotFound(String),

    /// External write to a non-writable property
    #[error("property is not writable: {0}")]
    NotWritable(String),

    /// Subscription to a non-observable property
    #[error("property is not observable: {0}")]
    NotObservable(String),

    /// Action invoked with no handler bound
    #[error("no handler bound for action: {0}")]
    NoHandler(String),

    /// Action handler returned a failure
    #[error("{0}")]
    Handler(String),

    /// A protocol frame failed codec validation
    #[error("malformed message: {0}")]
    Malformed(String),

    /// Failure observed on a live subscription stream
    #[error("subscription error: {0}")]
    Subscription(String),

    /// Request method outside the protocol surface
    #[error("method not allowed: {0}")]
    MethodNotAllowed(String),

    /// No usable form found for the target interaction
    #[error("no usable form for interaction: {0}")]
    NoForm(String),

    /// The remote peer reported a failure
    #[error("{message}")]
    Remote {
        /// Wire error code reported by the peer
        code: i64,
        /// Error message reported by the peer
        message: String,
    },

    /// The connection closed before the pending operation completed
    #[error("connection closed")]
    ConnectionClosed,

    /// A client-side wait expired
    #[error("operation timed out")]
    Timeout,

    /// Anything else
    #[error("internal error: {0}")]
    Internal(String),
}

impl WotError {
    /// Create a NotFound error.
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound(name.into())
    }

    /// Create a NotWritable error.
    pub fn not_writable(name: impl Into<String>) -> Self {
        Self::NotWritable(name.into())
    }

    /// Create a NotObservable error.
    pub fn not_observable(name: impl Into<String>) -> Self {
        Self::NotObservable(name.into())
    }

    /// Create a Subscription error.
    pub fn subscription(message: impl Into<String>) -> Self {
        Self::Subscription(message.into())
    }

    /// Create a Malformed error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(message.into())
    }

    /// Create an Internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create a Handler failure carrying the handler's own message.
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler(message.into())
    }

    /// Maps this error onto the stable wire code enum.
    ///
    /// Everything without a dedicated code collapses into `internal-error`,
    /// which is also what the original protocol does for handler failures
    /// and malformed frames.
    pub fn wire_code(&self) -> WireErrorCode {
        match self {
            Self::NotFound(_) => WireErrorCode::NotFound,
            Self::NotWritable(_) => WireErrorCode::NotWritable,
            Self::NotObservable(_) => WireErrorCode::NotObservable,
            Self::MethodNotAllowed(_) => WireErrorCode::MethodNotAllowed,
            Self::Subscription(_) => WireErrorCode::SubscriptionError,
            _ => WireErrorCode::InternalError,
        }
    }
}

impl From<serde_json::Error> for WotError {
    fn from(err: serde_json::Error) -> Self {
        Self::Malformed(err.to_string())
    }
}

impl From<std::io::Error> for WotError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

/// Convenience alias used across the crate.
pub type WotResult<T> = Result<T, WotError>;
