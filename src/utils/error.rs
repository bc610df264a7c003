//! The `error` module defines the error types used within `notifsub`.
//!
//! Two families live here:
//!
//! - [`NotifError`] is the per-request taxonomy. Every variant ends up on the
//!   wire as the `{name, message}` descriptor of an error response and never
//!   escapes the connection that caused it.
//! - [`BrokerError`] and [`BackboneError`] cover wiring and infrastructure
//!   failures (startup, configuration, pub/sub backbone).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Wire form of an error, sent inside a `response` with `status: "error"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDescriptor {
    pub name: String,
    pub message: String,
}

/// Errors reported back to a single client as an error response.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifError {
    #[error("Request message format was not understood by the server")]
    BadRequest,

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    AccessDenied(String),

    #[error("Subscriptions require an authenticated connection")]
    Unauthorized,

    /// Raised by subscription validators; forwarded to the client verbatim.
    #[error("{message}")]
    Custom { name: String, message: String },
}

impl NotifError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn access_denied(reason: impl Into<String>) -> Self {
        Self::AccessDenied(reason.into())
    }

    pub fn custom(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Custom {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Value of the `error.name` field on the wire.
    pub fn name(&self) -> &str {
        match self {
            Self::BadRequest => "BadRequest",
            Self::NotFound(_) => "NotFound",
            Self::AccessDenied(_) => "AccessDenied",
            Self::Unauthorized => "Unauthorized",
            Self::Custom { name, .. } => name,
        }
    }

    pub fn descriptor(&self) -> ErrorDescriptor {
        ErrorDescriptor {
            name: self.name().to_string(),
            message: self.to_string(),
        }
    }
}

/// Errors raised by the pub/sub backbone client.
#[derive(Error, Debug)]
pub enum BackboneError {
    #[error("Redis connection error: {0}")]
    Connection(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Backbone closed")]
    Closed,
}

/// Process-level errors: wiring mistakes and startup failures.
#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("topic '{0}' already has a subscription validator")]
    TopicAlreadyRegistered(String),

    #[error("backbone error: {0}")]
    Backbone(#[from] BackboneError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

pub type BrokerResult<T> = Result<T, BrokerError>;
