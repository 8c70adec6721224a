//! Error types shared by the challenge services.
//!
//! `ClientError` is what a hosting-platform call can fail with. `ChallengeError`
//! is what the challenge operations surface to their callers, and carries the
//! HTTP status the server layer should answer with.

use serde_json::Value;
use thiserror::Error;

/// Failure of a single remote call against the hosting platform.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// The platform answered with a non-success status.
    #[error("GitHub API error: {status} - {message}")]
    Api {
        status: u16,
        message: String,
        details: Option<Value>,
    },

    /// The resource being created already exists (e.g. a tag or repository name).
    #[error("Already exists: {resource}")]
    AlreadyExists { resource: String },

    /// The referenced resource does not exist.
    #[error("Not found: {resource}")]
    NotFound { resource: String },

    /// The request never got a response.
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// The response could not be decoded.
    #[error("Failed to decode response: {message}")]
    Decode { message: String },
}

impl ClientError {
    #[inline]
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
            details: None,
        }
    }

    #[inline]
    pub fn already_exists(resource: impl Into<String>) -> Self {
        Self::AlreadyExists {
            resource: resource.into(),
        }
    }

    #[inline]
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    #[inline]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// True when the call lost a name collision (tag or repository).
    #[inline]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    /// Remote status code, if the platform answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::AlreadyExists { .. } => Some(422),
            Self::NotFound { .. } => Some(404),
            Self::Transport { .. } | Self::Decode { .. } => None,
        }
    }

    fn details(&self) -> Option<Value> {
        match self {
            Self::Api { details, .. } => details.clone(),
            _ => None,
        }
    }
}

/// Errors surfaced by challenge operations.
#[derive(Debug, Clone, Error)]
pub enum ChallengeError {
    /// Bad request shape or content; the caller can fix it.
    #[error("{message}")]
    ClientInput {
        message: String,
        details: Option<Value>,
    },

    /// Missing or invalid credentials or signature.
    #[error("{message}")]
    Auth { message: String },

    /// The referenced challenge is not a managed repository.
    #[error("{message}")]
    NotFound { message: String },

    /// The hosting platform rejected a call.
    #[error("{message}")]
    RemoteApi {
        status: Option<u16>,
        message: String,
        details: Option<Value>,
    },
}

impl ChallengeError {
    #[inline]
    pub fn client_input(message: impl Into<String>) -> Self {
        Self::ClientInput {
            message: message.into(),
            details: None,
        }
    }

    #[inline]
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }

    #[inline]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// HTTP status the server should answer with.
    ///
    /// Remote errors keep the platform's status when it is an error code,
    /// otherwise they become 502.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::ClientInput { .. } => 400,
            Self::Auth { .. } => 401,
            Self::NotFound { .. } => 404,
            Self::RemoteApi { status, .. } => match status {
                Some(code) if (400..600).contains(code) => *code,
                _ => 502,
            },
        }
    }

    pub fn details(&self) -> Option<&Value> {
        match self {
            Self::ClientInput { details, .. } | Self::RemoteApi { details, .. } => {
                details.as_ref()
            }
            _ => None,
        }
    }
}

impl From<ClientError> for ChallengeError {
    fn from(err: ClientError) -> Self {
        Self::RemoteApi {
            status: err.status(),
            details: err.details(),
            message: err.to_string(),
        }
    }
}
