//! Error types for the Delve domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error type; [`Error`] is the run-level
//! surface and only carries what can escape a research run.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ModelRole;

/// The top-level error type for Delve operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Model errors ---
    #[error("Model error: {0}")]
    Model(#[from] ModelFailure),

    // --- Search errors ---
    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    // --- Configuration errors (fatal, raised before any unit is dispatched) ---
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    // --- Report synthesis failed after retries ---
    #[error("Report synthesis failed: {reason}")]
    SynthesisFailed {
        reason: String,
        /// The aggregate digest rendered as plain text, usable as a degraded answer.
        fallback: String,
    },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Wire-level failures reported by a [`Provider`](crate::provider::Provider).
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl ProviderError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Timeout(_) | Self::Network(_) => true,
            Self::ApiError { status_code, .. } => *status_code >= 500,
            _ => false,
        }
    }
}

/// How a model call failed, independent of the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFailureKind {
    RateLimited,
    MalformedOutput,
    Unavailable,
}

/// A failed call to a role-bound language model.
#[derive(Debug, Clone, Error)]
#[error("{role} model {kind:?}: {message}")]
pub struct ModelFailure {
    pub role: ModelRole,
    pub kind: ModelFailureKind,
    pub message: String,
    /// Whether the retry policy should try again.
    pub transient: bool,
}

impl ModelFailure {
    /// Classify a provider error for the given role.
    pub fn from_provider(role: ModelRole, err: &ProviderError) -> Self {
        let kind = match err {
            ProviderError::RateLimited { .. } => ModelFailureKind::RateLimited,
            ProviderError::MalformedResponse(_) => ModelFailureKind::MalformedOutput,
            _ => ModelFailureKind::Unavailable,
        };
        Self {
            role,
            kind,
            message: err.to_string(),
            transient: err.is_transient(),
        }
    }

    /// The model answered, but not in the shape the caller asked for.
    pub fn malformed(role: ModelRole, message: impl Into<String>) -> Self {
        Self {
            role,
            kind: ModelFailureKind::MalformedOutput,
            message: message.into(),
            transient: false,
        }
    }
}

/// Failures reported by a [`SearchProvider`](crate::search::SearchProvider).
#[derive(Debug, Clone, Error)]
pub enum SearchError {
    #[error("Transient search failure: {0}")]
    Transient(String),

    #[error("Search failed: {0}")]
    Permanent(String),

    #[error("Search backend not configured: {0}")]
    NotConfigured(String),
}

impl SearchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}
