//! Error taxonomy for the orchestrator.
//!
//! - [`ValidationError`]: bad scenario or shock-event input, reported to the
//!   caller synchronously and never dispatched
//! - [`TransportError`]: channel failures; exhaustion fails every bound session
//! - [`ProviderError`]: remote computation failures, attached to one session
//! - [`StateError`]: illegal transition attempts; state is left unchanged
//!
//! [`RegistryError`] and [`CompareError`] cover lookups in the registries and
//! the comparison preconditions. Everything converges on [`Error`].

use crate::session::SessionStatus;
use crate::types::{ScenarioId, SessionId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, Error>;

/// Invalid scenario or shock-event input.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{field} = {value} is outside [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("{field} is required for {context}")]
    MissingField {
        field: &'static str,
        context: &'static str,
    },

    #[error("description is {0} characters, the limit is 200")]
    DescriptionTooLong(usize),

    #[error("no shock event at index {0}")]
    NoSuchEvent(usize),
}

impl ValidationError {
    /// Checks `value ∈ [min, max]`.
    pub fn check_range(field: &'static str, value: f64, min: f64, max: f64) -> std::result::Result<(), Self> {
        if value.is_nan() || value < min || value > max {
            return Err(Self::OutOfRange { field, value, min, max });
        }
        Ok(())
    }
}

/// Scenario Registry failures.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistryError {
    #[error("scenario id already exists: {0}")]
    DuplicateId(ScenarioId),

    #[error("scenario not found: {0}")]
    NotFound(ScenarioId),

    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Streamed channel failures.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    /// `send` was called while the channel was not in the Connected state.
    #[error("transport is not connected")]
    NotConnected,

    /// Reconnection gave up after the configured number of attempts.
    #[error("connection exhausted after {attempts} reconnect attempts")]
    ConnectionExhausted { attempts: u32 },

    /// The channel dropped and the session could not re-subscribe.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// A frame could not be sent on an established channel.
    #[error("channel error: {0}")]
    Channel(String),
}

/// Failure reported by the simulation provider.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
    /// The provider answered with an error; the message is kept verbatim.
    #[error("{0}")]
    Remote(String),

    /// The request never got an answer.
    #[error("request failed: {0}")]
    Request(String),

    /// The provider answered with something that is not a valid result.
    #[error("malformed result: {0}")]
    Malformed(String),
}

impl ProviderError {
    /// Creates a remote error.
    pub fn remote(msg: impl Into<String>) -> Self {
        Self::Remote(msg.into())
    }

    /// Creates a malformed-result error.
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        Self::Request(e.to_string())
    }
}

/// Illegal state-machine transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("cannot {action} a session that is {from}")]
    InvalidTransition {
        from: SessionStatus,
        action: &'static str,
    },
}

/// Comparison preconditions.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompareError {
    #[error("comparison needs at least 2 scenarios, got {0}")]
    InsufficientScenarios(usize),

    #[error("remote comparison accepts at most {max} scenarios, got {got}")]
    TooManyScenarios { got: usize, max: usize },

    #[error("session {0} is not completed")]
    NotReady(SessionId),

    #[error("session not found: {0}")]
    UnknownSession(SessionId),

    #[error("provider returned {got} results for {expected} scenarios")]
    ResultCountMismatch { expected: usize, got: usize },
}

/// Kind of failure attached to a session's `error` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionErrorKind {
    /// The provider failed the computation.
    Provider,
    /// The shared channel gave up reconnecting.
    ConnectionExhausted,
    /// The channel dropped and this session could not re-subscribe.
    ConnectionLost,
}

/// Error descriptor stored on a failed session for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionError {
    pub kind: SessionErrorKind,
    pub message: String,
}

impl SessionError {
    /// Provider failure with the provider's message kept verbatim.
    pub fn provider(message: impl Into<String>) -> Self {
        Self {
            kind: SessionErrorKind::Provider,
            message: message.into(),
        }
    }

    /// Builds the descriptor for a transport failure.
    pub fn transport(err: &TransportError) -> Self {
        let kind = match err {
            TransportError::ConnectionExhausted { .. } => SessionErrorKind::ConnectionExhausted,
            _ => SessionErrorKind::ConnectionLost,
        };
        Self {
            kind,
            message: err.to_string(),
        }
    }
}

impl From<&ProviderError> for SessionError {
    fn from(err: &ProviderError) -> Self {
        match err {
            ProviderError::Remote(msg) => Self::provider(msg.clone()),
            other => Self::provider(other.to_string()),
        }
    }
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Top-level error for the orchestrator API.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("state error: {0}")]
    State(#[from] StateError),

    #[error("compare error: {0}")]
    Compare(#[from] CompareError),
}
