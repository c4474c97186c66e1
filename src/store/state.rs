//! Observable session state and the store's failure taxonomy.

use serde_json::{Map, Value};

use crate::remote::{Identity, RemoteError};

// =============================================================================
// ERROR
// =============================================================================

/// Why a store action failed. Stored in [`StoreState::error`] and returned
/// from the action.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("service unavailable: {0}")]
    RemoteUnavailable(String),
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("you need to sign in first")]
    Unauthenticated,
    #[error("{0}")]
    ValidationRejected(String),
}

impl StoreError {
    /// Stable machine-readable name of the failure.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RemoteUnavailable(_) => "RemoteUnavailable",
            Self::InvalidCredentials => "InvalidCredentials",
            Self::Unauthenticated => "Unauthenticated",
            Self::ValidationRejected(_) => "ValidationRejected",
        }
    }
}

impl From<RemoteError> for StoreError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::InvalidCredentials => Self::InvalidCredentials,
            RemoteError::Unauthenticated => Self::Unauthenticated,
            RemoteError::Rejected(msg) => Self::ValidationRejected(msg),
            RemoteError::Request(_)
            | RemoteError::Response { .. }
            | RemoteError::Parse(_)
            | RemoteError::ClientBuild(_) => Self::RemoteUnavailable(err.to_string()),
        }
    }
}

/// Outcome of a store action.
pub type ActionResult = Result<(), StoreError>;

// =============================================================================
// SESSION
// =============================================================================

/// The authenticated identity known to this process. Always has an id.
#[derive(Clone, Debug, PartialEq)]
pub struct Session {
    id: String,
    email: Option<String>,
    metadata: Map<String, Value>,
}

impl Session {
    /// Build a session. Returns `None` for an empty id.
    #[must_use]
    pub fn new(id: impl Into<String>, email: Option<String>, metadata: Map<String, Value>) -> Option<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return None;
        }
        Some(Self { id, email, metadata })
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    #[must_use]
    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    /// A string metadata value, ignoring blanks.
    #[must_use]
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .and_then(Value::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    /// Overwrite the given keys, leaving all others intact.
    pub fn merge_metadata(&mut self, fields: Map<String, Value>) {
        self.metadata.extend(fields);
    }
}

impl TryFrom<Identity> for Session {
    type Error = StoreError;

    fn try_from(identity: Identity) -> Result<Self, Self::Error> {
        Self::new(identity.id, identity.email, identity.user_metadata)
            .ok_or_else(|| StoreError::RemoteUnavailable("auth service returned an identity without an id".into()))
    }
}

impl From<&Session> for Identity {
    fn from(session: &Session) -> Self {
        Self { id: session.id.clone(), email: session.email.clone(), user_metadata: session.metadata.clone() }
    }
}

// =============================================================================
// STATE
// =============================================================================

/// Everything observers can see.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StoreState {
    pub session: Option<Session>,
    pub loading: bool,
    pub error: Option<StoreError>,
}

impl StoreState {
    /// Startup state before the first check has resolved.
    #[must_use]
    pub fn unknown() -> Self {
        Self { session: None, loading: true, error: None }
    }

    /// Startup state with an identity already known.
    #[must_use]
    pub fn authenticated(session: Session) -> Self {
        Self { session: Some(session), loading: false, error: None }
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.session.is_some()
    }

    /// Human-readable error text for inline display.
    #[must_use]
    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(ToString::to_string)
    }
}

/// Coarse lifecycle position of the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// No check has resolved yet.
    Unknown,
    Authenticated,
    Anonymous,
}

#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
