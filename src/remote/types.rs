//! Identity, record, and error types exchanged with the remote service.
//!
//! DESIGN
//! ======
//! Shapes follow the hosted service's JSON so serde can decode responses
//! directly. Record writes go out as `serde_json::Map` payloads, which lets
//! partial updates carry only the fields the caller actually set.

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::format_description::well_known::Rfc3339;
use time::{Date, OffsetDateTime};

time::serde::format_description!(iso_date, Date, "[year]-[month]-[day]");

// =============================================================================
// ERROR
// =============================================================================

/// Errors produced by remote service calls.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// The request never produced a response (DNS, TLS, timeout, reset).
    #[error("request failed: {0}")]
    Request(String),

    /// The service answered with a status that has no more specific meaning.
    #[error("unexpected response: status {status}")]
    Response { status: u16, body: String },

    /// The response body could not be decoded.
    #[error("response parse failed: {0}")]
    Parse(String),

    /// The auth service rejected the email/password pair.
    #[error("invalid login credentials")]
    InvalidCredentials,

    /// The call requires a session the service does not recognize.
    #[error("not authenticated")]
    Unauthenticated,

    /// The service rejected one or more submitted fields.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The HTTP client could not be constructed.
    #[error("HTTP client build failed: {0}")]
    ClientBuild(String),
}

impl RemoteError {
    /// Whether retrying the same call later could succeed.
    #[must_use]
    pub fn retryable(&self) -> bool {
        matches!(self, Self::Request(_) | Self::Response { status: 429 | 500..=599, .. })
    }
}

// =============================================================================
// IDENTITY AND AUTH EVENTS
// =============================================================================

/// An authenticated user as reported by the auth service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    /// Opaque unique user identifier.
    pub id: String,
    /// Login email, when the account has one.
    #[serde(default)]
    pub email: Option<String>,
    /// Free-form profile metadata attached at sign-up or by later updates.
    #[serde(default)]
    pub user_metadata: Map<String, Value>,
}

/// Kind of session change pushed by the auth service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthEvent {
    InitialSession,
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
    PasswordRecovery,
}

/// One out-of-band session change.
#[derive(Clone, Debug, PartialEq)]
pub struct AuthChange {
    pub event: AuthEvent,
    pub identity: Option<Identity>,
}

// =============================================================================
// COLLECTIONS AND QUERIES
// =============================================================================

/// Record collections exposed by the data service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Collection {
    Tasks,
    Profiles,
}

impl Collection {
    /// Table name on the remote side.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tasks => "todos",
            Self::Profiles => "profiles",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Equality filters plus ordering for a record listing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecordQuery {
    /// `(column, value)` pairs that must all match.
    pub filters: Vec<(String, String)>,
    /// `(column, ascending)` sort keys, most significant first.
    pub order: Vec<(String, bool)>,
}

impl RecordQuery {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn eq(mut self, column: &str, value: impl fmt::Display) -> Self {
        self.filters.push((column.to_owned(), value.to_string()));
        self
    }

    #[must_use]
    pub fn order_by(mut self, column: &str, ascending: bool) -> Self {
        self.order.push((column.to_owned(), ascending));
        self
    }
}

// =============================================================================
// TASKS
// =============================================================================

/// Task urgency. Ordered `Low < Medium < High`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(format!("unknown priority `{other}` (expected low, medium or high)")),
        }
    }
}

/// A task record as stored remotely.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, with = "iso_date::option")]
    pub due_date: Option<Date>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    /// Owner identity id.
    pub user_id: String,
    #[serde(default)]
    pub is_shared: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Insert payload for a new task.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    pub priority: Priority,
    #[serde(with = "iso_date::option")]
    pub due_date: Option<Date>,
    pub tags: Option<Vec<String>>,
    pub user_id: String,
    pub is_shared: bool,
}

/// Partial task update. Only `Some` fields are sent.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TaskPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(skip_serializing_if = "Option::is_none", with = "iso_date::option")]
    pub due_date: Option<Date>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_shared: Option<bool>,
}

// =============================================================================
// PROFILES
// =============================================================================

/// A profile record. `id` equals the owning identity's id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub preferences: Option<Value>,
    #[serde(default)]
    pub is_verified: bool,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_login_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// User-editable profile fields. `email` is deliberately absent: it is fixed
/// once the account exists.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

impl ProfileUpdate {
    /// The fields that were set, keyed by column name.
    #[must_use]
    pub fn into_fields(self) -> Map<String, Value> {
        to_fields(&self)
    }
}

// =============================================================================
// HELPERS
// =============================================================================

/// Serialize a record payload into a field map. Non-object values map to an
/// empty payload.
pub fn to_fields<T: Serialize>(value: &T) -> Map<String, Value> {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

/// Decode one returned row into a typed record.
///
/// # Errors
///
/// [`RemoteError::Parse`] when the row does not have the expected shape.
pub fn decode_record<T: DeserializeOwned>(row: Value) -> Result<T, RemoteError> {
    serde_json::from_value(row).map_err(|e| RemoteError::Parse(e.to_string()))
}

/// Current UTC time as an RFC 3339 string, for `updated_at` stamps.
#[must_use]
pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default()
}

/// Add an `updated_at` stamp to a write payload.
pub fn stamp_updated_at(fields: &mut Map<String, Value>) {
    fields.insert("updated_at".to_owned(), Value::String(now_rfc3339()));
}

#[cfg(test)]
#[path = "types_test.rs"]
mod tests;
