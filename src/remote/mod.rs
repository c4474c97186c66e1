//! Remote auth/data service boundary.
//!
//! SYSTEM CONTEXT
//! ==============
//! The session store and the task/profile services only ever see the
//! [`RemoteService`] trait. `http` implements it against the hosted REST API;
//! tests substitute the in-crate mock.
//!
//! DESIGN
//! ======
//! Auth-change notifications are a broadcast channel. Each subscriber gets its
//! own receiver, so the store's watcher and any diagnostics tooling (the CLI
//! `watch` command) can listen side by side.

pub mod http;
#[cfg(test)]
pub(crate) mod mock;
pub mod types;

use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

pub use http::{HttpRemote, SessionTokens};
pub use types::{
    AuthChange, AuthEvent, Collection, Identity, NewTask, Priority, Profile, ProfileUpdate, RecordQuery,
    RemoteError, Task, TaskPatch,
};

const AUTH_CHANNEL_CAPACITY: usize = 32;

// =============================================================================
// SERVICE CONTRACT
// =============================================================================

/// Request/response contract of the hosted auth and record service.
#[async_trait::async_trait]
pub trait RemoteService: Send + Sync {
    /// Exchange an email/password pair for a session.
    ///
    /// # Errors
    ///
    /// [`RemoteError::InvalidCredentials`] when the pair is rejected, or a
    /// transport/response error.
    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Identity, RemoteError>;

    /// Register a new identity with the given user metadata.
    ///
    /// # Errors
    ///
    /// [`RemoteError::Rejected`] for malformed or duplicate emails and weak
    /// passwords, or a transport/response error.
    async fn sign_up(&self, email: &str, password: &str, metadata: Map<String, Value>)
    -> Result<Identity, RemoteError>;

    /// End the current session on the service.
    ///
    /// # Errors
    ///
    /// Returns the transport/response error; local credentials are dropped
    /// either way.
    async fn sign_out(&self) -> Result<(), RemoteError>;

    /// The identity behind the current session, or `None` when there is none.
    ///
    /// # Errors
    ///
    /// Only for failures to reach or understand the service; "no session" is
    /// `Ok(None)`.
    async fn get_current_user(&self) -> Result<Option<Identity>, RemoteError>;

    /// Open a new subscription to out-of-band session changes.
    fn on_auth_state_change(&self) -> AuthSubscription;

    /// Create or merge the profile record for `identity`.
    ///
    /// # Errors
    ///
    /// Returns the transport/response error.
    async fn upsert_profile_record(&self, identity: &Identity, fields: Map<String, Value>)
    -> Result<Value, RemoteError>;

    /// Patch one record by id, returning the updated row.
    ///
    /// # Errors
    ///
    /// [`RemoteError::Rejected`] when no visible row matches `id`.
    async fn update_record(&self, collection: Collection, id: &str, fields: Map<String, Value>)
    -> Result<Value, RemoteError>;

    /// List the rows matching `query`.
    ///
    /// # Errors
    ///
    /// Returns the transport/response error.
    async fn select_records(&self, collection: Collection, query: &RecordQuery) -> Result<Vec<Value>, RemoteError>;

    /// Fetch one row by id.
    ///
    /// # Errors
    ///
    /// Returns the transport/response error; a missing row is `Ok(None)`.
    async fn get_record(&self, collection: Collection, id: &str) -> Result<Option<Value>, RemoteError>;

    /// Insert a row, returning it as stored.
    ///
    /// # Errors
    ///
    /// Returns the transport/response error.
    async fn insert_record(&self, collection: Collection, fields: Map<String, Value>) -> Result<Value, RemoteError>;

    /// Delete one row by id.
    ///
    /// # Errors
    ///
    /// Returns the transport/response error.
    async fn delete_record(&self, collection: Collection, id: &str) -> Result<(), RemoteError>;
}

// =============================================================================
// AUTH CHANGE CHANNEL
// =============================================================================

/// Sending half of the auth-change broadcast, owned by a service client.
#[derive(Clone)]
pub struct AuthChannel {
    tx: broadcast::Sender<AuthChange>,
}

impl AuthChannel {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(AUTH_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish a change to every live subscription. No subscribers is fine.
    pub fn emit(&self, event: AuthEvent, identity: Option<Identity>) {
        let delivered = self.tx.send(AuthChange { event, identity }).unwrap_or(0);
        tracing::debug!(?event, delivered, "auth change emitted");
    }

    #[must_use]
    pub fn subscribe(&self) -> AuthSubscription {
        AuthSubscription { rx: self.tx.subscribe() }
    }
}

impl Default for AuthChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving half of one auth-change subscription.
pub struct AuthSubscription {
    rx: broadcast::Receiver<AuthChange>,
}

impl AuthSubscription {
    /// Wait for the next change. Returns `None` once the service client is
    /// gone. Changes missed because the receiver fell behind are skipped.
    pub async fn next(&mut self) -> Option<AuthChange> {
        loop {
            match self.rx.recv().await {
                Ok(change) => return Some(change),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "auth change subscription lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Stop receiving changes.
    pub fn unsubscribe(self) {}
}
