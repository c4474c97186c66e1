//! Profile records for the signed-in user.
//!
//! A profile is normally written right after sign-up, but that write is
//! allowed to fail. [`ProfileService::load`] therefore creates the record on
//! first access when it is missing.

use serde_json::{Map, Value};

use crate::remote::types::{decode_record, stamp_updated_at};
use crate::remote::{Collection, Identity, Profile, ProfileUpdate};
use crate::store::{Session, SessionStore, StoreError};

/// Profile operations on behalf of the store's current session.
#[derive(Clone)]
pub struct ProfileService {
    store: SessionStore,
}

impl ProfileService {
    #[must_use]
    pub fn new(store: SessionStore) -> Self {
        Self { store }
    }

    fn owner(&self) -> Result<Session, StoreError> {
        self.store.session().ok_or(StoreError::Unauthenticated)
    }

    /// Fetch the session's profile, creating it if it does not exist yet.
    ///
    /// # Errors
    ///
    /// [`StoreError::Unauthenticated`] without a session, or the remote
    /// failure.
    pub async fn load(&self) -> Result<Profile, StoreError> {
        let owner = self.owner()?;
        let remote = self.store.remote();
        if let Some(row) = remote.get_record(Collection::Profiles, owner.id()).await? {
            return Ok(decode_record(row)?);
        }

        tracing::info!(user_id = %owner.id(), "profile missing; creating it");
        let mut fields = Map::new();
        fields.insert("email".to_owned(), Value::String(owner.email().unwrap_or_default().to_owned()));
        if let Some(full_name) = owner.metadata_str("full_name") {
            fields.insert("full_name".to_owned(), Value::String(full_name.to_owned()));
        }
        fields.insert("is_verified".to_owned(), Value::Bool(false));
        let row = remote.upsert_profile_record(&Identity::from(&owner), fields).await?;
        Ok(decode_record(row)?)
    }

    /// Save the editable fields and return the stored profile. The session's
    /// metadata picks up the same fields.
    ///
    /// # Errors
    ///
    /// Same as [`ProfileService::load`] and [`SessionStore::update_profile`].
    pub async fn save(&self, update: ProfileUpdate) -> Result<Profile, StoreError> {
        self.load().await?;
        self.store.update_profile(update).await?;
        self.load().await
    }

    /// Replace the free-form preferences document.
    ///
    /// # Errors
    ///
    /// [`StoreError::Unauthenticated`] without a session, or the remote
    /// failure.
    pub async fn set_preferences(&self, preferences: Value) -> Result<Profile, StoreError> {
        let owner = self.owner()?;
        self.load().await?;
        let mut fields = Map::new();
        fields.insert("preferences".to_owned(), preferences);
        stamp_updated_at(&mut fields);
        let row = self
            .store
            .remote()
            .update_record(Collection::Profiles, owner.id(), fields)
            .await?;
        Ok(decode_record(row)?)
    }
}

/// Name to greet the user by: display name, then full name, then email, then
/// the raw id.
#[must_use]
pub fn display_name(session: &Session) -> String {
    session
        .metadata_str("display_name")
        .or_else(|| session.metadata_str("full_name"))
        .or_else(|| session.email())
        .unwrap_or_else(|| session.id())
        .to_owned()
}

#[cfg(test)]
#[path = "profile_test.rs"]
mod tests;
