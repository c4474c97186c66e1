use std::sync::Arc;

use serde_json::json;

use super::*;
use crate::remote::RemoteError;
use crate::remote::mock::{MockRemote, Op};

fn metadata(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap()
}

fn session(meta: Value) -> Session {
    Session::new("u1", Some("a@b.com".into()), metadata(meta)).unwrap()
}

fn profile_row() -> Value {
    json!({
        "id": "u1",
        "email": "a@b.com",
        "full_name": "Alice",
        "is_verified": true,
        "created_at": "2026-01-01T00:00:00Z",
        "updated_at": "2026-01-01T00:00:00Z",
    })
}

fn service(remote: &Arc<MockRemote>, meta: Value) -> (ProfileService, SessionStore) {
    let store = SessionStore::new(remote.clone(), Some(session(meta)));
    (ProfileService::new(store.clone()), store)
}

#[tokio::test]
async fn load_returns_existing_profile() {
    let remote = Arc::new(MockRemote::new());
    remote.seed(Collection::Profiles, profile_row());
    let (profiles, _) = service(&remote, json!({}));

    let profile = profiles.load().await.unwrap();
    assert_eq!(profile.full_name.as_deref(), Some("Alice"));
    assert!(profile.is_verified);
    assert_eq!(remote.call_count(Op::UpsertProfile), 0);
}

#[tokio::test]
async fn load_creates_missing_profile_from_session() {
    let remote = Arc::new(MockRemote::new());
    let (profiles, _) = service(&remote, json!({ "full_name": "Bob" }));

    let profile = profiles.load().await.unwrap();
    assert_eq!(profile.id, "u1");
    assert_eq!(profile.email, "a@b.com");
    assert_eq!(profile.full_name.as_deref(), Some("Bob"));
    assert!(!profile.is_verified);
    assert_eq!(remote.records(Collection::Profiles).len(), 1);

    profiles.load().await.unwrap();
    assert_eq!(remote.call_count(Op::UpsertProfile), 1);
}

#[tokio::test]
async fn load_without_session_is_unauthenticated() {
    let remote = Arc::new(MockRemote::new());
    let profiles = ProfileService::new(SessionStore::new(remote.clone(), None));
    assert_eq!(profiles.load().await.unwrap_err(), StoreError::Unauthenticated);
    assert!(remote.calls().is_empty());
}

#[tokio::test]
async fn save_writes_fields_and_updates_session() {
    let remote = Arc::new(MockRemote::new());
    remote.seed(Collection::Profiles, profile_row());
    let (profiles, store) = service(&remote, json!({ "full_name": "Alice" }));

    let update = ProfileUpdate {
        display_name: Some("Al".into()),
        timezone: Some("Asia/Seoul".into()),
        ..ProfileUpdate::default()
    };
    let profile = profiles.save(update).await.unwrap();
    assert_eq!(profile.display_name.as_deref(), Some("Al"));
    assert_eq!(profile.timezone.as_deref(), Some("Asia/Seoul"));
    assert_eq!(profile.full_name.as_deref(), Some("Alice"));

    let session = store.session().unwrap();
    assert_eq!(session.metadata_str("display_name"), Some("Al"));
    assert_eq!(display_name(&session), "Al");
}

#[tokio::test]
async fn save_heals_missing_profile_first() {
    let remote = Arc::new(MockRemote::new());
    let (profiles, _) = service(&remote, json!({}));

    let update = ProfileUpdate { bio: Some("hello".into()), ..ProfileUpdate::default() };
    let profile = profiles.save(update).await.unwrap();
    assert_eq!(profile.bio.as_deref(), Some("hello"));
}

#[tokio::test]
async fn save_failure_is_stored_on_the_store() {
    let remote = Arc::new(MockRemote::new());
    remote.seed(Collection::Profiles, profile_row());
    remote.fail(Op::UpdateRecord, RemoteError::Rejected("bio too long".into()));
    let (profiles, store) = service(&remote, json!({}));

    let update = ProfileUpdate { bio: Some("x".into()), ..ProfileUpdate::default() };
    let err = profiles.save(update).await.unwrap_err();
    assert_eq!(err, StoreError::ValidationRejected("bio too long".into()));
    assert_eq!(store.state().error, Some(err));
}

#[tokio::test]
async fn set_preferences_replaces_document() {
    let remote = Arc::new(MockRemote::new());
    remote.seed(Collection::Profiles, profile_row());
    let (profiles, _) = service(&remote, json!({}));

    let profile = profiles.set_preferences(json!({ "theme": "dark" })).await.unwrap();
    assert_eq!(profile.preferences, Some(json!({ "theme": "dark" })));
}

#[test]
fn display_name_falls_back_in_order() {
    let full = session(json!({ "display_name": "Al", "full_name": "Alice" }));
    assert_eq!(display_name(&full), "Al");

    let named = session(json!({ "full_name": "Alice", "display_name": " " }));
    assert_eq!(display_name(&named), "Alice");

    assert_eq!(display_name(&session(json!({}))), "a@b.com");

    let bare = Session::new("u9", None, Map::new()).unwrap();
    assert_eq!(display_name(&bare), "u9");
}
