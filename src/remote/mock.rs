//! Scriptable in-memory [`RemoteService`] for tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};
use tokio::sync::{Notify, Semaphore};

use super::types::{AuthEvent, Collection, Identity, RecordQuery, RemoteError};
use super::{AuthChannel, AuthSubscription, RemoteService};

/// Remote operations the mock can count or fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Op {
    SignIn,
    SignUp,
    SignOut,
    CurrentUser,
    UpsertProfile,
    UpdateRecord,
    Select,
    GetRecord,
    Insert,
    Delete,
}

/// Holds `get_current_user` calls until released. The identity a held call
/// returns is captured before it starts waiting.
#[derive(Clone)]
pub struct LookupGate {
    started: Arc<Notify>,
    permits: Arc<Semaphore>,
}

impl LookupGate {
    /// Wait until a lookup is parked on the gate.
    pub async fn started(&self) {
        self.started.notified().await;
    }

    /// Let one parked lookup finish.
    pub fn release_one(&self) {
        self.permits.add_permits(1);
    }
}

#[derive(Default)]
struct Inner {
    accounts: HashMap<String, (String, Identity)>,
    current: Option<Identity>,
    failures: HashMap<Op, RemoteError>,
    calls: Vec<Op>,
    records: HashMap<Collection, Vec<Value>>,
    gate: Option<LookupGate>,
    lookup_metadata: Map<String, Value>,
    next_id: u64,
}

pub struct MockRemote {
    inner: Mutex<Inner>,
    /// `None` once the service has closed its auth-change stream.
    changes: Mutex<Option<AuthChannel>>,
}

impl Default for MockRemote {
    fn default() -> Self {
        Self { inner: Mutex::default(), changes: Mutex::new(Some(AuthChannel::new())) }
    }
}

impl MockRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an account that `sign_in_with_password` accepts.
    pub fn with_account(self, email: &str, password: &str, id: &str) -> Self {
        let identity = Identity { id: id.to_owned(), email: Some(email.to_owned()), user_metadata: Map::new() };
        self.lock().accounts.insert(email.to_owned(), (password.to_owned(), identity));
        self
    }

    /// Pretend a session already exists upstream.
    pub fn with_current_user(self, identity: Identity) -> Self {
        self.lock().current = Some(identity);
        self
    }

    /// Make every later call of `op` fail with `err`.
    pub fn fail(&self, op: Op, err: RemoteError) {
        self.lock().failures.insert(op, err);
    }

    pub fn clear_failure(&self, op: Op) {
        self.lock().failures.remove(&op);
    }

    pub fn set_current_user(&self, identity: Option<Identity>) {
        self.lock().current = identity;
    }

    /// Metadata that only a fresh lookup reports, not the login response.
    pub fn enrich_lookups(&self, key: &str, value: Value) {
        self.lock().lookup_metadata.insert(key.to_owned(), value);
    }

    pub fn hold_lookups(&self) -> LookupGate {
        let gate = LookupGate { started: Arc::new(Notify::new()), permits: Arc::new(Semaphore::new(0)) };
        self.lock().gate = Some(gate.clone());
        gate
    }

    pub fn calls(&self) -> Vec<Op> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self, op: Op) -> usize {
        self.lock().calls.iter().filter(|c| **c == op).count()
    }

    pub fn records(&self, collection: Collection) -> Vec<Value> {
        self.lock().records.get(&collection).cloned().unwrap_or_default()
    }

    pub fn seed(&self, collection: Collection, record: Value) {
        self.lock().records.entry(collection).or_default().push(record);
    }

    /// Push an auth change as if the service announced it.
    pub fn emit(&self, event: AuthEvent, identity: Option<Identity>) {
        if let Some(changes) = self.changes.lock().unwrap().as_ref() {
            changes.emit(event, identity);
        }
    }

    /// End the auth-change stream for every current subscriber.
    pub fn close_auth_changes(&self) {
        self.changes.lock().unwrap().take();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    /// Record the call and return the scripted failure, if any.
    fn enter(&self, op: Op) -> Result<(), RemoteError> {
        let mut inner = self.lock();
        inner.calls.push(op);
        inner.failures.get(&op).cloned().map_or(Ok(()), Err)
    }

    fn next_id(&self, prefix: &str) -> String {
        let mut inner = self.lock();
        inner.next_id += 1;
        format!("{prefix}-{}", inner.next_id)
    }
}

fn matches_filter(record: &Value, column: &str, expected: &str) -> bool {
    match record.get(column) {
        Some(Value::String(s)) => s == expected,
        Some(Value::Null) | None => false,
        Some(other) => other.to_string() == expected,
    }
}

#[async_trait::async_trait]
impl RemoteService for MockRemote {
    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Identity, RemoteError> {
        self.enter(Op::SignIn)?;
        let identity = {
            let mut inner = self.lock();
            let identity = match inner.accounts.get(email) {
                Some((expected, identity)) if expected == password => identity.clone(),
                _ => return Err(RemoteError::InvalidCredentials),
            };
            inner.current = Some(identity.clone());
            identity
        };
        self.emit(AuthEvent::SignedIn, Some(identity.clone()));
        Ok(identity)
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: Map<String, Value>,
    ) -> Result<Identity, RemoteError> {
        self.enter(Op::SignUp)?;
        if !email.contains('@') {
            return Err(RemoteError::Rejected("Unable to validate email address: invalid format".into()));
        }
        let id = self.next_id("user");
        let identity = Identity { id, email: Some(email.to_owned()), user_metadata: metadata };
        self.lock()
            .accounts
            .insert(email.to_owned(), (password.to_owned(), identity.clone()));
        Ok(identity)
    }

    async fn sign_out(&self) -> Result<(), RemoteError> {
        let outcome = self.enter(Op::SignOut);
        self.lock().current = None;
        self.emit(AuthEvent::SignedOut, None);
        outcome
    }

    async fn get_current_user(&self) -> Result<Option<Identity>, RemoteError> {
        self.enter(Op::CurrentUser)?;
        let (current, gate) = {
            let inner = self.lock();
            let current = inner.current.clone().map(|mut identity| {
                identity.user_metadata.extend(inner.lookup_metadata.clone());
                identity
            });
            (current, inner.gate.clone())
        };
        if let Some(gate) = gate {
            gate.started.notify_one();
            gate.permits.acquire().await.unwrap().forget();
        }
        Ok(current)
    }

    fn on_auth_state_change(&self) -> AuthSubscription {
        match self.changes.lock().unwrap().as_ref() {
            Some(changes) => changes.subscribe(),
            None => AuthChannel::new().subscribe(),
        }
    }

    async fn upsert_profile_record(
        &self,
        identity: &Identity,
        mut fields: Map<String, Value>,
    ) -> Result<Value, RemoteError> {
        self.enter(Op::UpsertProfile)?;
        fields.insert("id".to_owned(), Value::String(identity.id.clone()));
        fields
            .entry("created_at")
            .or_insert_with(|| Value::String("2026-01-01T00:00:00Z".into()));
        fields
            .entry("updated_at")
            .or_insert_with(|| Value::String("2026-01-01T00:00:00Z".into()));
        let mut inner = self.lock();
        let rows = inner.records.entry(Collection::Profiles).or_default();
        let merged = match rows.iter_mut().find(|r| r["id"] == identity.id.as_str()) {
            Some(Value::Object(existing)) => {
                existing.extend(fields);
                Value::Object(existing.clone())
            }
            _ => {
                let row = Value::Object(fields);
                rows.push(row.clone());
                row
            }
        };
        Ok(merged)
    }

    async fn update_record(
        &self,
        collection: Collection,
        id: &str,
        fields: Map<String, Value>,
    ) -> Result<Value, RemoteError> {
        self.enter(Op::UpdateRecord)?;
        let mut inner = self.lock();
        let rows = inner.records.entry(collection).or_default();
        match rows.iter_mut().find(|r| r["id"] == id) {
            Some(Value::Object(existing)) => {
                existing.extend(fields);
                Ok(Value::Object(existing.clone()))
            }
            _ => Err(RemoteError::Rejected(format!("no {collection} record with id {id}"))),
        }
    }

    async fn select_records(&self, collection: Collection, query: &RecordQuery) -> Result<Vec<Value>, RemoteError> {
        self.enter(Op::Select)?;
        let inner = self.lock();
        let rows = inner.records.get(&collection).cloned().unwrap_or_default();
        Ok(rows
            .into_iter()
            .filter(|row| query.filters.iter().all(|(c, v)| matches_filter(row, c, v)))
            .collect())
    }

    async fn get_record(&self, collection: Collection, id: &str) -> Result<Option<Value>, RemoteError> {
        self.enter(Op::GetRecord)?;
        let inner = self.lock();
        Ok(inner
            .records
            .get(&collection)
            .and_then(|rows| rows.iter().find(|r| r["id"] == id).cloned()))
    }

    async fn insert_record(&self, collection: Collection, mut fields: Map<String, Value>) -> Result<Value, RemoteError> {
        self.enter(Op::Insert)?;
        let id = self.next_id(collection.as_str());
        fields.insert("id".to_owned(), Value::String(id));
        fields
            .entry("completed")
            .or_insert(Value::Bool(false));
        fields
            .entry("created_at")
            .or_insert_with(|| Value::String("2026-01-01T00:00:00Z".into()));
        fields
            .entry("updated_at")
            .or_insert_with(|| Value::String("2026-01-01T00:00:00Z".into()));
        let row = Value::Object(fields);
        self.lock().records.entry(collection).or_default().push(row.clone());
        Ok(row)
    }

    async fn delete_record(&self, collection: Collection, id: &str) -> Result<(), RemoteError> {
        self.enter(Op::Delete)?;
        if let Some(rows) = self.lock().records.get_mut(&collection) {
            rows.retain(|r| r["id"] != id);
        }
        Ok(())
    }
}
