//! Session state store: the one owner of "who is signed in".
//!
//! SYSTEM CONTEXT
//! ==============
//! Route guards, the task and profile services, and the CLI read identity
//! from here and call the action methods; none of them talk to the auth API
//! directly. The composition root builds one [`SessionStore`] and hands out
//! clones.
//!
//! DESIGN
//! ======
//! State sits behind a `std::sync::Mutex` that is never held across an
//! `.await`: each action takes a ticket, suspends on the remote call, then
//! applies its result in one synchronous step and notifies subscribers after
//! the lock is released.
//!
//! `loading` is derived from an in-flight counter so overlapping actions keep
//! it raised until the last one settles. Sign-out bumps an epoch at its
//! completion point and resets the counter; results carrying an older epoch
//! are dropped, so a slow `check_auth` cannot resurrect a signed-out session.
//!
//! ERROR HANDLING
//! ==============
//! Every action converts remote failures into a [`StoreError`], stores it in
//! `error`, and returns it. Sign-out is the only fail-open action.

pub mod state;
mod watch;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::sync::atomic::AtomicBool;

use serde_json::{Map, Value};

use crate::remote::{Collection, ProfileUpdate, RemoteService, types::stamp_updated_at};
pub use state::{ActionResult, Phase, Session, StoreError, StoreState};
pub use watch::AuthWatcher;

type Listener = Arc<dyn Fn(&StoreState) + Send + Sync>;

// =============================================================================
// INTERNALS
// =============================================================================

struct Cell {
    state: StoreState,
    /// Actions started under the current epoch that have not settled.
    pending: usize,
    epoch: u64,
    /// Set once any action has settled or an identity was injected.
    resolved: bool,
    /// One-shot: skip the mount-time check for an injected identity.
    skip_mount_check: bool,
}

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: Vec<(u64, Listener)>,
}

struct Inner {
    remote: Arc<dyn RemoteService>,
    cell: Mutex<Cell>,
    listeners: Mutex<Listeners>,
    watching: AtomicBool,
}

/// Proof that an action started; carries the epoch it started under.
#[derive(Clone, Copy, Debug)]
struct Ticket {
    epoch: u64,
}

// =============================================================================
// STORE
// =============================================================================

/// Shared handle to the session state. Cloning is cheap; all clones see the
/// same state.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<Inner>,
}

impl SessionStore {
    /// Create a store. With `initial` set, the store starts authenticated and
    /// not loading, and the first [`SessionStore::mount`] skips its check.
    #[must_use]
    pub fn new(remote: Arc<dyn RemoteService>, initial: Option<Session>) -> Self {
        let known = initial.is_some();
        let state = initial.map_or_else(StoreState::unknown, StoreState::authenticated);
        let cell = Cell { state, pending: 0, epoch: 0, resolved: known, skip_mount_check: known };
        Self {
            inner: Arc::new(Inner {
                remote,
                cell: Mutex::new(cell),
                listeners: Mutex::new(Listeners::default()),
                watching: AtomicBool::new(false),
            }),
        }
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn state(&self) -> StoreState {
        self.cell().state.clone()
    }

    #[must_use]
    pub fn session(&self) -> Option<Session> {
        self.cell().state.session.clone()
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        let cell = self.cell();
        if cell.state.session.is_some() {
            Phase::Authenticated
        } else if cell.resolved {
            Phase::Anonymous
        } else {
            Phase::Unknown
        }
    }

    /// The service this store talks to, for record access on behalf of the
    /// current session.
    pub(crate) fn remote(&self) -> &Arc<dyn RemoteService> {
        &self.inner.remote
    }

    /// Register `listener` to run after every committed state change.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&StoreState) + Send + Sync + 'static,
    {
        let mut listeners = lock(&self.inner.listeners);
        listeners.next_id += 1;
        let id = listeners.next_id;
        listeners.entries.push((id, Arc::new(listener)));
        Subscription { store: Arc::downgrade(&self.inner), id }
    }

    // -------------------------------------------------------------------------
    // Actions
    // -------------------------------------------------------------------------

    /// Mount-time check. Skipped once when the store was created with a known
    /// identity.
    ///
    /// # Errors
    ///
    /// Same as [`SessionStore::check_auth`].
    pub async fn mount(&self) -> ActionResult {
        let skip = std::mem::take(&mut self.cell().skip_mount_check);
        if skip {
            tracing::debug!("identity already known; skipping mount check");
            return Ok(());
        }
        self.check_auth().await
    }

    /// Ask the service who is signed in and adopt the answer.
    ///
    /// # Errors
    ///
    /// Returns the failure when the service could not be asked; the store is
    /// left signed out in that case.
    pub async fn check_auth(&self) -> ActionResult {
        let ticket = self.begin();
        let outcome = self
            .inner
            .remote
            .get_current_user()
            .await
            .map_err(StoreError::from)
            .and_then(|user| user.map(Session::try_from).transpose());

        match outcome {
            Ok(session) => {
                self.settle(ticket, |state| {
                    state.session = session;
                    state.error = None;
                });
                Ok(())
            }
            Err(err) => {
                tracing::warn!(error = %err, "auth check failed");
                self.settle(ticket, |state| {
                    state.session = None;
                    state.error = Some(err.clone());
                });
                Err(err)
            }
        }
    }

    /// Sign in with email and password, then refresh the session from the
    /// service so profile metadata is current.
    ///
    /// # Errors
    ///
    /// [`StoreError::InvalidCredentials`] for a rejected pair, or the remote
    /// failure. The session is left as it was on error.
    pub async fn sign_in(&self, email: &str, password: &str) -> ActionResult {
        let ticket = self.begin();
        let outcome = self
            .inner
            .remote
            .sign_in_with_password(email, password)
            .await
            .map_err(StoreError::from)
            .and_then(Session::try_from);

        let session = match outcome {
            Ok(session) => session,
            Err(err) => {
                tracing::info!(error = %err, "sign-in failed");
                self.settle(ticket, |state| state.error = Some(err.clone()));
                return Err(err);
            }
        };

        let user_id = session.id().to_owned();
        if !self.apply(ticket, |state| state.session = Some(session)) {
            tracing::debug!(%user_id, "sign-in superseded by sign-out");
            return Ok(());
        }

        // The login response may lack fields only a fresh lookup carries.
        let refreshed = match self.inner.remote.get_current_user().await {
            Ok(Some(identity)) => Session::try_from(identity).ok(),
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(error = %err, %user_id, "post sign-in refresh failed; keeping login identity");
                None
            }
        };
        self.settle(ticket, |state| {
            if let Some(session) = refreshed {
                state.session = Some(session);
            }
            state.error = None;
        });
        tracing::info!(%user_id, "signed in");
        Ok(())
    }

    /// Register a new account and seed its profile record. Does not sign in.
    ///
    /// A failed profile write is logged and tolerated: the identity exists
    /// upstream, and the profile is created on first access instead.
    ///
    /// # Errors
    ///
    /// [`StoreError::ValidationRejected`] for refused input, or the remote
    /// failure.
    pub async fn sign_up(&self, email: &str, password: &str, display_name: &str) -> ActionResult {
        let ticket = self.begin();
        let mut metadata = Map::new();
        metadata.insert("full_name".to_owned(), Value::String(display_name.to_owned()));

        let identity = match self.inner.remote.sign_up(email, password, metadata).await {
            Ok(identity) => identity,
            Err(err) => {
                let err = StoreError::from(err);
                tracing::info!(error = %err, "sign-up failed");
                self.settle(ticket, |state| state.error = Some(err.clone()));
                return Err(err);
            }
        };

        let mut fields = Map::new();
        let profile_email = identity.email.clone().unwrap_or_else(|| email.to_owned());
        fields.insert("email".to_owned(), Value::String(profile_email));
        fields.insert("full_name".to_owned(), Value::String(display_name.to_owned()));
        fields.insert("is_verified".to_owned(), Value::Bool(false));
        if let Err(err) = self.inner.remote.upsert_profile_record(&identity, fields).await {
            tracing::error!(error = %err, user_id = %identity.id, "profile creation after sign-up failed");
        }

        self.settle(ticket, |state| state.error = None);
        tracing::info!(user_id = %identity.id, "signed up");
        Ok(())
    }

    /// Sign out. The local session is cleared whatever the service says.
    ///
    /// # Errors
    ///
    /// Returns (and stores) the remote failure, after clearing the session.
    pub async fn sign_out(&self) -> ActionResult {
        self.begin();
        let outcome = self.inner.remote.sign_out().await.map_err(StoreError::from);
        if let Err(err) = &outcome {
            tracing::warn!(error = %err, "remote sign-out failed; clearing local session anyway");
        }
        let error = outcome.clone().err();
        self.reset_signed_out(|state| state.error = error);
        outcome
    }

    /// Write profile fields and merge exactly those fields into the session's
    /// metadata.
    ///
    /// # Errors
    ///
    /// [`StoreError::Unauthenticated`] without a session (nothing is sent),
    /// or the remote failure.
    pub async fn update_profile(&self, update: ProfileUpdate) -> ActionResult {
        let ticket = self.begin();
        let Some(session) = self.session() else {
            let err = StoreError::Unauthenticated;
            self.settle(ticket, |state| state.error = Some(err.clone()));
            return Err(err);
        };

        let fields = update.into_fields();
        let mut payload = fields.clone();
        stamp_updated_at(&mut payload);
        let outcome = self
            .inner
            .remote
            .update_record(Collection::Profiles, session.id(), payload)
            .await;

        match outcome {
            Ok(_) => {
                self.settle(ticket, |state| {
                    if let Some(current) = state.session.as_mut() {
                        if current.id() == session.id() {
                            current.merge_metadata(fields);
                        }
                    }
                    state.error = None;
                });
                Ok(())
            }
            Err(err) => {
                let err = StoreError::from(err);
                tracing::warn!(error = %err, user_id = %session.id(), "profile update failed");
                self.settle(ticket, |state| state.error = Some(err.clone()));
                Err(err)
            }
        }
    }

    /// Drop the stored error without starting an action.
    pub fn clear_error(&self) {
        self.commit(|cell| cell.state.error = None);
    }

    // -------------------------------------------------------------------------
    // Commit plumbing
    // -------------------------------------------------------------------------

    fn cell(&self) -> MutexGuard<'_, Cell> {
        lock(&self.inner.cell)
    }

    /// Mutate the cell and notify subscribers with the resulting state.
    fn commit<R>(&self, f: impl FnOnce(&mut Cell) -> R) -> R {
        let (result, snapshot) = {
            let mut cell = self.cell();
            let result = f(&mut *cell);
            (result, cell.state.clone())
        };
        self.notify(&snapshot);
        result
    }

    /// Start an action: raise `loading`, clear `error`.
    fn begin(&self) -> Ticket {
        self.commit(|cell| {
            cell.pending += 1;
            cell.state.loading = true;
            cell.state.error = None;
            Ticket { epoch: cell.epoch }
        })
    }

    /// Apply an intermediate result without finishing the action. Returns
    /// `false` if the action was superseded.
    fn apply(&self, ticket: Ticket, f: impl FnOnce(&mut StoreState)) -> bool {
        let snapshot = {
            let mut cell = self.cell();
            if cell.epoch != ticket.epoch {
                return false;
            }
            f(&mut cell.state);
            cell.state.clone()
        };
        self.notify(&snapshot);
        true
    }

    /// Finish an action: apply its result and lower `loading` once nothing
    /// else is in flight. Superseded results are dropped. A successful
    /// result also clears `error`, so the last action to settle decides it.
    fn settle(&self, ticket: Ticket, f: impl FnOnce(&mut StoreState)) -> bool {
        let snapshot = {
            let mut cell = self.cell();
            if cell.epoch != ticket.epoch {
                tracing::debug!(stale = ticket.epoch, current = cell.epoch, "dropping superseded result");
                return false;
            }
            cell.pending = cell.pending.saturating_sub(1);
            f(&mut cell.state);
            cell.state.loading = cell.pending > 0;
            cell.resolved = true;
            cell.state.clone()
        };
        self.notify(&snapshot);
        true
    }

    /// Authoritative transition to signed out. Invalidates every in-flight
    /// action, then lets `f` decide what happens to `error`.
    fn reset_signed_out(&self, f: impl FnOnce(&mut StoreState)) {
        self.commit(|cell| {
            cell.epoch += 1;
            cell.pending = 0;
            cell.resolved = true;
            cell.state.session = None;
            cell.state.loading = false;
            f(&mut cell.state);
        });
    }

    fn notify(&self, state: &StoreState) {
        let listeners: Vec<Listener> = lock(&self.inner.listeners)
            .entries
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(state);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// SUBSCRIPTION
// =============================================================================

/// Handle returned by [`SessionStore::subscribe`].
pub struct Subscription {
    store: Weak<Inner>,
    id: u64,
}

impl Subscription {
    /// Stop receiving state changes.
    pub fn unsubscribe(self) {
        if let Some(inner) = self.store.upgrade() {
            lock(&inner.listeners).entries.retain(|(id, _)| *id != self.id);
        }
    }
}

#[cfg(test)]
#[path = "store_test.rs"]
mod tests;
