//! Out-of-band session changes: token refreshes, expiry, sign-out elsewhere.
//!
//! DESIGN
//! ======
//! One long-lived task per store drains the service's auth-change
//! subscription. Registration is guarded by a flag so a second caller cannot
//! start a duplicate listener (which would double every re-check). The flag
//! is released on unsubscribe or when the service closes the stream.

use std::sync::atomic::Ordering;

use tokio::task::JoinHandle;

use super::SessionStore;
use crate::remote::{AuthChange, AuthEvent};

impl SessionStore {
    /// Start the auth-change listener. Returns `None` if one is already
    /// running for this store.
    ///
    /// Must be called inside a Tokio runtime.
    #[must_use]
    pub fn watch_auth_changes(&self) -> Option<AuthWatcher> {
        if self.inner.watching.swap(true, Ordering::SeqCst) {
            tracing::warn!("auth change listener already registered");
            return None;
        }

        let mut subscription = self.inner.remote.on_auth_state_change();
        let store = self.clone();
        let task = tokio::spawn(async move {
            while let Some(change) = subscription.next().await {
                store.handle_auth_change(change).await;
            }
            tracing::debug!("auth change stream closed");
            store.inner.watching.store(false, Ordering::SeqCst);
        });
        tracing::debug!("auth change listener registered");
        Some(AuthWatcher { store: self.clone(), task })
    }

    /// Reconcile one pushed change with local state.
    pub async fn handle_auth_change(&self, change: AuthChange) {
        match change.event {
            AuthEvent::SignedIn | AuthEvent::TokenRefreshed => {
                if let Err(err) = self.check_auth().await {
                    tracing::warn!(error = %err, event = ?change.event, "re-check after auth change failed");
                }
            }
            AuthEvent::SignedOut => {
                // A failed local sign-out echoes here; its error stays visible.
                tracing::info!("signed out upstream");
                self.reset_signed_out(|_| {});
            }
            other => tracing::debug!(event = ?other, "ignoring auth change"),
        }
    }
}

/// Handle to the running auth-change listener.
pub struct AuthWatcher {
    store: SessionStore,
    task: JoinHandle<()>,
}

impl AuthWatcher {
    /// Stop listening. A new listener may be registered afterwards.
    pub fn unsubscribe(self) {
        // A listener whose stream closed already released the registration,
        // which may now belong to a newer listener.
        if self.task.is_finished() {
            return;
        }
        self.task.abort();
        self.store.inner.watching.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

#[cfg(test)]
#[path = "watch_test.rs"]
mod tests;
