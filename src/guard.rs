//! Route guard helpers.
//!
//! SYSTEM CONTEXT
//! ==============
//! Protected views apply identical unauthenticated redirect behavior, driven
//! only by the session store's observable state.

use crate::store::{SessionStore, StoreState, Subscription};

pub const LOGIN_ROUTE: &str = "/auth/login";
pub const DASHBOARD_ROUTE: &str = "/dashboard";

/// True once the store has settled with nobody signed in. Never true while
/// loading, so a pending check cannot bounce a user to the login page.
#[must_use]
pub fn should_redirect_unauth(state: &StoreState) -> bool {
    !state.loading && state.session.is_none()
}

/// Where a request for `route` should go instead, if anywhere.
#[must_use]
pub fn redirect_target(state: &StoreState, route: &str) -> Option<&'static str> {
    if route == LOGIN_ROUTE {
        return (!state.loading && state.session.is_some()).then_some(DASHBOARD_ROUTE);
    }
    should_redirect_unauth(state).then_some(LOGIN_ROUTE)
}

/// Redirect to the login route whenever auth has settled and no session is
/// present. Checks the current state immediately, then on every change.
pub fn install_unauth_redirect<F>(store: &SessionStore, navigate: F) -> Subscription
where
    F: Fn(&str) + Send + Sync + 'static,
{
    if should_redirect_unauth(&store.state()) {
        navigate(LOGIN_ROUTE);
    }
    store.subscribe(move |state| {
        if should_redirect_unauth(state) {
            navigate(LOGIN_ROUTE);
        }
    })
}

#[cfg(test)]
#[path = "guard_test.rs"]
mod tests;
